//! Microphone transcript source
//!
//! Captures the default input device on a dedicated thread (cpal streams are
//! not `Send`) and periodically re-transcribes the utterance so far. Only
//! intervals that contained speech produce an update, so a pause in speech
//! shows up as a pause in updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc, oneshot};

use super::activity::SpeechActivity;
use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::stt::SpeechToText;
use super::{TranscriptSource, TranscriptStream, TranscriptUpdate};
use crate::{Error, Result};

/// How often captured audio is drained from the device buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Leading silence kept before speech starts (5s at 16kHz)
const MAX_LEADING_SILENCE: usize = SAMPLE_RATE as usize * 5;

const CHANNEL_CAPACITY: usize = 32;

/// Running capture thread for one listening session
struct ActiveCapture {
    stop: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    thread: JoinHandle<()>,
}

/// Transcript source backed by the microphone and Whisper
pub struct MicTranscriptSource {
    stt: Arc<SpeechToText>,
    runtime: Handle,
    partial_interval: Duration,
    speech_threshold: f32,
    active: Mutex<Option<ActiveCapture>>,
    /// Join of a capture thread that was told to stop by `end`
    releasing: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MicTranscriptSource {
    /// Create a source; must be called from within a tokio runtime
    #[must_use]
    pub fn new(stt: SpeechToText, partial_interval: Duration, speech_threshold: f32) -> Self {
        Self {
            stt: Arc::new(stt),
            runtime: Handle::current(),
            partial_interval,
            speech_threshold,
            active: Mutex::new(None),
            releasing: Mutex::new(None),
        }
    }

    fn take_active(&self) -> Option<ActiveCapture> {
        let active = self.active.lock().ok().and_then(|mut a| a.take())?;
        active.stop.store(true, Ordering::Release);
        active.cancel.notify_one();
        Some(active)
    }
}

/// Wait for a stopped capture thread to exit
fn join_capture(thread: JoinHandle<()>) {
    if thread.join().is_err() {
        tracing::warn!("capture thread panicked");
    }
    tracing::info!("microphone released");
}

#[async_trait]
impl TranscriptSource for MicTranscriptSource {
    async fn begin(&self) -> Result<TranscriptStream> {
        // The previous capture must release the device before a new one opens it
        if let Some(previous) = self.take_active() {
            let _ = tokio::task::spawn_blocking(move || join_capture(previous.thread)).await;
        }
        let releasing = self.releasing.lock().ok().and_then(|mut r| r.take());
        if let Some(releasing) = releasing {
            let _ = releasing.await;
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(Notify::new());

        let worker = CaptureWorker {
            stt: Arc::clone(&self.stt),
            runtime: self.runtime.clone(),
            partial_interval: self.partial_interval,
            speech_threshold: self.speech_threshold,
            stop: Arc::clone(&stop),
            cancel: Arc::clone(&cancel),
            tx,
        };

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || worker.run(ready_tx))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(Error::RecognitionUnavailable(
                    "capture thread exited during startup".to_string(),
                ));
            }
        }

        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveCapture {
                stop,
                cancel,
                thread,
            });
        }

        tracing::info!("microphone listening");
        Ok(rx)
    }

    /// Signal the capture thread to stop; the join runs on the blocking pool
    fn end(&self) {
        if let Some(active) = self.take_active() {
            let join = self.runtime.spawn_blocking(move || join_capture(active.thread));
            if let Ok(mut releasing) = self.releasing.lock() {
                *releasing = Some(join);
            }
        }
    }
}

impl Drop for MicTranscriptSource {
    fn drop(&mut self) {
        if let Some(active) = self.take_active() {
            join_capture(active.thread);
        }
    }
}

/// State owned by the capture thread
struct CaptureWorker {
    stt: Arc<SpeechToText>,
    runtime: Handle,
    partial_interval: Duration,
    speech_threshold: f32,
    stop: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    tx: mpsc::Sender<Result<TranscriptUpdate>>,
}

impl CaptureWorker {
    fn run(self, ready: oneshot::Sender<Result<()>>) {
        let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
            Ok(capture) => capture,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        let mut activity = SpeechActivity::with_threshold(self.speech_threshold);
        let mut utterance: Vec<f32> = Vec::new();
        let mut last_poll = Instant::now();

        while !self.stopped() {
            std::thread::sleep(DRAIN_INTERVAL);

            let samples = capture.take_buffer();
            if !samples.is_empty() {
                activity.process(&samples);
                utterance.extend_from_slice(&samples);
            }

            if !activity.has_utterance() && utterance.len() > MAX_LEADING_SILENCE {
                let excess = utterance.len() - MAX_LEADING_SILENCE;
                utterance.drain(..excess);
            }

            if last_poll.elapsed() < self.partial_interval {
                continue;
            }
            last_poll = Instant::now();

            if !activity.take_fresh_speech() || !activity.has_utterance() {
                continue;
            }

            match self.transcribe(&utterance) {
                Some(Ok(text)) if !text.is_empty() => {
                    if self.stopped()
                        || self.tx.blocking_send(Ok(TranscriptUpdate::partial(text))).is_err()
                    {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "partial transcription failed, continuing");
                }
                None => break,
            }
        }

        capture.stop();
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Transcribe the utterance so far; `None` if the session was ended
    fn transcribe(&self, utterance: &[f32]) -> Option<Result<String>> {
        let wav = match samples_to_wav(utterance, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => return Some(Err(e)),
        };

        self.runtime.block_on(async {
            tokio::select! {
                result = self.stt.transcribe(wav) => Some(result),
                () = self.cancel.notified() => None,
            }
        })
    }
}
