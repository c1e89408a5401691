//! Spoken replies: TTS synthesis followed by interruptible playback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::playback::{AudioPlayback, decode_mp3};
use super::tts::TextToSpeech;
use super::SpeechSink;
use crate::{Error, Result};

/// Speaks text through `OpenAI` TTS and the default output device
pub struct Speaker {
    tts: TextToSpeech,
    /// Stop flag of the utterance currently being spoken
    current: Mutex<Arc<AtomicBool>>,
}

impl Speaker {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            current: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Install a fresh stop flag for a new utterance
    fn next_flag(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        if let Ok(mut current) = self.current.lock() {
            *current = Arc::clone(&flag);
        }
        flag
    }
}

#[async_trait]
impl SpeechSink for Speaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let stop = self.next_flag();
        tracing::debug!(text, "speaking");

        let mp3 = self.tts.synthesize(text).await?;
        if stop.load(Ordering::Acquire) {
            tracing::debug!("interrupted before playback");
            return Ok(());
        }

        let completed = tokio::task::spawn_blocking(move || {
            let samples = decode_mp3(&mp3)?;
            AudioPlayback::new()?.play_until(samples, &stop)
        })
        .await
        .map_err(|e| Error::Speech(format!("playback task failed: {e}")))??;

        if !completed {
            tracing::debug!("playback interrupted");
        }
        Ok(())
    }

    fn interrupt(&self) {
        if let Ok(current) = self.current.lock() {
            current.store(true, Ordering::Release);
        }
    }
}
