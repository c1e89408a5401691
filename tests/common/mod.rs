//! Shared test utilities: scripted stand-ins for the engine's seams

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, mpsc};
use voice_chat::voice::{SpeechSink, TranscriptSource, TranscriptStream, TranscriptUpdate};
use voice_chat::{
    ChatCompletion, ConversationTurn, Engine, EngineConfig, EngineEvent, EngineHandle,
    EngineState, Error, RelistenPolicy, Result,
};

/// Transcript source driven by the test
#[derive(Default)]
pub struct ScriptedSource {
    current: Mutex<Option<mpsc::Sender<Result<TranscriptUpdate>>>>,
    begins: Mutex<usize>,
    ends: Mutex<usize>,
    unavailable: bool,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A source whose `begin` always fails
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            unavailable: true,
            ..Self::default()
        })
    }

    fn sender(&self) -> mpsc::Sender<Result<TranscriptUpdate>> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .expect("no active listening session")
    }

    /// Deliver a partial transcript on the active session
    pub async fn partial(&self, text: &str) {
        self.sender()
            .send(Ok(TranscriptUpdate::partial(text)))
            .await
            .unwrap();
    }

    /// Deliver a final transcript on the active session
    pub async fn final_text(&self, text: &str) {
        self.sender()
            .send(Ok(TranscriptUpdate::final_text(text)))
            .await
            .unwrap();
    }

    /// Deliver a recognition failure on the active session
    pub async fn fail(&self, error: Error) {
        self.sender().send(Err(error)).await.unwrap();
    }

    /// Close the active session's stream from the source side
    pub fn close(&self) {
        self.current.lock().unwrap().take();
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    pub fn begins(&self) -> usize {
        *self.begins.lock().unwrap()
    }

    pub fn ends(&self) -> usize {
        *self.ends.lock().unwrap()
    }
}

#[async_trait]
impl TranscriptSource for ScriptedSource {
    async fn begin(&self) -> Result<TranscriptStream> {
        if self.unavailable {
            return Err(Error::RecognitionUnavailable("no microphone".to_string()));
        }
        *self.begins.lock().unwrap() += 1;

        let (tx, rx) = mpsc::channel(16);
        *self.current.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn end(&self) {
        if self.current.lock().unwrap().take().is_some() {
            *self.ends.lock().unwrap() += 1;
        }
    }
}

/// Chat model returning queued replies and recording every request
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<ConversationTurn>>>,
    requests: Mutex<Vec<Vec<ConversationTurn>>>,
    latency: Duration,
    gated: bool,
    gate: Notify,
}

impl ScriptedChat {
    pub fn replying(replies: impl IntoIterator<Item = Result<ConversationTurn>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    /// No replies queued; any request fails
    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(latency: Duration, reply: Result<ConversationTurn>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([reply])),
            latency,
            ..Self::default()
        })
    }

    /// Each request waits for `release` before replying
    pub fn gated(reply: Result<ConversationTurn>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([reply])),
            gated: true,
            ..Self::default()
        })
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<ConversationTurn> {
        self.requests.lock().unwrap().push(turns.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.gated {
            self.gate.notified().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Connectivity("no scripted reply".to_string())))
    }
}

/// Speech sink that records calls; optionally holds playback until
/// interrupted, or fails every utterance
#[derive(Default)]
pub struct RecordingSink {
    log: Mutex<Vec<String>>,
    hold: bool,
    fail: bool,
    released: Notify,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Playback lasts until `interrupt` is called
    pub fn holding() -> Arc<Self> {
        Arc::new(Self {
            hold: true,
            ..Self::default()
        })
    }

    /// Every `speak` call fails as if the output device went away
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("speak:").map(ToString::to_string))
            .collect()
    }
}

#[async_trait]
impl SpeechSink for RecordingSink {
    async fn speak(&self, text: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("speak:{text}"));
        if self.fail {
            return Err(Error::Speech("output device lost".to_string()));
        }
        if self.hold {
            self.released.notified().await;
        } else {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    fn interrupt(&self) {
        self.log.lock().unwrap().push("interrupt".to_string());
        self.released.notify_one();
    }
}

pub fn engine_config(relisten: RelistenPolicy) -> EngineConfig {
    EngineConfig {
        system_prompt: "You are a test assistant.".to_string(),
        debounce: Duration::from_secs(2),
        completion_timeout: Duration::from_secs(30),
        relisten,
    }
}

pub fn spawn_engine(
    config: EngineConfig,
    source: &Arc<ScriptedSource>,
    chat: Arc<dyn ChatCompletion>,
    sink: &Arc<RecordingSink>,
) -> EngineHandle {
    Engine::spawn(config, source.clone(), chat, sink.clone())
}

/// Wait until the engine reaches `state`
pub async fn wait_for_state(engine: &EngineHandle, state: EngineState) {
    let mut rx = engine.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("engine never reached {state}"))
        .unwrap();
}

/// Drain events received so far
pub fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn reply(text: &str) -> Result<ConversationTurn> {
    Ok(ConversationTurn::assistant(text))
}
