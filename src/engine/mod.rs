//! Conversation turn-taking engine
//!
//! Listens for an utterance, treats a sustained pause in transcript updates
//! as its end, sends the conversation to the chat model, speaks the reply and
//! resumes listening. Speech during playback interrupts it (barge-in).
//!
//! # Architecture
//!
//! ```text
//!  EngineHandle ──commands──┐
//!                           ▼
//!  TranscriptSource ──▶ ┌────────┐ ──▶ ChatCompletion
//!  debounce timer   ──▶ │ actor  │ ──▶ SpeechSink
//!  completion/playback ▶└────────┘ ──▶ events / state watch
//! ```
//!
//! A single task owns all mutable state. Transcript updates, timer firings,
//! completion results and playback completion are delivered to it as
//! messages, so state changes never interleave.

mod actor;
mod debounce;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::chat::ChatCompletion;
use crate::conversation::{ConversationTurn, DEFAULT_SYSTEM_PROMPT};
use crate::error::ErrorKind;
use crate::voice::{SpeechSink, TranscriptSource};
use crate::{Error, Result};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Top-level mode of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Listening,
    AwaitingCompletion,
    Speaking,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// When listening resumes after a reply arrives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelistenPolicy {
    /// Re-acquire the transcript source before speaking, so the person can
    /// interrupt the reply that is playing.
    ///
    /// The microphone stays open during playback, so open-air speakers will
    /// be heard as the person talking and cut the reply off. Use headphones,
    /// raise `[voice] speech_threshold`, or choose [`Self::AfterPlayback`].
    #[default]
    DuringPlayback,
    /// Re-acquire the transcript source once playback has finished
    AfterPlayback,
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Persona instructions seeded as the system turn
    pub system_prompt: String,

    /// Quiet interval that finalizes an utterance
    pub debounce: Duration,

    /// Upper bound on one completion call
    pub completion_timeout: Duration,

    pub relisten: RelistenPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            debounce: crate::config::DEFAULT_DEBOUNCE,
            completion_timeout: crate::config::DEFAULT_COMPLETION_TIMEOUT,
            relisten: RelistenPolicy::default(),
        }
    }
}

/// Notifications published by the engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine entered a new state
    StateChanged { state: EngineState },
    /// Latest transcript of the utterance in progress
    Transcript { text: String },
    /// An utterance ended and became a user turn (or a single-turn result)
    UtteranceFinalized { text: String },
    /// A turn was appended to the conversation
    TurnAppended { turn: ConversationTurn },
    /// The current turn failed
    Error { kind: ErrorKind, message: String },
}

/// Control requests sent to the engine task
pub(crate) enum Command {
    Start,
    Stop,
    RecognizeOnce(oneshot::Sender<Result<String>>),
    Conversation(oneshot::Sender<Vec<ConversationTurn>>),
    Shutdown,
}

/// Turn-taking engine
pub struct Engine;

impl Engine {
    /// Spawn the engine task and return its control handle
    ///
    /// Must be called within a tokio runtime. The task ends when
    /// [`EngineHandle::shutdown`] is called or every handle is dropped.
    pub fn spawn(
        config: EngineConfig,
        source: Arc<dyn TranscriptSource>,
        chat: Arc<dyn ChatCompletion>,
        sink: Arc<dyn SpeechSink>,
    ) -> EngineHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = actor::Actor::new(
            config,
            actor::Seams { source, chat, sink },
            state_tx,
            events_tx.clone(),
        );
        tokio::spawn(actor.run(commands_rx));

        EngineHandle {
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
        }
    }
}

/// Cloneable control surface for a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    /// Begin listening (ignored unless idle)
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine task has exited
    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    /// Stop listening, cancel any in-flight turn and return to idle
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine task has exited
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Listen for one utterance and return its text
    ///
    /// Does not call the chat model or touch the conversation. A `stop()`
    /// while waiting resolves with whatever was heard so far.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is busy, recognition is unavailable or
    /// the engine task has exited
    pub async fn recognize_once(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RecognizeOnce(tx)).await?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Snapshot of the conversation so far
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineStopped` if the engine task has exited
    pub async fn conversation(&self) -> Result<Vec<ConversationTurn>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Conversation(tx)).await?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    /// Tear down listening and playback and end the engine task
    pub async fn shutdown(&self) {
        let _ = self.send(Command::Shutdown).await;
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Subscribe to engine events from this point on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::EngineStopped)
    }
}
