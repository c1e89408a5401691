//! Voice Chat - spoken conversations with a chat model
//!
//! This library provides the pieces of a hands-free chat client:
//! - Turn-taking engine (listen, detect end of utterance, reply, barge-in)
//! - Conversation history seeded with a persona
//! - `OpenAI` chat completion, Whisper STT and TTS clients
//! - Microphone capture and speaker playback
//! - Local HTTP relay for driving recognition from another process
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │            CLI  │  Relay (POST /relay)           │
//! └───────────────────────┬──────────────────────────┘
//!                         │ EngineHandle
//! ┌───────────────────────▼──────────────────────────┐
//! │                  Turn Engine                     │
//! │  Idle → Listening → AwaitingCompletion → Speaking│
//! └──────┬──────────────────┬─────────────────┬──────┘
//!        │                  │                 │
//!  TranscriptSource   ChatCompletion     SpeechSink
//!  (mic + Whisper)    (chat API)         (TTS + speaker)
//! ```

pub mod chat;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod relay;
pub mod voice;

pub use chat::{ChatCompletion, OpenAiChatClient};
pub use config::Config;
pub use conversation::{Conversation, ConversationTurn, Role};
pub use engine::{
    Engine, EngineConfig, EngineEvent, EngineHandle, EngineState, RelistenPolicy,
};
pub use error::{Error, ErrorKind, Result};
pub use relay::RelayServer;
pub use voice::{SpeechSink, TranscriptSource, TranscriptUpdate};
