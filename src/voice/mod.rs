//! Speech input and output
//!
//! The engine drives speech through two seams: a [`TranscriptSource`] that
//! turns microphone audio into transcript updates, and a [`SpeechSink`] that
//! reads replies aloud. Concrete implementations live here too: capture and
//! Whisper transcription behind [`MicTranscriptSource`], TTS and playback
//! behind [`Speaker`].

mod activity;
mod capture;
mod mic;
mod playback;
mod speaker;
mod stt;
mod tts;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use activity::{ENERGY_THRESHOLD, SpeechActivity, rms_energy};
pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use mic::MicTranscriptSource;
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use speaker::Speaker;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

use crate::Result;

/// Latest transcript for the utterance in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUpdate {
    /// Full text of the utterance so far (not a delta)
    pub text: String,

    /// The recognizer considers the utterance complete
    pub is_final: bool,
}

impl TranscriptUpdate {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Stream of transcript updates for one listening session
///
/// An `Err` item reports a recognition failure; the sender closing ends
/// the session.
pub type TranscriptStream = mpsc::Receiver<Result<TranscriptUpdate>>;

/// Produces transcripts from an exclusive capture resource
///
/// Only one session may be active; `begin` implicitly ends any prior session.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Acquire the capture resource and start a listening session
    ///
    /// # Errors
    ///
    /// Returns `Error::RecognitionUnavailable` if recognition cannot start
    async fn begin(&self) -> Result<TranscriptStream>;

    /// Stop the active session and release the capture resource
    fn end(&self);
}

/// Reads text aloud
#[async_trait]
pub trait SpeechSink: Send + Sync {
    /// Speak `text`, resolving when playback finishes or is interrupted
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Halt the current playback immediately; must not block
    fn interrupt(&self);
}
