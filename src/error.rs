//! Error types for voice chat

use thiserror::Error;

/// Result type alias for voice chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voice chat
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration, including the API credential
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure, timeout or non-success HTTP status
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Response body could not be parsed or lacked expected fields
    #[error("response format error: {0}")]
    ResponseFormat(String),

    /// Speech recognition is not available on this device or session
    #[error("recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Speech output failed during playback
    #[error("speech output error: {0}")]
    Speech(String),

    /// Command relay error
    #[error("relay error: {0}")]
    Relay(String),

    /// The engine task is no longer running
    #[error("engine stopped")]
    EngineStopped,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Coarse classification of an [`Error`], reported alongside engine events
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    ResponseFormat,
    RecognitionUnavailable,
    Speech,
    Other,
}

impl Error {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Toml(_) => ErrorKind::Configuration,
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::ResponseFormat(_) => ErrorKind::ResponseFormat,
            Self::RecognitionUnavailable(_) | Self::Stt(_) => ErrorKind::RecognitionUnavailable,
            Self::Speech(_) | Self::Tts(_) | Self::Audio(_) => ErrorKind::Speech,
            Self::Relay(_) | Self::EngineStopped | Self::Io(_) => ErrorKind::Other,
        }
    }

    /// Message suitable for showing to the person using the app
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Configuration => "Please enter your OpenAI API key.".to_string(),
            ErrorKind::Connectivity => match self {
                Self::Connectivity(detail) if detail.starts_with("HTTP") => {
                    "Error: Invalid API key or server error.".to_string()
                }
                _ => "Error connecting to OpenAI API.".to_string(),
            },
            ErrorKind::ResponseFormat => "Error parsing OpenAI API response.".to_string(),
            ErrorKind::RecognitionUnavailable => {
                "Speech recognition is not available on this device.".to_string()
            }
            ErrorKind::Speech | ErrorKind::Other => self.to_string(),
        }
    }
}
