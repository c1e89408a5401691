//! TOML configuration file loading
//!
//! Supports `~/.config/voice-chat/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::engine::RelistenPolicy;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// API credentials
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Chat completion settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Turn-taking settings
    #[serde(default)]
    pub turns: TurnsFileConfig,

    /// Speech input/output settings
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Command relay settings
    #[serde(default)]
    pub relay: RelayFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// `OpenAI` API key
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Model identifier (e.g. "gpt-3.5-turbo")
    pub model: Option<String>,

    /// API base URL, without the `/v1/...` path
    pub base_url: Option<String>,

    /// Persona instructions seeded as the system turn
    pub system_prompt: Option<String>,

    /// Completion request timeout in seconds
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TurnsFileConfig {
    /// Silence interval that ends an utterance, in seconds
    pub debounce_secs: Option<f64>,

    /// When to resume listening after a reply arrives
    pub relisten: Option<RelistenPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Spoken language hint for transcription (ISO-639-1)
    pub language: Option<String>,

    /// How often the in-progress utterance is re-transcribed, in milliseconds
    pub partial_interval_ms: Option<u64>,

    /// RMS energy above which captured audio counts as speech
    pub speech_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match read_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

fn read_config(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns a configuration error if the contents are not valid TOML or do
/// not match the schema.
pub fn parse(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/voice-chat/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-chat").join("config.toml"))
}
