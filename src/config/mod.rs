//! Configuration management for voice chat
//!
//! Values are layered: environment > TOML file > built-in defaults.
//! CLI flags are applied on top by the binary.

pub mod file;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::conversation::DEFAULT_SYSTEM_PROMPT;
use crate::engine::{EngineConfig, RelistenPolicy};
use crate::voice::ENERGY_THRESHOLD;
use file::ConfigFile;

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Default silence interval that finalizes an utterance
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Default upper bound on a single completion request
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default command relay port
pub const DEFAULT_RELAY_PORT: u16 = 18800;

/// Voice chat configuration
#[derive(Debug)]
pub struct Config {
    /// `OpenAI` API key, shared by chat, STT and TTS
    pub api_key: Option<SecretString>,

    /// Chat completion configuration
    pub chat: ChatConfig,

    /// Turn-taking configuration
    pub turns: TurnConfig,

    /// Speech input/output configuration
    pub voice: VoiceConfig,

    /// Command relay configuration
    pub relay: RelayConfig,
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model identifier sent with every request
    pub model: String,

    /// API base URL
    pub base_url: String,

    /// Persona instructions seeded as the system turn
    pub system_prompt: String,

    /// Upper bound on a single completion request
    pub timeout: Duration,
}

/// Turn-taking configuration
#[derive(Debug, Clone, Copy)]
pub struct TurnConfig {
    /// Silence interval that ends an utterance
    pub debounce: Duration,

    /// When to resume listening after a reply arrives
    pub relisten: RelistenPolicy,
}

/// Speech input/output configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Spoken language hint for transcription
    pub language: String,

    /// How often the in-progress utterance is re-transcribed
    pub partial_interval: Duration,

    /// RMS energy above which captured audio counts as speech. Raise it when
    /// the speakers are audible to the microphone during playback.
    pub speech_threshold: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            language: "en".to_string(),
            partial_interval: Duration::from_millis(1000),
            speech_threshold: ENERGY_THRESHOLD,
        }
    }
}

/// Command relay configuration
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Serve the relay endpoint alongside the interactive session
    pub enabled: bool,

    /// Port to listen on
    pub port: u16,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    #[must_use]
    pub fn load() -> Self {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    pub fn from_sources(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = env("OPENAI_API_KEY")
            .or(fc.api.key)
            .map(SecretString::from);

        let chat = ChatConfig {
            model: env("VOICE_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: env("VOICE_CHAT_API_BASE")
                .or(fc.chat.base_url)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            system_prompt: fc
                .chat
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            timeout: fc
                .chat
                .timeout_secs
                .map_or(DEFAULT_COMPLETION_TIMEOUT, Duration::from_secs),
        };

        let debounce_secs = env("VOICE_CHAT_DEBOUNCE_SECS")
            .and_then(|s| s.parse::<f64>().ok())
            .or(fc.turns.debounce_secs);
        let turns = TurnConfig {
            debounce: debounce_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_DEBOUNCE),
            relisten: fc.turns.relisten.unwrap_or_default(),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_model: fc.voice.stt_model.unwrap_or(defaults.stt_model),
            tts_model: fc.voice.tts_model.unwrap_or(defaults.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(defaults.tts_speed),
            language: fc.voice.language.unwrap_or(defaults.language),
            partial_interval: fc
                .voice
                .partial_interval_ms
                .map_or(defaults.partial_interval, Duration::from_millis),
            speech_threshold: env("VOICE_CHAT_SPEECH_THRESHOLD")
                .and_then(|s| s.parse::<f32>().ok())
                .or(fc.voice.speech_threshold)
                .filter(|t| t.is_finite() && *t > 0.0)
                .unwrap_or(defaults.speech_threshold),
        };

        let relay = RelayConfig {
            enabled: fc.relay.enabled.unwrap_or(true),
            port: env("VOICE_CHAT_RELAY_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.relay.port)
                .unwrap_or(DEFAULT_RELAY_PORT),
        };

        Self {
            api_key,
            chat,
            turns,
            voice,
            relay,
        }
    }

    /// Whether a non-empty API key is configured
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    /// A fresh copy of the API key for handing to a client
    ///
    /// An absent key becomes an empty secret; clients reject it when used.
    #[must_use]
    pub fn api_key_secret(&self) -> SecretString {
        self.api_key.as_ref().map_or_else(
            || SecretString::from(String::new()),
            |k| SecretString::from(k.expose_secret().to_owned()),
        )
    }

    /// Engine settings derived from this configuration
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            system_prompt: self.chat.system_prompt.clone(),
            debounce: self.turns.debounce,
            completion_timeout: self.chat.timeout,
            relisten: self.turns.relisten,
        }
    }
}
