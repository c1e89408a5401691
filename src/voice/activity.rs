//! Energy-based speech activity tracking
//!
//! Decides whether captured audio holds speech worth transcribing. The
//! tracker never decides when an utterance ends; that is the engine's
//! debounce timer, driven by the transcript updates this gates.

/// Minimum RMS energy to consider a chunk speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech before an utterance is worth transcribing (0.3s at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Tracks speech energy across the chunks of one utterance
#[derive(Debug)]
pub struct SpeechActivity {
    threshold: f32,
    speech_samples: usize,
    fresh_speech: bool,
}

impl SpeechActivity {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_threshold(ENERGY_THRESHOLD)
    }

    #[must_use]
    pub const fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            speech_samples: 0,
            fresh_speech: false,
        }
    }

    /// Feed a chunk of samples; returns true if the chunk is speech
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let energy = rms_energy(samples);
        let is_speech = energy > self.threshold;

        if is_speech {
            self.speech_samples += samples.len();
            self.fresh_speech = true;
        }

        tracing::trace!(energy, is_speech, speech = self.speech_samples, "activity");
        is_speech
    }

    /// Whether speech arrived since the last call, clearing the flag
    pub const fn take_fresh_speech(&mut self) -> bool {
        std::mem::replace(&mut self.fresh_speech, false)
    }

    /// Whether enough speech has accumulated to transcribe
    #[must_use]
    pub const fn has_utterance(&self) -> bool {
        self.speech_samples > MIN_SPEECH_SAMPLES
    }
}

impl Default for SpeechActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
