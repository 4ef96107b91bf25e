#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error("inference error: {0}")]
    InferenceError(String),
}

pub type Result<T> = std::result::Result<T, VadError>;

/// A voice-activity model that scores a fixed-size chunk of mono 16 kHz
/// float32 samples with a speech probability in `[0, 1]`.
///
/// Implementations are expected to be stateful across calls (internal
/// smoothing, padding, etc.) but must not assume any particular chunk size
/// beyond what they document.
pub trait VoiceActivityDetector: Send + Sync {
    fn speech_probability(&mut self, chunk: &[f32]) -> Result<f32>;
    fn reset(&mut self);
}

/// Deterministic stand-in used in tests and anywhere a real VAD model isn't
/// wired up yet. Returns probabilities from a fixed script, cycling the last
/// value once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedVad {
    script: Vec<f32>,
    pos: usize,
}

impl ScriptedVad {
    pub fn new(script: Vec<f32>) -> Self {
        Self { script, pos: 0 }
    }
}

impl VoiceActivityDetector for ScriptedVad {
    fn speech_probability(&mut self, _chunk: &[f32]) -> Result<f32> {
        if self.script.is_empty() {
            return Ok(0.0);
        }
        let value = self.script[self.pos.min(self.script.len() - 1)];
        self.pos += 1;
        Ok(value)
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_vad_cycles_last_value() {
        let mut vad = ScriptedVad::new(vec![0.8, 0.1]);
        assert_eq!(vad.speech_probability(&[]).unwrap(), 0.8);
        assert_eq!(vad.speech_probability(&[]).unwrap(), 0.1);
        assert_eq!(vad.speech_probability(&[]).unwrap(), 0.1);
        vad.reset();
        assert_eq!(vad.speech_probability(&[]).unwrap(), 0.8);
    }
}
