use std::any::Any;

#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub words: Vec<Word>,
    pub speaker: Option<i32>,
}

/// `(pcm, optional language) -> (text, confidence)`, per-call. Implementations
/// MUST NOT be called concurrently from multiple threads; the caller
/// (`gibberish-audio`'s `AudioSupervisor`) serializes calls with a mutex
/// because the underlying model is not re-entrant.
pub trait SttEngine: Send + Sync {
    fn transcribe(&self, audio: &[f32], language: Option<&str>) -> crate::Result<Vec<Segment>>;

    fn is_streaming_capable(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str;

    fn supported_languages(&self) -> Vec<&'static str> {
        vec!["en"]
    }

    fn as_any(&self) -> &dyn Any;
}

/// Deterministic stand-in for a real STT engine: echoes back the sample
/// count as confidence-scaled text. Used in tests and as a placeholder
/// until a real model is wired up by the caller.
pub struct EchoEngine {
    name: String,
}

impl EchoEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SttEngine for EchoEngine {
    fn transcribe(&self, audio: &[f32], _language: Option<&str>) -> crate::Result<Vec<Segment>> {
        if audio.is_empty() {
            return Err(crate::SttError::EmptyInput);
        }
        let duration_ms = (audio.len() as u64 * 1000) / 16000;
        Ok(vec![Segment {
            text: format!("[{} samples]", audio.len()),
            start_ms: 0,
            end_ms: duration_ms,
            words: Vec::new(),
            speaker: None,
        }])
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
