mod engine;

pub use engine::{EchoEngine, Segment, SttEngine, Word};

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("empty input")]
    EmptyInput,
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
}

pub type Result<T> = std::result::Result<T, SttError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_engine_rejects_empty_input() {
        let engine = EchoEngine::new("echo");
        let err = engine.transcribe(&[], None).unwrap_err();
        assert!(matches!(err, SttError::EmptyInput));
    }

    #[test]
    fn echo_engine_transcribes_nonempty_input() {
        let engine = EchoEngine::new("echo");
        let segments = engine.transcribe(&[0.0; 8000], None).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end_ms, 500);
    }
}
