#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM not configured")]
    NotConfigured,
    #[error("LLM API error: {0}")]
    ApiError(String),
    #[error("LLM rate limited")]
    RateLimited,
}

pub type Result<T> = std::result::Result<T, LlmError>;
