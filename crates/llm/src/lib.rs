//! C8: prompt composition, provider selection and token streaming for the
//! analysis and auto-answer LLM calls (spec.md §4.8).

mod client;
mod error;
mod prompt;
mod provider;

pub use client::{LlmClient, LlmConfig};
pub use error::{LlmError, Result};
pub use prompt::{build_analysis_prompt, format_memory_context, truncate, Prompt};
pub use provider::{GeminiProvider, LlmProvider, OllamaProvider, TokenStream};
