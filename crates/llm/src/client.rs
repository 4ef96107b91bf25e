use crate::prompt::{build_analysis_prompt, format_memory_context, truncate};
use crate::provider::{LlmProvider, TokenStream};
use crate::{LlmError, Result};
use gibberish_memory::MemoryService;
use image::RgbaImage;
use std::sync::Arc;

/// A streamed line matching this sentinel pair is a `store_memory` tool call
/// rather than user-visible content (spec.md §4.8): the client writes it to
/// the vector memory and swallows it instead of forwarding it downstream.
const TOOL_CALL_PREFIX: &str = "<<store_memory:";
const TOOL_CALL_SUFFIX: &str = ">>";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub context_max_length: usize,
    pub memory_query_k: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            context_max_length: 5000,
            memory_query_k: 5,
        }
    }
}

/// C8: composes prompts, selects a provider, and streams tokens while
/// transparently intercepting `store_memory` tool calls.
pub struct LlmClient {
    provider: Option<Arc<dyn LlmProvider>>,
    memory: Option<Arc<MemoryService>>,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, memory: Option<Arc<MemoryService>>, config: LlmConfig) -> Self {
        Self {
            provider,
            memory,
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    fn memory_context(&self, user_query: &str) -> String {
        if user_query.is_empty() {
            return String::new();
        }
        let Some(memory) = &self.memory else {
            return String::new();
        };
        let documents = memory.query(user_query, self.config.memory_query_k, None);
        format_memory_context(&documents)
    }

    /// `analyze(context_text, user_query, image)` (spec.md §4.8).
    pub fn analyze(
        &self,
        context_text: &str,
        user_query: &str,
        image: Option<&RgbaImage>,
    ) -> Result<TokenStream> {
        let Some(provider) = self.provider.clone() else {
            return Err(LlmError::NotConfigured);
        };

        let context_text = truncate(context_text, self.config.context_max_length);
        let memory_ctx = self.memory_context(user_query);
        let prompt = build_analysis_prompt(&context_text, &memory_ctx, user_query, image)?;

        Ok(self.intercept_tool_calls(provider.stream(prompt)))
    }

    /// Best-effort transcript compression; returns the input unchanged on
    /// any failure (spec.md §4.8).
    pub async fn summarize(&self, transcript: &str, max_length: usize) -> String {
        let Some(provider) = self.provider.clone() else {
            return transcript.to_string();
        };
        let prompt = match build_analysis_prompt(
            transcript,
            "",
            &format!("Summarize the above in under {max_length} characters."),
            None,
        ) {
            Ok(p) => p,
            Err(_) => return transcript.to_string(),
        };

        use futures::StreamExt;
        let mut stream = provider.stream(prompt);
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(token) => out.push_str(&token),
                Err(_) => return transcript.to_string(),
            }
        }
        if out.trim().is_empty() {
            transcript.to_string()
        } else {
            truncate(&out, max_length)
        }
    }

    fn intercept_tool_calls(&self, inner: TokenStream) -> TokenStream {
        let memory = self.memory.clone();
        Box::pin(async_stream::try_stream! {
            use futures::StreamExt;
            let mut inner = inner;
            let mut buffer = String::new();

            while let Some(token) = inner.next().await {
                let token = token?;
                buffer.push_str(&token);

                while let Some(newline_pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline_pos).collect();
                    let trimmed = line.trim_end_matches('\n');
                    if let Some(call) = parse_tool_call(trimmed) {
                        if let Some(memory) = &memory {
                            let memory = memory.clone();
                            let (text, source) = call;
                            let _ = tokio::task::spawn_blocking(move || memory.add(&text, &source, None)).await;
                        }
                    } else {
                        yield line;
                    }
                }
            }

            if !buffer.is_empty() {
                if let Some(call) = parse_tool_call(&buffer) {
                    if let Some(memory) = &memory {
                        let memory = memory.clone();
                        let (text, source) = call;
                        let _ = tokio::task::spawn_blocking(move || memory.add(&text, &source, None)).await;
                    }
                } else {
                    yield buffer;
                }
            }
        })
    }
}

/// Parses a `<<store_memory:SOURCE>>TEXT<<end>>` line into `(text, source)`.
fn parse_tool_call(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let rest = line.strip_prefix(TOOL_CALL_PREFIX)?;
    let (source, rest) = rest.split_once(TOOL_CALL_SUFFIX)?;
    let text = rest.strip_suffix("<<end>>")?;
    Some((text.to_string(), source.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_tool_call() {
        let (text, source) = parse_tool_call("<<store_memory:screen>>hello world<<end>>").unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(source, "screen");
    }

    #[test]
    fn rejects_plain_text() {
        assert!(parse_tool_call("just a normal line of output").is_none());
    }
}
