use crate::prompt::Prompt;
use crate::{LlmError, Result};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Dynamic-dispatch seam over LLM providers (spec.md §9): a tagged variant
/// behind a single `stream(prompt) -> token sequence` interface.
pub trait LlmProvider: Send + Sync {
    fn stream(&self, prompt: Prompt) -> TokenStream;
}

#[derive(Debug, serde::Serialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "inlineData")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, serde::Serialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, serde::Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, serde::Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, serde::Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiSystemInstruction,
    contents: Vec<GeminiContent>,
}

#[derive(Debug, serde::Deserialize)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, serde::Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiCandidateContent,
}

#[derive(Debug, Default, serde::Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, serde::Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

/// Google Gemini via the REST streaming endpoint (`alt=sse`).
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl LlmProvider for GeminiProvider {
    fn stream(&self, prompt: Prompt) -> TokenStream {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        let mut parts = vec![GeminiPart {
            text: Some(prompt.human),
            inline_data: None,
        }];
        if let Some(data) = prompt.image_base64 {
            parts.push(GeminiPart {
                text: None,
                inline_data: Some(GeminiInlineData {
                    mime_type: "image/jpeg".to_string(),
                    data,
                }),
            });
        }

        let body = GeminiRequest {
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: Some(prompt.system),
                    inline_data: None,
                }],
            },
            contents: vec![GeminiContent {
                role: "user",
                parts,
            }],
        };

        Box::pin(async_stream::try_stream! {
            let url = format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:streamGenerateContent?alt=sse&key={api_key}"
            );
            let response = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| LlmError::ApiError(e.to_string()))?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                Err(LlmError::RateLimited)?;
            }
            let response = response
                .error_for_status()
                .map_err(|e| LlmError::ApiError(e.to_string()))?;

            let mut body_stream = response.bytes_stream();
            let mut buffer = String::new();
            use futures::StreamExt;
            while let Some(chunk) = body_stream.next().await {
                let chunk = chunk.map_err(|e| LlmError::ApiError(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].to_string();
                    buffer.drain(..=newline);

                    let Some(json) = line.strip_prefix("data: ") else { continue };
                    let parsed: GeminiStreamChunk = match serde_json::from_str(json) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    for candidate in parsed.candidates {
                        for part in candidate.content.parts {
                            if !part.text.is_empty() {
                                yield part.text;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[derive(Debug, serde::Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Default, serde::Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

/// A locally-hosted Ollama model, addressed via its chat-completion API.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

impl LlmProvider for OllamaProvider {
    fn stream(&self, prompt: Prompt) -> TokenStream {
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let model = self.model.clone();

        let body = OllamaRequest {
            model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: prompt.system,
                    images: Vec::new(),
                },
                OllamaMessage {
                    role: "user",
                    content: prompt.human,
                    images: prompt.image_base64.into_iter().collect(),
                },
            ],
            stream: true,
        };

        Box::pin(async_stream::try_stream! {
            let url = format!("{base_url}/api/chat");
            let response = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| LlmError::ApiError(e.to_string()))?
                .error_for_status()
                .map_err(|e| LlmError::ApiError(e.to_string()))?;

            let mut body_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut finished = false;
            use futures::StreamExt;
            while !finished {
                let Some(chunk) = body_stream.next().await else { break };
                let chunk = chunk.map_err(|e| LlmError::ApiError(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: OllamaChunk = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if !parsed.message.content.is_empty() {
                        yield parsed.message.content;
                    }
                    if parsed.done {
                        finished = true;
                        break;
                    }
                }
            }
        })
    }
}
