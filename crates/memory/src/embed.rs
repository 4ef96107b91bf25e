use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),
    #[error("failed to load model: {0}")]
    Model(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, EmbedError>;

/// Turns text into a fixed-dimension embedding vector for similarity search.
/// Implementations must be deterministic for the same input (pruning and
/// dedup both rely on repeated queries against the same text returning
/// consistent neighbor distances).
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Sentence-embedding model run locally through `ort`. Expects a standard
/// sentence-transformer ONNX export (`input_ids`/`attention_mask` inputs,
/// `last_hidden_state` output) and mean-pools the token embeddings over the
/// attention mask before L2-normalizing, the usual sentence-embedding recipe.
pub struct OrtEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimension: usize,
}

impl OrtEmbedder {
    pub fn load(model_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

        let session = Session::builder()
            .map_err(|e| EmbedError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EmbedError::Model(e.to_string()))?
            .commit_from_file(model_path.as_ref())
            .map_err(|e| EmbedError::Model(e.to_string()))?;

        let dimension = session
            .outputs
            .first()
            .and_then(|o| match &o.output_type {
                ort::value::ValueType::Tensor { shape, .. } => shape.last().copied(),
                _ => None,
            })
            .filter(|d| *d > 0)
            .map(|d| d as usize)
            .unwrap_or(384);

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension,
        })
    }
}

impl Embedder for OrtEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let seq_len = ids.len();

        let input_ids = ort::value::Tensor::from_array(([1i64, seq_len as i64], ids))
            .map_err(|e| EmbedError::Inference(e.to_string()))?;
        let attention_mask =
            ort::value::Tensor::from_array(([1i64, seq_len as i64], mask.clone()))
                .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedError::Inference("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let hidden = *shape.last().ok_or_else(|| {
            EmbedError::Inference("embedding output has no hidden dimension".to_string())
        })? as usize;

        let mut pooled = vec![0f32; hidden];
        let mut valid_tokens = 0f32;
        for (t, &m) in mask.iter().enumerate() {
            if m == 0 {
                continue;
            }
            valid_tokens += 1.0;
            for h in 0..hidden {
                pooled[h] += data[t * hidden + h];
            }
        }
        if valid_tokens > 0.0 {
            for v in pooled.iter_mut() {
                *v /= valid_tokens;
            }
        }

        let norm = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in pooled.iter_mut() {
                *v /= norm;
            }
        }

        Ok(pooled)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic, model-free stand-in for tests and for running the crate
/// without a downloaded ONNX model: hashes words into a fixed-size bag and
/// L2-normalizes, giving a stable (if low-quality) similarity signal.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            let slot = (hash as usize) % self.dimension;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed("hello world").unwrap();
        let b = embedder.embed("hello world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_embedder_is_normalized() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed("some text to embed").unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }
}
