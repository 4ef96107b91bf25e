use std::collections::HashMap;

/// Metadata attached to a memory record. Mirrors a loosely-typed document
/// store's metadata dict: string keys, JSON-valued entries.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Result of a similarity query: parallel vectors indexed by rank.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    /// Cosine distance (`1 - similarity`), ascending (closest first).
    pub distances: Vec<f32>,
}

/// Result of an unfiltered or id-filtered fetch.
#[derive(Debug, Clone, Default)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store failed: {0}")]
    StoreFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The collaborator surface spec.md §6 names for a vector store: `add`,
/// `query`, `get`, `update`, `delete`, `count`. Any real vector database
/// client (Chroma, Qdrant, pgvector, ...) can implement this trait; the
/// crate ships `SqliteVectorStore` as the one concrete, runnable adapter.
pub trait VectorStore: Send + Sync {
    fn add(&self, documents: &[String], metadatas: &[Metadata], ids: &[String]) -> Result<()>;

    fn query(
        &self,
        texts: &[String],
        k: usize,
        where_filter: Option<&Metadata>,
    ) -> Result<QueryResult>;

    fn get(&self, ids: Option<&[String]>) -> Result<GetResult>;

    fn update(&self, ids: &[String], metadatas: &[Metadata]) -> Result<()>;

    fn delete(&self, ids: &[String]) -> Result<()>;

    fn count(&self) -> Result<usize>;
}

/// `where_filter` matches per spec.md's loose `{"source": "screen"}` style:
/// every key in the filter must be present in a record's metadata with an
/// equal value.
pub(crate) fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter.iter().all(|(k, v)| metadata.get(k) == Some(v)),
    }
}
