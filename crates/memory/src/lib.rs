//! C5: embedding-backed vector memory with importance-weighted pruning and
//! on-demand deduplication (spec.md §4.9).

mod embed;
mod pool;
mod service;
mod sqlite;
mod store;

pub use embed::{EmbedError, Embedder, HashEmbedder, OrtEmbedder};
pub use pool::{ClientPool, PooledClient};
pub use service::{MemoryConfig, MemoryError, MemoryService, Result};
pub use sqlite::SqliteVectorStore;
pub use store::{GetResult, Metadata, QueryResult, StoreError, VectorStore};
