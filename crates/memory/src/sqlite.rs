use crate::embed::Embedder;
use crate::store::{matches_filter, GetResult, Metadata, QueryResult, StoreError, VectorStore};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

type Result<T> = std::result::Result<T, StoreError>;

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// In-process vector store backed by SQLite. Embeddings are stored as
/// little-endian f32 blobs; similarity search is a brute-force cosine scan
/// over the table, which is adequate at the `prune_threshold` scales spec.md
/// §6 expects (tens of thousands of rows, not billions).
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

impl SqliteVectorStore {
    pub fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
            embedder,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
            embedder,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        Ok(())
    }

    fn fetch_all(&self, conn: &Connection) -> Result<Vec<(String, String, Metadata, Vec<f32>)>> {
        let mut stmt = conn
            .prepare("SELECT id, document, metadata, embedding FROM memory_records")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let document: String = row.get(1)?;
                let metadata_json: String = row.get(2)?;
                let embedding_bytes: Vec<u8> = row.get(3)?;
                Ok((id, document, metadata_json, embedding_bytes))
            })
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, document, metadata_json, embedding_bytes) =
                row.map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            out.push((id, document, metadata, decode_embedding(&embedding_bytes)));
        }
        Ok(out)
    }
}

impl VectorStore for SqliteVectorStore {
    fn add(&self, documents: &[String], metadatas: &[Metadata], ids: &[String]) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        for ((document, metadata), id) in documents.iter().zip(metadatas).zip(ids) {
            let embedding = self
                .embedder
                .embed(document)
                .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
            let metadata_json = serde_json::to_string(metadata)
                .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO memory_records (id, document, metadata, embedding) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, document, metadata_json, encode_embedding(&embedding)],
            )
            .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn query(
        &self,
        texts: &[String],
        k: usize,
        where_filter: Option<&Metadata>,
    ) -> Result<QueryResult> {
        let Some(query_text) = texts.first() else {
            return Ok(QueryResult::default());
        };
        let query_embedding = self
            .embedder
            .embed(query_text)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let rows = self.fetch_all(&conn)?;

        let mut scored: Vec<(String, String, Metadata, f32)> = rows
            .into_iter()
            .filter(|(_, _, metadata, _)| matches_filter(metadata, where_filter))
            .map(|(id, document, metadata, embedding)| {
                let similarity = cosine_similarity(&query_embedding, &embedding);
                (id, document, metadata, similarity)
            })
            .collect();

        scored.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut result = QueryResult::default();
        for (id, document, metadata, similarity) in scored {
            result.ids.push(id);
            result.documents.push(document);
            result.metadatas.push(metadata);
            result.distances.push(1.0 - similarity);
        }
        Ok(result)
    }

    fn get(&self, ids: Option<&[String]>) -> Result<GetResult> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let rows = self.fetch_all(&conn)?;
        let mut result = GetResult::default();
        for (id, document, metadata, _) in rows {
            if let Some(wanted) = ids {
                if !wanted.contains(&id) {
                    continue;
                }
            }
            result.ids.push(id);
            result.documents.push(document);
            result.metadatas.push(metadata);
        }
        Ok(result)
    }

    fn update(&self, ids: &[String], metadatas: &[Metadata]) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        for (id, metadata) in ids.iter().zip(metadatas) {
            let metadata_json = serde_json::to_string(metadata)
                .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
            conn.execute(
                "UPDATE memory_records SET metadata = ?1 WHERE id = ?2",
                rusqlite::params![metadata_json, id],
            )
            .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        for id in ids {
            conn.execute(
                "DELETE FROM memory_records WHERE id = ?1",
                rusqlite::params![id],
            )
            .map_err(|e| StoreError::StoreFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_records", [], |row| row.get(0))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn meta(source: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("source".to_string(), serde_json::json!(source));
        m
    }

    #[test]
    fn add_then_query_finds_the_record() {
        let store = SqliteVectorStore::open_in_memory(Arc::new(HashEmbedder::default())).unwrap();
        store
            .add(
                &["the quick brown fox".to_string()],
                &[meta("screen")],
                &["id1".to_string()],
            )
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let result = store
            .query(&["quick brown fox".to_string()], 5, None)
            .unwrap();
        assert!(result.ids.contains(&"id1".to_string()));
    }

    #[test]
    fn where_filter_excludes_non_matching_metadata() {
        let store = SqliteVectorStore::open_in_memory(Arc::new(HashEmbedder::default())).unwrap();
        store
            .add(
                &["hello".to_string(), "world".to_string()],
                &[meta("audio"), meta("screen")],
                &["a".to_string(), "b".to_string()],
            )
            .unwrap();

        let mut filter = Metadata::new();
        filter.insert("source".to_string(), serde_json::json!("screen"));
        let result = store.query(&["hello world".to_string()], 5, Some(&filter)).unwrap();
        assert_eq!(result.ids, vec!["b".to_string()]);
    }

    #[test]
    fn delete_removes_record() {
        let store = SqliteVectorStore::open_in_memory(Arc::new(HashEmbedder::default())).unwrap();
        store
            .add(&["text".to_string()], &[meta("audio")], &["id1".to_string()])
            .unwrap();
        store.delete(&["id1".to_string()]).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
