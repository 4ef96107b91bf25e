use crate::pool::ClientPool;
use crate::store::{Metadata, StoreError, VectorStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("empty input")]
    EmptyInput,
    #[error("memory store failed: {0}")]
    StoreFailed(String),
    #[error("memory query failed: {0}")]
    QueryFailed(String),
}

impl From<StoreError> for MemoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StoreFailed(msg) => MemoryError::StoreFailed(msg),
            StoreError::QueryFailed(msg) => MemoryError::QueryFailed(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Every knob spec.md §6 enumerates for the memory subsystem.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub query_default_k: usize,
    pub prune_threshold: usize,
    pub prune_keep: usize,
    pub protected_access_count: u64,
    pub recency_weight: f64,
    pub access_weight: f64,
    pub uniqueness_weight: f64,
    pub cluster_threshold: f64,
    pub dup_threshold: f64,
    pub pool_size: usize,
    pub pool_acquire_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            query_default_k: 5,
            prune_threshold: 10_000,
            prune_keep: 5_000,
            protected_access_count: 5,
            recency_weight: 0.25,
            access_weight: 0.50,
            uniqueness_weight: 0.25,
            cluster_threshold: 0.75,
            dup_threshold: 0.92,
            pool_size: 3,
            pool_acquire_timeout: Duration::from_millis(500),
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn metadata_i64(metadata: &Metadata, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|v| v.as_i64())
}

fn metadata_u64(metadata: &Metadata, key: &str, default: u64) -> u64 {
    metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

/// C5: embed, store, query, importance-prune, dedup. Access to the
/// underlying `VectorStore` is mediated by a bounded `ClientPool` (spec.md
/// §4.9 "Connection discipline").
pub struct MemoryService {
    pool: ClientPool<Arc<dyn VectorStore>>,
    config: MemoryConfig,
    seq: AtomicU64,
}

impl MemoryService {
    pub fn new(
        config: MemoryConfig,
        factory: impl Fn() -> Arc<dyn VectorStore> + Send + Sync + 'static,
    ) -> Self {
        let pool = ClientPool::new(config.pool_size, config.pool_acquire_timeout, factory);
        Self {
            pool,
            config,
            seq: AtomicU64::new(0),
        }
    }

    fn next_id(&self, source: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{source}_{}_{}_{seq}", now_ms(), std::process::id())
    }

    /// Rejects empty/whitespace text; assigns the id `{source}_{ms}_{worker}_{seq}`;
    /// triggers importance pruning if the post-insert count crosses
    /// `prune_threshold`.
    pub fn add(&self, text: &str, source: &str, metadata: Option<Metadata>) -> Result<String> {
        if text.trim().is_empty() {
            return Err(MemoryError::EmptyInput);
        }
        let id = self.build_record(text, source, metadata)?;
        self.maybe_prune()?;
        Ok(id)
    }

    /// Bulk insert. Items with empty/whitespace text are skipped (logged),
    /// not fatal for the rest of the batch.
    pub fn add_batch(&self, items: &[(String, String, Option<Metadata>)]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(items.len());
        for (text, source, metadata) in items {
            if text.trim().is_empty() {
                tracing::warn!(source, "skipping empty text in add_batch");
                continue;
            }
            ids.push(self.build_record(text, source, metadata.clone())?);
        }
        self.maybe_prune()?;
        Ok(ids)
    }

    fn build_record(&self, text: &str, source: &str, metadata: Option<Metadata>) -> Result<String> {
        let id = self.next_id(source);
        let mut meta = metadata.unwrap_or_default();
        let timestamp = metadata_i64(&meta, "timestamp").unwrap_or_else(now_ms);
        meta.insert("source".to_string(), json!(source));
        meta.insert("timestamp".to_string(), json!(timestamp));
        meta.insert("access_count".to_string(), json!(0));

        let client = self.pool.acquire();
        client.add(&[text.to_string()], &[meta], &[id.clone()])?;
        Ok(id)
    }

    fn maybe_prune(&self) -> Result<()> {
        let count = {
            let client = self.pool.acquire();
            client.count()?
        };
        if count > self.config.prune_threshold {
            self.prune_smart(self.config.prune_keep)?;
        }
        Ok(())
    }

    /// Semantic top-k query. Failures are non-fatal (returns empty list);
    /// every returned record's `access_count` is incremented by 1.
    pub fn query(&self, text: &str, k: usize, filter: Option<&Metadata>) -> Vec<String> {
        let client = self.pool.acquire();
        let result = match client.query(&[text.to_string()], k, filter) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "memory query failed");
                return Vec::new();
            }
        };

        let updated: Vec<Metadata> = result
            .metadatas
            .iter()
            .map(|m| {
                let mut m = m.clone();
                let count = metadata_u64(&m, "access_count", 0);
                m.insert("access_count".to_string(), json!(count + 1));
                m
            })
            .collect();
        if let Err(e) = client.update(&result.ids, &updated) {
            tracing::debug!(error = %e, "failed to update access counts");
        }
        result.documents
    }

    pub fn default_k(&self) -> usize {
        self.config.query_default_k
    }

    /// Importance-weighted pruning (spec.md §4.9). Protected records
    /// (`access_count >= protected_access_count`) are never eligible.
    pub fn prune_smart(&self, keep: usize) -> Result<usize> {
        let client = self.pool.acquire();
        let all = client.get(None)?;
        if all.ids.len() <= keep {
            return Ok(0);
        }

        let now = now_ms() as f64;
        let timestamps: Vec<f64> = all
            .metadatas
            .iter()
            .map(|m| metadata_i64(m, "timestamp").unwrap_or(0) as f64)
            .collect();
        let access_counts: Vec<u64> = all
            .metadatas
            .iter()
            .map(|m| metadata_u64(m, "access_count", 0))
            .collect();

        let min_ts = timestamps.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_age = (now - min_ts).max(1.0);
        let max_access = access_counts.iter().cloned().max().unwrap_or(1).max(1);

        let uniqueness = self.compute_uniqueness(&client, &all.ids, &all.documents)?;

        let mut pruneable: Vec<(String, f64)> = Vec::new();
        for (i, id) in all.ids.iter().enumerate() {
            let protected = access_counts[i] >= self.config.protected_access_count;
            if protected {
                continue;
            }
            let age = now - timestamps[i];
            let recency = if max_age > 0.0 { 1.0 - age / max_age } else { 1.0 };
            let access = access_counts[i] as f64 / max_access as f64;
            let uniq = *uniqueness.get(id).unwrap_or(&1.0);
            let score = self.config.recency_weight * recency
                + self.config.access_weight * access
                + self.config.uniqueness_weight * uniq;
            pruneable.push((id.clone(), score));
        }

        pruneable.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let target_delete = all.ids.len() - keep;
        let to_delete: Vec<String> = pruneable
            .into_iter()
            .take(target_delete)
            .map(|(id, _)| id)
            .collect();

        if !to_delete.is_empty() {
            client.delete(&to_delete)?;
            tracing::info!(deleted = to_delete.len(), "pruned memory records");
        }
        Ok(to_delete.len())
    }

    fn compute_uniqueness(
        &self,
        client: &crate::pool::PooledClient<Arc<dyn VectorStore>>,
        ids: &[String],
        documents: &[String],
    ) -> Result<HashMap<String, f64>> {
        let mut uniqueness: HashMap<String, f64> =
            ids.iter().map(|id| (id.clone(), 1.0)).collect();
        if ids.len() < 2 {
            return Ok(uniqueness);
        }

        let sample_size = ids.len().min(1000);
        for (id, doc) in ids.iter().zip(documents).take(sample_size) {
            if doc.trim().is_empty() {
                continue;
            }
            let neighbors = match client.query(&[doc.clone()], ids.len().min(10), None) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let distances: Vec<f64> = neighbors
                .distances
                .iter()
                .map(|&d| d as f64)
                .filter(|d| *d > 1e-3)
                .collect();
            if distances.is_empty() {
                continue;
            }
            let avg_dist = distances.iter().sum::<f64>() / distances.len() as f64;
            let denom = (1.0 - self.config.cluster_threshold).max(1e-6);
            uniqueness.insert(id.clone(), (avg_dist / denom).min(1.0));
        }
        Ok(uniqueness)
    }

    /// On-demand deduplication (spec.md §4.9). Samples the most recent
    /// records, and for neighbors with similarity >= threshold deletes the
    /// one with the lower `access_count` (ties broken by older timestamp).
    pub fn dedup(&self, sample_size: usize, threshold: Option<f64>) -> Result<usize> {
        let threshold = threshold.unwrap_or(self.config.dup_threshold);
        let client = self.pool.acquire();
        let all = client.get(None)?;
        if all.ids.len() < 2 {
            return Ok(0);
        }

        let mut indexed: Vec<(String, String, Metadata)> = all
            .ids
            .iter()
            .cloned()
            .zip(all.documents.iter().cloned())
            .zip(all.metadatas.iter().cloned())
            .map(|((id, doc), meta)| (id, doc, meta))
            .collect();
        indexed.sort_by(|a, b| {
            let ts_a = metadata_i64(&a.2, "timestamp").unwrap_or(0);
            let ts_b = metadata_i64(&b.2, "timestamp").unwrap_or(0);
            ts_b.cmp(&ts_a)
        });
        indexed.truncate(sample_size);

        let mut to_delete: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (id1, doc1, meta1) in &indexed {
            if to_delete.contains(id1) {
                continue;
            }
            let neighbors = match client.query(&[doc1.clone()], 5, None) {
                Ok(r) => r,
                Err(_) => continue,
            };
            for (rid, (rmeta, distance)) in neighbors
                .ids
                .iter()
                .zip(neighbors.metadatas.iter().zip(neighbors.distances.iter()))
            {
                if rid == id1 || to_delete.contains(rid) {
                    continue;
                }
                let similarity = 1.0 - *distance as f64;
                if similarity < threshold {
                    continue;
                }
                let access1 = metadata_u64(meta1, "access_count", 0);
                let access2 = metadata_u64(rmeta, "access_count", 0);
                let ts1 = metadata_i64(meta1, "timestamp").unwrap_or(0);
                let ts2 = metadata_i64(rmeta, "timestamp").unwrap_or(0);
                let victim = if access1 > access2 || (access1 == access2 && ts1 >= ts2) {
                    rid.clone()
                } else {
                    id1.clone()
                };
                to_delete.insert(victim);
            }
        }

        if to_delete.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = to_delete.into_iter().collect();
        client.delete(&ids)?;
        tracing::info!(deleted = ids.len(), "deduplicated memory records");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::sqlite::SqliteVectorStore;

    fn service_with_store() -> (MemoryService, Arc<dyn VectorStore>) {
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open_in_memory(Arc::new(HashEmbedder::default())).unwrap());
        let store_for_pool = store.clone();
        let config = MemoryConfig {
            pool_size: 1,
            ..Default::default()
        };
        let service = MemoryService::new(config, move || store_for_pool.clone());
        (service, store)
    }

    #[test]
    fn add_rejects_empty_text() {
        let (service, _store) = service_with_store();
        let err = service.add("   ", "mic", None).unwrap_err();
        assert!(matches!(err, MemoryError::EmptyInput));
    }

    #[test]
    fn add_then_query_roundtrips() {
        let (service, _store) = service_with_store();
        let id = service.add("the weather is nice today", "screen", None).unwrap();
        assert!(id.starts_with("screen_"));

        let results = service.query("the weather is nice today", 5, None);
        assert!(!results.is_empty());
    }

    #[test]
    fn s6_pruning_keeps_protected_records() {
        let (service, store) = service_with_store();
        let now = now_ms();
        let old = now - 1_000_000;

        let mut meta_a = Metadata::new();
        meta_a.insert("source".into(), json!("audio"));
        meta_a.insert("timestamp".into(), json!(old));
        meta_a.insert("access_count".into(), json!(10u64));

        let mut meta_b = Metadata::new();
        meta_b.insert("source".into(), json!("audio"));
        meta_b.insert("timestamp".into(), json!(old));
        meta_b.insert("access_count".into(), json!(5u64));

        let mut meta_c = Metadata::new();
        meta_c.insert("source".into(), json!("audio"));
        meta_c.insert("timestamp".into(), json!(now));
        meta_c.insert("access_count".into(), json!(4u64));

        store
            .add(
                &["entry a".into(), "entry b".into(), "entry c".into()],
                &[meta_a, meta_b, meta_c],
                &["A".into(), "B".into(), "C".into()],
            )
            .unwrap();

        let deleted = service.prune_smart(2).unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.get(None).unwrap();
        let mut remaining_ids = remaining.ids;
        remaining_ids.sort();
        assert_eq!(remaining_ids, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn prune_is_a_noop_under_keep_threshold() {
        let (service, _store) = service_with_store();
        service.add("only one record", "audio", None).unwrap();
        let deleted = service.prune_smart(5000).unwrap();
        assert_eq!(deleted, 0);
    }
}
