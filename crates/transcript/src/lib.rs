use serde::{Deserialize, Serialize};

/// One line in the recent-transcript buffer (§4.6): source tag, monotonic
/// timestamp, and the raw transcribed text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub ts_ms: i64,
    pub text: String,
    pub source: String,
}

impl TranscriptItem {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    pub fn formatted(&self) -> String {
        format!("{}: {}", self.source.to_uppercase(), self.text)
    }
}

/// Bounded, append-only ring of the last `capacity` transcript items.
/// Single writer (the transcript dispatcher); readers take a consistent
/// time-ordered snapshot via `recent_since`.
#[derive(Debug)]
pub struct TranscriptRing {
    capacity: usize,
    items: std::collections::VecDeque<TranscriptItem>,
}

impl TranscriptRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: TranscriptItem) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items with `ts_ms > now_ms - seconds * 1000`, in time order, rendered
    /// as `"{SRC}: {text}"` lines joined with `\n`.
    pub fn recent_since(&self, now_ms: i64, seconds: i64) -> String {
        let cutoff = now_ms - seconds * 1000;
        self.items
            .iter()
            .filter(|item| item.ts_ms > cutoff)
            .map(|item| item.formatted())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod ring_tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let mut ring = TranscriptRing::new(2);
        ring.push(TranscriptItem { ts_ms: 0, text: "a".into(), source: "mic".into() });
        ring.push(TranscriptItem { ts_ms: 1, text: "b".into(), source: "mic".into() });
        ring.push(TranscriptItem { ts_ms: 2, text: "c".into(), source: "mic".into() });
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.recent_since(3, 1000), "MIC: b\nMIC: c");
    }

    #[test]
    fn s7_recent_window_excludes_stale_items() {
        let mut ring = TranscriptRing::new(30);
        ring.push(TranscriptItem { ts_ms: 0, text: "old".into(), source: "mic".into() });
        ring.push(TranscriptItem {
            ts_ms: 200_000,
            text: "new".into(),
            source: "mic".into(),
        });
        let result = ring.recent_since(200_000, 60);
        assert_eq!(result, "MIC: new");
    }
}
