//! Event bus abstraction and the outbound-frame vocabulary delivered to
//! subscribers (§6 of the supervisor's external interface).
//!
//! This crate defines the `EventBus` trait for decoupled event emission, so
//! the core logic can be tested without a real network surface attached, and
//! the frame types the core emits over whatever transport the network
//! surface provides.

mod bus;

pub use bus::{EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};

use serde::{Deserialize, Serialize};

/// Outbound frames the supervisor emits to subscribers. Transcript frames
/// are unordered relative to each other; `Chat*`/`Auto*` frames for a given
/// stream are ordered `Start -> Chunk* -> Done` per subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Transcript { text: String, source: String },
    ChatStart,
    ChatChunk { content: String },
    ChatDone,
    AutoStart { question: String },
    AutoChunk { question: String, content: String },
    AutoDone { question: String },
}

/// Event topic names, mirrored as constants to avoid typos at call sites.
pub mod event_names {
    pub const TRANSCRIPT: &str = "listener:transcript";
    pub const CHAT_START: &str = "listener:chat_start";
    pub const CHAT_CHUNK: &str = "listener:chat_chunk";
    pub const CHAT_DONE: &str = "listener:chat_done";
    pub const AUTO_START: &str = "listener:auto_start";
    pub const AUTO_CHUNK: &str = "listener:auto_chunk";
    pub const AUTO_DONE: &str = "listener:auto_done";
}

impl OutboundFrame {
    pub fn topic(&self) -> &'static str {
        match self {
            OutboundFrame::Transcript { .. } => event_names::TRANSCRIPT,
            OutboundFrame::ChatStart => event_names::CHAT_START,
            OutboundFrame::ChatChunk { .. } => event_names::CHAT_CHUNK,
            OutboundFrame::ChatDone => event_names::CHAT_DONE,
            OutboundFrame::AutoStart { .. } => event_names::AUTO_START,
            OutboundFrame::AutoChunk { .. } => event_names::AUTO_CHUNK,
            OutboundFrame::AutoDone { .. } => event_names::AUTO_DONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_topics_are_distinct() {
        let frames = [
            OutboundFrame::Transcript {
                text: "hi".into(),
                source: "mic".into(),
            },
            OutboundFrame::ChatStart,
            OutboundFrame::AutoDone {
                question: "q".into(),
            },
        ];
        let topics: std::collections::HashSet<_> = frames.iter().map(|f| f.topic()).collect();
        assert_eq!(topics.len(), 3);
    }

    #[test]
    fn frame_serializes_with_type_tag() {
        let frame = OutboundFrame::AutoChunk {
            question: "q".into(),
            content: "c".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "auto_chunk");
        assert_eq!(json["content"], "c");
    }
}
