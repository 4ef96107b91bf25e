use gibberish_events::{EventBusRef, OutboundFrame};
use gibberish_llm::{truncate, LlmClient};
use gibberish_screen::ScreenLoop;
use gibberish_transcript::TranscriptRing;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::subscribers::SubscriberRegistry;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// C7: cooldown-gated LLM stream fired on a detected question (spec.md
/// §4.7). Depends only on the narrow pieces it needs at construction time
/// (the shared transcript ring, the screen loop's latest snapshot, the LLM
/// client, the outbound event bus and the subscriber count) rather than the
/// supervisor itself, per spec.md §9's constructor-injection resolution of
/// the cyclic supervisor/service reference.
pub struct AutoAnswerController {
    ring: Arc<Mutex<TranscriptRing>>,
    screen: Arc<ScreenLoop>,
    llm: Arc<LlmClient>,
    event_bus: EventBusRef,
    subscribers: Arc<SubscriberRegistry>,
    enabled: Arc<AtomicBool>,
    cooldown_ms: i64,
    context_window_secs: i64,
    screen_truncate: usize,
    last_fired_ms: AtomicI64,
}

impl AutoAnswerController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ring: Arc<Mutex<TranscriptRing>>,
        screen: Arc<ScreenLoop>,
        llm: Arc<LlmClient>,
        event_bus: EventBusRef,
        subscribers: Arc<SubscriberRegistry>,
        enabled: Arc<AtomicBool>,
        cooldown: Duration,
        context_window: Duration,
        screen_truncate: usize,
    ) -> Self {
        Self {
            ring,
            screen,
            llm,
            event_bus,
            subscribers,
            enabled,
            cooldown_ms: cooldown.as_millis() as i64,
            context_window_secs: context_window.as_secs() as i64,
            screen_truncate,
            // Far enough in the past that the very first question always
            // clears the cooldown check.
            last_fired_ms: AtomicI64::new(i64::MIN / 2),
        }
    }

    /// Fires an auto-answer for `question` unless disabled, unsubscribed,
    /// or still inside the cooldown window (spec.md §4.7, testable property
    /// 5). A `Done` frame is always emitted once a `Start` frame has gone
    /// out, even if the LLM stream itself errors (spec.md §7).
    pub async fn trigger(&self, question: String) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        if !self.subscribers.has_subscribers() {
            return;
        }
        if !self.try_claim_cooldown() {
            return;
        }

        let context = self.build_context();
        let image = self.screen.latest().map(|s| s.image);

        self.emit(OutboundFrame::AutoStart {
            question: question.clone(),
        });

        match self.llm.analyze(&context, &question, image.as_deref()) {
            Ok(mut stream) => {
                use futures::StreamExt;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(content) => self.emit(OutboundFrame::AutoChunk {
                            question: question.clone(),
                            content,
                        }),
                        Err(e) => {
                            tracing::warn!(error = %e, "auto-answer stream error");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "auto-answer LLM call failed");
            }
        }

        self.emit(OutboundFrame::AutoDone { question });
    }

    /// Compare-exchange on `last_fired_ms` so two concurrently detected
    /// questions can't both pass the cooldown gate (spec.md §8 testable
    /// property 5).
    fn try_claim_cooldown(&self) -> bool {
        let now = now_ms();
        loop {
            let last = self.last_fired_ms.load(Ordering::Acquire);
            if now - last < self.cooldown_ms {
                return false;
            }
            if self
                .last_fired_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// spec.md §4.7 step 2: recent transcript plus truncated screen text;
    /// `"No context available."` when both are empty.
    fn build_context(&self) -> String {
        let transcript = self
            .ring
            .lock()
            .expect("transcript ring mutex poisoned")
            .recent_since(now_ms(), self.context_window_secs);
        let screen_text = self
            .screen
            .latest()
            .map(|s| truncate(&s.text, self.screen_truncate))
            .unwrap_or_default();

        let mut parts = Vec::new();
        if !transcript.is_empty() {
            parts.push(format!("RECENT CONVERSATION:\n{transcript}"));
        }
        if !screen_text.is_empty() {
            parts.push(format!("SCREEN TEXT:\n{screen_text}"));
        }
        if parts.is_empty() {
            "No context available.".to_string()
        } else {
            parts.join("\n\n")
        }
    }

    fn emit(&self, frame: OutboundFrame) {
        let payload = serde_json::to_value(&frame).unwrap_or(serde_json::Value::Null);
        self.event_bus.emit(frame.topic(), payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gibberish_events::InMemoryEventBus;
    use gibberish_llm::LlmConfig;
    use gibberish_screen::{FixedCapture, ScreenLoopConfig};
    use gibberish_transcript::TranscriptItem;

    fn controller(
        event_bus: Arc<InMemoryEventBus>,
        subscribers: Arc<SubscriberRegistry>,
    ) -> AutoAnswerController {
        controller_with_enabled(event_bus, subscribers, true)
    }

    fn controller_with_enabled(
        event_bus: Arc<InMemoryEventBus>,
        subscribers: Arc<SubscriberRegistry>,
        enabled: bool,
    ) -> AutoAnswerController {
        let ring = Arc::new(Mutex::new(TranscriptRing::new(30)));
        let capture = Arc::new(FixedCapture::new(4, 4, 1));
        let ocr = Arc::new(gibberish_screen::ScriptedOcr::new(vec!["".to_string()]));
        let screen = Arc::new(ScreenLoop::new(capture, ocr, ScreenLoopConfig::default()));
        let llm = Arc::new(LlmClient::new(None, None, LlmConfig::default()));

        AutoAnswerController::new(
            ring,
            screen,
            llm,
            event_bus,
            subscribers,
            Arc::new(AtomicBool::new(enabled)),
            Duration::from_secs(10),
            Duration::from_secs(120),
            2000,
        )
    }

    #[tokio::test]
    async fn skips_silently_with_no_subscribers() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let ctrl = controller(event_bus.clone(), subscribers);

        ctrl.trigger("Is this a question?".to_string()).await;
        assert!(event_bus.is_empty());
    }

    #[tokio::test]
    async fn disabled_skips_even_with_subscribers() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let _guard = subscribers.register();
        let ctrl = controller_with_enabled(event_bus.clone(), subscribers, false);

        ctrl.trigger("Is this a question?".to_string()).await;
        assert!(event_bus.is_empty());
    }

    #[tokio::test]
    async fn emits_start_and_done_even_without_a_configured_provider() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let _guard = subscribers.register();
        let ctrl = controller(event_bus.clone(), subscribers);

        ctrl.trigger("Is this a question?".to_string()).await;

        let events = event_bus.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic, "listener:auto_start");
        assert_eq!(events[1].topic, "listener:auto_done");
    }

    #[tokio::test]
    async fn s4_cooldown_blocks_a_second_trigger_within_the_window() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let _guard = subscribers.register();
        let ctrl = controller(event_bus.clone(), subscribers);

        ctrl.trigger("First question here?".to_string()).await;
        ctrl.trigger("Second question here?".to_string()).await;

        let starts = event_bus.events_for("listener:auto_start");
        assert_eq!(starts.len(), 1);
    }

    #[test]
    fn build_context_falls_back_when_empty() {
        let ring = Arc::new(Mutex::new(TranscriptRing::new(30)));
        let capture = Arc::new(FixedCapture::new(4, 4, 1));
        let ocr = Arc::new(gibberish_screen::ScriptedOcr::new(vec!["".to_string()]));
        let screen = Arc::new(ScreenLoop::new(capture, ocr, ScreenLoopConfig::default()));
        let llm = Arc::new(LlmClient::new(None, None, LlmConfig::default()));
        let ctrl = AutoAnswerController::new(
            ring.clone(),
            screen,
            llm,
            Arc::new(InMemoryEventBus::new()),
            Arc::new(SubscriberRegistry::new()),
            Arc::new(AtomicBool::new(true)),
            Duration::from_secs(10),
            Duration::from_secs(120),
            2000,
        );
        assert_eq!(ctrl.build_context(), "No context available.");

        ring.lock().unwrap().push(TranscriptItem {
            ts_ms: now_ms(),
            text: "hello there".to_string(),
            source: "mic".to_string(),
        });
        assert!(ctrl.build_context().contains("RECENT CONVERSATION"));
    }
}
