use gibberish_events::{EventBusRef, OutboundFrame};
use gibberish_memory::MemoryService;
use gibberish_transcript::{TranscriptItem, TranscriptRing};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::auto_answer::AutoAnswerController;
use crate::question::is_question;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

type TranscriptCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
type QuestionCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// C6: consumes a serialized stream of `(text, source)` items from C3 and
/// C4, appends to the recent-transcript ring, persists significant items to
/// memory, detects questions addressed to the user and always broadcasts
/// (spec.md §4.5). Holds a one-directional dependency on the
/// `AutoAnswerController` (C7) — C7 never depends back on the dispatcher,
/// only on the transcript ring it shares with it (spec.md §9 constructor
/// injection, avoiding the supervisor/service cycle).
pub struct TranscriptDispatcher {
    ring: Arc<Mutex<TranscriptRing>>,
    memory: Option<Arc<MemoryService>>,
    event_bus: EventBusRef,
    auto_answer: Arc<AutoAnswerController>,
    recording: Arc<AtomicBool>,
    word_count_threshold: usize,
    min_question_length: usize,
    other_party_sources: HashSet<String>,
    latest_transcript: Mutex<String>,
    on_transcript: Mutex<Option<TranscriptCallback>>,
    on_question_detected: Mutex<Option<QuestionCallback>>,
    tx: mpsc::UnboundedSender<(String, String)>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<(String, String)>>>,
}

impl TranscriptDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ring: Arc<Mutex<TranscriptRing>>,
        memory: Option<Arc<MemoryService>>,
        event_bus: EventBusRef,
        auto_answer: Arc<AutoAnswerController>,
        recording: Arc<AtomicBool>,
        word_count_threshold: usize,
        min_question_length: usize,
        other_party_sources: HashSet<String>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ring,
            memory,
            event_bus,
            auto_answer,
            recording,
            word_count_threshold,
            min_question_length,
            other_party_sources,
            latest_transcript: Mutex::new(String::new()),
            on_transcript: Mutex::new(None),
            on_question_detected: Mutex::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Entry point for C3/C4 (`(text, source) -> Transcript Dispatcher`).
    /// Safe to call from any thread; queues the item, preserving arrival
    /// order, for the dispatcher's own cooperative task to drain.
    pub fn ingest(&self, text: String, source: String) {
        let _ = self.tx.send((text, source));
    }

    /// Registers the external "live broadcast" callback (spec.md §6
    /// `on_transcript(text, source)`).
    pub fn on_transcript(&self, callback: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.on_transcript.lock().expect("callback mutex poisoned") = Some(Arc::new(callback));
    }

    /// Registers the external question-notification callback (spec.md §6
    /// `on_question_detected(question)`), invoked alongside (not instead
    /// of) the internal auto-answer trigger.
    pub fn on_question_detected(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self
            .on_question_detected
            .lock()
            .expect("callback mutex poisoned") = Some(Arc::new(callback));
    }

    pub fn latest_transcript(&self) -> String {
        self.latest_transcript
            .lock()
            .expect("latest transcript mutex poisoned")
            .clone()
    }

    /// spec.md §6 `get_recent_transcript(seconds)`.
    pub fn recent_transcript(&self, seconds: i64) -> String {
        self.ring
            .lock()
            .expect("transcript ring mutex poisoned")
            .recent_since(now_ms(), seconds)
    }

    /// Runs until `running` clears, draining items in FIFO arrival order
    /// (spec.md §5: no cross-device ordering is promised; the dispatcher
    /// handles arrival order).
    pub async fn run(&self, running: Arc<AtomicBool>) {
        let mut rx = self
            .rx
            .lock()
            .expect("receiver mutex poisoned")
            .take()
            .expect("TranscriptDispatcher::run called more than once");

        while running.load(Ordering::Acquire) {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some((text, source))) => self.process(text, source).await,
                Ok(None) => break,
                Err(_) => continue,
            }
        }
    }

    async fn process(&self, text: String, source: String) {
        *self
            .latest_transcript
            .lock()
            .expect("latest transcript mutex poisoned") = text.clone();

        self.ring
            .lock()
            .expect("transcript ring mutex poisoned")
            .push(TranscriptItem {
                ts_ms: now_ms(),
                text: text.clone(),
                source: source.clone(),
            });

        if self.recording.load(Ordering::Acquire)
            && text.split_whitespace().count() >= self.word_count_threshold
        {
            if let Some(memory) = self.memory.clone() {
                let stored = format!("{}: {}", source.to_uppercase(), text);
                let result =
                    tokio::task::spawn_blocking(move || memory.add(&stored, "audio", None)).await;
                if let Ok(Err(e)) = result {
                    tracing::warn!(error = %e, "failed to persist transcript to memory");
                }
            }
        }

        if self.other_party_sources.contains(&source) && is_question(&text, self.min_question_length) {
            tracing::info!(source = %source, "question detected");
            let callback = self
                .on_question_detected
                .lock()
                .expect("callback mutex poisoned")
                .clone();
            if let Some(callback) = callback {
                callback(&text);
            }
            let auto_answer = self.auto_answer.clone();
            let question = text.clone();
            tokio::spawn(async move {
                auto_answer.trigger(question).await;
            });
        }

        let callback = self
            .on_transcript
            .lock()
            .expect("callback mutex poisoned")
            .clone();
        if let Some(callback) = callback {
            callback(&text, &source);
        }

        let frame = OutboundFrame::Transcript { text, source };
        let payload = serde_json::to_value(&frame).unwrap_or(serde_json::Value::Null);
        self.event_bus.emit(frame.topic(), payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gibberish_events::InMemoryEventBus;
    use gibberish_llm::{LlmClient, LlmConfig};
    use gibberish_screen::{FixedCapture, ScreenLoop, ScreenLoopConfig, ScriptedOcr};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration as StdDuration;

    use crate::subscribers::SubscriberRegistry;

    fn make_dispatcher(
        event_bus: Arc<InMemoryEventBus>,
        memory: Option<Arc<MemoryService>>,
        recording: Arc<AtomicBool>,
        other_party_sources: HashSet<String>,
    ) -> Arc<TranscriptDispatcher> {
        let ring = Arc::new(Mutex::new(TranscriptRing::new(30)));
        let capture = Arc::new(FixedCapture::new(4, 4, 1));
        let ocr = Arc::new(ScriptedOcr::new(vec!["".to_string()]));
        let screen = Arc::new(ScreenLoop::new(capture, ocr, ScreenLoopConfig::default()));
        let llm = Arc::new(LlmClient::new(None, None, LlmConfig::default()));
        let auto_answer = Arc::new(AutoAnswerController::new(
            ring.clone(),
            screen,
            llm,
            event_bus.clone(),
            Arc::new(SubscriberRegistry::new()),
            Arc::new(AtomicBool::new(true)),
            StdDuration::from_secs(10),
            StdDuration::from_secs(120),
            2000,
        ));

        Arc::new(TranscriptDispatcher::new(
            ring,
            memory,
            event_bus,
            auto_answer,
            recording,
            4,
            10,
            other_party_sources,
        ))
    }

    #[tokio::test]
    async fn ingest_updates_ring_and_broadcasts() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = make_dispatcher(
            event_bus.clone(),
            None,
            Arc::new(AtomicBool::new(false)),
            ["system".to_string()].into_iter().collect(),
        );

        let running = Arc::new(AtomicBool::new(true));
        let dispatcher_clone = dispatcher.clone();
        let running_clone = running.clone();
        let handle = tokio::spawn(async move { dispatcher_clone.run(running_clone).await });

        dispatcher.ingest("hello there friend".to_string(), "mic".to_string());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        assert_eq!(dispatcher.latest_transcript(), "hello there friend");
        assert_eq!(event_bus.events_for("listener:transcript").len(), 1);
    }

    #[tokio::test]
    async fn recording_off_skips_memory_write() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let store: Arc<dyn gibberish_memory::VectorStore> = Arc::new(
            gibberish_memory::SqliteVectorStore::open_in_memory(Arc::new(
                gibberish_memory::HashEmbedder::default(),
            ))
            .unwrap(),
        );
        let store_for_pool = store.clone();
        let memory = Arc::new(MemoryService::new(Default::default(), move || {
            store_for_pool.clone()
        }));

        let dispatcher = make_dispatcher(
            event_bus,
            Some(memory),
            Arc::new(AtomicBool::new(false)),
            ["system".to_string()].into_iter().collect(),
        );

        let running = Arc::new(AtomicBool::new(true));
        let dispatcher_clone = dispatcher.clone();
        let running_clone = running.clone();
        let handle = tokio::spawn(async move { dispatcher_clone.run(running_clone).await });

        dispatcher.ingest("a reasonably long transcript line".to_string(), "system".to_string());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn question_from_mic_is_not_auto_answer_eligible_by_default() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = make_dispatcher(
            event_bus.clone(),
            None,
            Arc::new(AtomicBool::new(false)),
            ["system".to_string()].into_iter().collect(),
        );

        let question_seen = Arc::new(Mutex::new(false));
        let seen_clone = question_seen.clone();
        dispatcher.on_question_detected(move |_q| {
            *seen_clone.lock().unwrap() = true;
        });

        let running = Arc::new(AtomicBool::new(true));
        let dispatcher_clone = dispatcher.clone();
        let running_clone = running.clone();
        let handle = tokio::spawn(async move { dispatcher_clone.run(running_clone).await });

        dispatcher.ingest("What do you think about this?".to_string(), "mic".to_string());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        assert!(!*question_seen.lock().unwrap());
    }

    #[tokio::test]
    async fn question_from_system_notifies_callback() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = make_dispatcher(
            event_bus.clone(),
            None,
            Arc::new(AtomicBool::new(false)),
            ["system".to_string()].into_iter().collect(),
        );

        let question_seen = Arc::new(Mutex::new(false));
        let seen_clone = question_seen.clone();
        dispatcher.on_question_detected(move |_q| {
            *seen_clone.lock().unwrap() = true;
        });

        let running = Arc::new(AtomicBool::new(true));
        let dispatcher_clone = dispatcher.clone();
        let running_clone = running.clone();
        let handle = tokio::spawn(async move { dispatcher_clone.run(running_clone).await });

        dispatcher.ingest("What do you think about this?".to_string(), "system".to_string());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        assert!(*question_seen.lock().unwrap());
    }

    #[tokio::test]
    async fn s7_recent_transcript_window() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = make_dispatcher(
            event_bus,
            None,
            Arc::new(AtomicBool::new(false)),
            ["system".to_string()].into_iter().collect(),
        );
        dispatcher.ring.lock().unwrap().push(TranscriptItem {
            ts_ms: 0,
            text: "old".to_string(),
            source: "mic".to_string(),
        });
        dispatcher.ring.lock().unwrap().push(TranscriptItem {
            ts_ms: 200_000,
            text: "new".to_string(),
            source: "mic".to_string(),
        });
        assert_eq!(
            dispatcher.ring.lock().unwrap().recent_since(200_000, 60),
            "MIC: new"
        );
    }
}
