use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gibberish_audio::AudioSupervisor;
use gibberish_events::{EventBusRef, OutboundFrame};
use gibberish_llm::{LlmClient, LlmProvider};
use gibberish_memory::MemoryService;
use gibberish_screen::{OcrEngine, ScreenCapture, ScreenLoop};
use gibberish_stt::SttEngine;
use gibberish_transcript::TranscriptRing;
use gibberish_vad::VoiceActivityDetector;
use image::RgbaImage;
use tokio::task::JoinHandle;

use crate::auto_answer::AutoAnswerController;
use crate::config::RuntimeConfig;
use crate::dispatcher::TranscriptDispatcher;
use crate::subscribers::SubscriberGuard;
use crate::subscribers::SubscriberRegistry;
use crate::CoreError;

/// C9: owns the lifetime of every service (C1–C8), the shared mutable state
/// spec.md §5 enumerates, and the external callback registrations. Each
/// service was constructed with only the narrow collaborator references it
/// needs (spec.md §9); the supervisor is the only thing holding all of
/// them together.
pub struct Supervisor {
    audio: Arc<AudioSupervisor>,
    screen: Arc<ScreenLoop>,
    memory: Option<Arc<MemoryService>>,
    llm: Arc<LlmClient>,
    dispatcher: Arc<TranscriptDispatcher>,
    auto_answer: Arc<AutoAnswerController>,
    subscribers: Arc<SubscriberRegistry>,
    event_bus: EventBusRef,
    recording: Arc<AtomicBool>,
    auto_answer_enabled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RuntimeConfig,
        stt: Arc<dyn SttEngine>,
        vad_factory: impl Fn() -> Box<dyn VoiceActivityDetector> + Send + Sync + 'static,
        screen_capture: Arc<dyn ScreenCapture>,
        ocr: Arc<dyn OcrEngine>,
        memory: Option<Arc<MemoryService>>,
        llm_provider: Option<Arc<dyn LlmProvider>>,
        event_bus: EventBusRef,
    ) -> Arc<Self> {
        let ring = Arc::new(Mutex::new(TranscriptRing::new(config.transcript_ring_capacity)));
        let screen = Arc::new(ScreenLoop::new(screen_capture, ocr, config.screen));
        let llm = Arc::new(LlmClient::new(llm_provider, memory.clone(), config.llm));
        let subscribers = Arc::new(SubscriberRegistry::new());
        let auto_answer_enabled = Arc::new(AtomicBool::new(config.auto_answer.enabled));
        let recording = Arc::new(AtomicBool::new(false));

        let auto_answer = Arc::new(AutoAnswerController::new(
            ring.clone(),
            screen.clone(),
            llm.clone(),
            event_bus.clone(),
            subscribers.clone(),
            auto_answer_enabled.clone(),
            config.auto_answer.cooldown,
            config.auto_answer.context_window,
            config.auto_answer.screen_truncate,
        ));

        let dispatcher = Arc::new(TranscriptDispatcher::new(
            ring,
            memory.clone(),
            event_bus.clone(),
            auto_answer.clone(),
            recording.clone(),
            config.word_count_threshold,
            config.auto_answer.min_question_length,
            config.auto_answer.other_party_sources,
        ));

        let dispatcher_for_audio = dispatcher.clone();
        let audio = Arc::new(AudioSupervisor::new(
            config.audio,
            stt,
            vad_factory,
            move |text, source| dispatcher_for_audio.ingest(text, source),
        ));

        Arc::new(Self {
            audio,
            screen,
            memory,
            llm,
            dispatcher,
            auto_answer,
            subscribers,
            event_bus,
            recording,
            auto_answer_enabled,
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Idempotent: starts the audio supervisor and spawns the cooperative
    /// screen-loop and transcript-dispatcher tasks (spec.md §5). Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), CoreError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.audio.start().map_err(CoreError::Audio)?;

        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");

        let screen = self.screen.clone();
        let recording = self.recording.clone();
        let running = self.running.clone();
        let memory_for_screen = self.memory.clone();
        tasks.push(tokio::spawn(async move {
            screen
                .run(running, recording, move |text| {
                    if let Some(memory) = memory_for_screen.clone() {
                        tokio::spawn(async move {
                            let _ = tokio::task::spawn_blocking(move || memory.add(&text, "screen", None))
                                .await;
                        });
                    }
                })
                .await;
        }));

        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher.run(running).await;
        }));

        tracing::info!("supervisor started");
        Ok(())
    }

    /// Idempotent: signals every cooperative task and the audio supervisor,
    /// then awaits their termination (spec.md §5 "Cancellation & shutdown").
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.audio.stop();
        let handles: Vec<_> = self.tasks.lock().expect("tasks mutex poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("supervisor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// spec.md §6 `set_recording(bool)`.
    pub fn set_recording(&self, enabled: bool) {
        self.recording.store(enabled, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// spec.md §6 `set_auto_answer(bool)`.
    pub fn set_auto_answer(&self, enabled: bool) {
        self.auto_answer_enabled.store(enabled, Ordering::Release);
    }

    pub fn is_auto_answer_enabled(&self) -> bool {
        self.auto_answer_enabled.load(Ordering::Acquire)
    }

    /// spec.md §6 `get_recent_transcript(seconds)`.
    pub fn get_recent_transcript(&self, seconds: i64) -> String {
        self.dispatcher.recent_transcript(seconds)
    }

    /// spec.md §6 `latest_text`.
    pub fn latest_text(&self) -> String {
        self.screen.latest().map(|s| s.text).unwrap_or_default()
    }

    /// spec.md §6 `latest_image`.
    pub fn latest_image(&self) -> Option<Arc<RgbaImage>> {
        self.screen.latest().map(|s| s.image)
    }

    /// spec.md §6 `latest_transcript`.
    pub fn latest_transcript(&self) -> String {
        self.dispatcher.latest_transcript()
    }

    /// spec.md §6 "Register callbacks: on_transcript(text, source)".
    pub fn on_transcript(&self, callback: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.dispatcher.on_transcript(callback);
    }

    /// spec.md §6 "Register callbacks: on_question_detected(question)".
    pub fn on_question_detected(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.dispatcher.on_question_detected(callback);
    }

    /// A network surface registers here for the duration of a connection;
    /// dropping the guard un-registers it. Gates the auto-answer controller
    /// (spec.md §4.7 "at least one subscriber exists").
    pub fn register_subscriber(&self) -> SubscriberGuard {
        self.subscribers.register()
    }

    /// User-initiated chat (spec.md §6 outbound frames `start/chunk/done`),
    /// independent of the auto-answer stream (spec.md §9 design note (c):
    /// the two are two independent tasks writing to the same broadcast
    /// sink, never serialized against each other).
    pub async fn chat(&self, user_query: &str) {
        let context = self.get_recent_transcript(120);
        let image = self.latest_image();

        self.emit(OutboundFrame::ChatStart);

        match self.llm.analyze(&context, user_query, image.as_deref()) {
            Ok(mut stream) => {
                use futures::StreamExt;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(content) => self.emit(OutboundFrame::ChatChunk { content }),
                        Err(e) => {
                            tracing::warn!(error = %e, "chat stream error");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat LLM call failed");
            }
        }

        self.emit(OutboundFrame::ChatDone);
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
    use gibberish_screen::{FixedCapture, ScriptedOcr};
    use gibberish_stt::EchoEngine;
    use gibberish_vad::ScriptedVad;

    fn supervisor(event_bus: Arc<InMemoryEventBus>) -> Arc<Supervisor> {
        Supervisor::new(
            RuntimeConfig::default(),
            Arc::new(EchoEngine::new("echo")),
            || Box::new(ScriptedVad::new(vec![0.0])) as Box<dyn VoiceActivityDetector>,
            Arc::new(FixedCapture::new(4, 4, 1)),
            Arc::new(ScriptedOcr::new(vec!["".to_string()])),
            None,
            None,
            event_bus,
        )
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_drains_tasks() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let sup = supervisor(event_bus);

        assert!(sup.start().is_ok());
        let was_running = sup.is_running();
        assert!(sup.start().is_ok());
        assert_eq!(was_running, sup.is_running());

        sup.stop().await;
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn recording_and_auto_answer_flags_toggle() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let sup = supervisor(event_bus);

        assert!(!sup.is_recording());
        sup.set_recording(true);
        assert!(sup.is_recording());

        assert!(sup.is_auto_answer_enabled());
        sup.set_auto_answer(false);
        assert!(!sup.is_auto_answer_enabled());
    }

    #[tokio::test]
    async fn chat_emits_start_and_done_without_a_configured_provider() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let sup = supervisor(event_bus.clone());

        sup.chat("hello?").await;

        let events = event_bus.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic, "listener:chat_start");
        assert_eq!(events[1].topic, "listener:chat_done");
    }

    #[tokio::test]
    async fn transcript_callback_is_forwarded_through_to_dispatcher() {
        let event_bus = Arc::new(InMemoryEventBus::new());
        let sup = supervisor(event_bus);

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        sup.on_transcript(move |text, source| {
            *seen_clone.lock().unwrap() = Some((text.to_string(), source.to_string()));
        });

        sup.dispatcher.ingest("hello world".to_string(), "mic".to_string());

        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = sup.dispatcher.clone();
        let running_clone = running.clone();
        let handle = tokio::spawn(async move { dispatcher.run(running_clone).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        assert_eq!(
            *seen.lock().unwrap(),
            Some(("hello world".to_string(), "mic".to_string()))
        );
    }

    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn supervisor_is_send_and_sync() {
        assert_send_sync::<Supervisor>();
    }
}
