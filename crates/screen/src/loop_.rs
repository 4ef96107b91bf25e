use crate::capture::ScreenCapture;
use crate::gate::StabilityGate;
use crate::hash::perceptual_hash;
use crate::ocr::OcrEngine;
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ScreenLoopConfig {
    pub capture_interval: Duration,
    pub hash_match_sleep: Duration,
    pub phash_grid: (u32, u32),
    pub stable_count_threshold: u32,
    pub min_text_length: usize,
}

impl Default for ScreenLoopConfig {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_secs(1),
            hash_match_sleep: Duration::from_millis(500),
            phash_grid: (32, 32),
            stable_count_threshold: 2,
            min_text_length: 50,
        }
    }
}

/// The latest self-consistent (image, text) pair. Written once per cycle
/// under a single lock so readers never observe text from snapshot *t*
/// paired with the image from snapshot *t-1* (spec.md §3 invariant) — a
/// stronger guarantee than the Python reference, which updates
/// `latest_image` before OCR completes and can briefly pair a new image
/// with stale text.
#[derive(Debug, Clone)]
pub struct LatestScreen {
    pub image: Arc<RgbaImage>,
    pub text: String,
    pub captured_at_ms: i64,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// C4: capture -> hash-debounce -> OCR -> stability gate -> emit.
pub struct ScreenLoop {
    capture: Arc<dyn ScreenCapture>,
    ocr: Arc<dyn OcrEngine>,
    config: ScreenLoopConfig,
    latest: Mutex<Option<LatestScreen>>,
}

impl ScreenLoop {
    pub fn new(capture: Arc<dyn ScreenCapture>, ocr: Arc<dyn OcrEngine>, config: ScreenLoopConfig) -> Self {
        Self {
            capture,
            ocr,
            config,
            latest: Mutex::new(None),
        }
    }

    pub fn latest(&self) -> Option<LatestScreen> {
        self.latest.lock().expect("latest screen mutex poisoned").clone()
    }

    /// Runs until `running` is cleared. `recording` gates memory writes;
    /// `on_stable_text` is invoked with a stable, sufficiently-long,
    /// not-yet-stored OCR text to be persisted as a memory record.
    pub async fn run(
        &self,
        running: Arc<AtomicBool>,
        recording: Arc<AtomicBool>,
        on_stable_text: impl Fn(String) + Send + Sync,
    ) {
        let mut last_hash: Option<u64> = None;
        let mut gate = StabilityGate::new();

        while running.load(Ordering::Acquire) {
            let image = match self.capture.capture_primary() {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(error = %e, "screen capture failed");
                    tokio::time::sleep(self.config.capture_interval).await;
                    continue;
                }
            };

            let hash = perceptual_hash(&image, self.config.phash_grid.0, self.config.phash_grid.1);
            if last_hash == Some(hash) {
                tokio::time::sleep(self.config.hash_match_sleep).await;
                continue;
            }
            last_hash = Some(hash);

            // OCR runs off the main loop thread (spec.md §4.4 step 3): the
            // Tesseract-backed engine is CPU-bound and would otherwise stall
            // every other cooperative task sharing this executor.
            let ocr = self.ocr.clone();
            let ocr_image = image.clone();
            let text = match tokio::task::spawn_blocking(move || ocr.extract_text(&ocr_image)).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "OCR extraction failed");
                    tokio::time::sleep(self.config.capture_interval).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "OCR task panicked");
                    tokio::time::sleep(self.config.capture_interval).await;
                    continue;
                }
            };

            {
                let mut latest = self.latest.lock().expect("latest screen mutex poisoned");
                *latest = Some(LatestScreen {
                    image: Arc::new(image),
                    text: text.clone(),
                    captured_at_ms: now_ms(),
                });
            }

            let should_persist = gate.observe(
                &text,
                recording.load(Ordering::Acquire),
                self.config.stable_count_threshold,
                self.config.min_text_length,
            );
            if should_persist {
                on_stable_text(text);
            }

            tokio::time::sleep(self.config.capture_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FixedCapture;
    use crate::ocr::ScriptedOcr;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn latest_pairs_image_and_text_from_the_same_cycle() {
        let capture = Arc::new(FixedCapture::new(8, 8, 1));
        let ocr = Arc::new(ScriptedOcr::new(vec!["first reading".repeat(5)]));
        let config = ScreenLoopConfig {
            capture_interval: Duration::from_millis(5),
            hash_match_sleep: Duration::from_millis(1),
            phash_grid: (4, 4),
            ..ScreenLoopConfig::default()
        };
        let screen_loop = Arc::new(ScreenLoop::new(capture, ocr, config));
        let running = Arc::new(AtomicBool::new(true));
        let recording = Arc::new(AtomicBool::new(false));

        let running_clone = running.clone();
        let loop_clone = screen_loop.clone();
        let handle = tokio::spawn(async move {
            loop_clone.run(running_clone, recording, |_text| {}).await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        let latest = screen_loop.latest().expect("a cycle should have completed");
        assert!(latest.text.starts_with("first reading"));
    }

    #[tokio::test]
    async fn ocr_failure_skips_the_update_without_panicking() {
        struct FailingOcr;
        impl OcrEngine for FailingOcr {
            fn extract_text(&self, _image: &RgbaImage) -> crate::Result<String> {
                Err(crate::ScreenError::OcrExtractFailed("boom".to_string()))
            }
        }

        let capture = Arc::new(FixedCapture::new(8, 8, 1));
        let ocr = Arc::new(FailingOcr);
        let config = ScreenLoopConfig {
            capture_interval: Duration::from_millis(5),
            ..ScreenLoopConfig::default()
        };
        let screen_loop = Arc::new(ScreenLoop::new(capture, ocr, config));
        let running = Arc::new(AtomicBool::new(true));
        let recording = Arc::new(AtomicBool::new(true));
        let writes: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let writes_clone = writes.clone();

        let running_clone = running.clone();
        let loop_clone = screen_loop.clone();
        let handle = tokio::spawn(async move {
            loop_clone
                .run(running_clone, recording, move |text| {
                    writes_clone.lock().unwrap().push(text);
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        running.store(false, Ordering::Release);
        let _ = handle.await;

        assert!(screen_loop.latest().is_none());
        assert!(writes.lock().unwrap().is_empty());
    }
}
