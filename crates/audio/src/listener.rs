use crossbeam_channel::Receiver;
use gibberish_vad::VoiceActivityDetector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Samples fed to the VAD per chunk (spec contract: 512 samples @ 16kHz mono).
pub const VAD_CHUNK_SAMPLES: usize = 512;

/// A contiguous speech region bounded by VAD transitions.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub source: String,
    pub pcm: Arc<[f32]>,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct VadGateConfig {
    pub vad_threshold: f32,
    pub max_silence_chunks: u32,
    pub min_utterance_samples: usize,
}

impl Default for VadGateConfig {
    fn default() -> Self {
        Self {
            vad_threshold: 0.5,
            max_silence_chunks: 15,
            // 0.5s at 16kHz
            min_utterance_samples: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Idle,
    Speaking,
}

/// Drives the Idle/Speaking VAD state machine for a single input device on
/// its own OS thread. Stereo input must already be downmixed to mono before
/// reaching this type (see `gibberish-audio::stream` mixer).
pub struct DeviceListener {
    source: String,
    config: VadGateConfig,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl DeviceListener {
    /// Spawns the capture/VAD thread. `raw_chunks` yields mono 16kHz float32
    /// samples of arbitrary length (as produced by the device callback);
    /// `emit` is called once per completed utterance.
    pub fn spawn(
        source: impl Into<String>,
        raw_chunks: Receiver<Vec<f32>>,
        mut vad: Box<dyn VoiceActivityDetector>,
        config: VadGateConfig,
        emit: impl Fn(Utterance) + Send + 'static,
    ) -> Self {
        let source = source.into();
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let thread_source = source.clone();

        let handle = std::thread::spawn(move || {
            let mut state = ListenerState::Idle;
            let mut pending: Vec<f32> = Vec::new();
            let mut speech_buffer: Vec<f32> = Vec::new();
            let mut silence_chunks: u32 = 0;
            let mut samples_seen: u64 = 0;
            let mut utterance_start_ms: u64 = 0;

            while running_thread.load(Ordering::Acquire) {
                let chunk = match raw_chunks.recv_timeout(Duration::from_millis(200)) {
                    Ok(c) => c,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                };
                pending.extend_from_slice(&chunk);

                while pending.len() >= VAD_CHUNK_SAMPLES {
                    let vad_chunk: Vec<f32> = pending.drain(..VAD_CHUNK_SAMPLES).collect();
                    let chunk_start_ms = samples_seen * 1000 / 16000;
                    samples_seen += VAD_CHUNK_SAMPLES as u64;

                    let prob = match vad.speech_probability(&vad_chunk) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(source = %thread_source, error = %e, "vad error on chunk");
                            continue;
                        }
                    };

                    match state {
                        ListenerState::Idle => {
                            if prob > config.vad_threshold {
                                state = ListenerState::Speaking;
                                utterance_start_ms = chunk_start_ms;
                                speech_buffer.clear();
                                speech_buffer.extend_from_slice(&vad_chunk);
                                silence_chunks = 0;
                            }
                        }
                        ListenerState::Speaking => {
                            speech_buffer.extend_from_slice(&vad_chunk);
                            if prob > config.vad_threshold {
                                silence_chunks = 0;
                            } else {
                                silence_chunks += 1;
                            }

                            if silence_chunks >= config.max_silence_chunks {
                                let end_ms = chunk_start_ms + (VAD_CHUNK_SAMPLES as u64 * 1000 / 16000);
                                let trailing_silence_samples =
                                    silence_chunks as usize * VAD_CHUNK_SAMPLES;
                                let speech_samples =
                                    speech_buffer.len().saturating_sub(trailing_silence_samples);
                                if speech_samples >= config.min_utterance_samples {
                                    emit(Utterance {
                                        source: thread_source.clone(),
                                        pcm: Arc::from(speech_buffer.as_slice()),
                                        start_ms: utterance_start_ms,
                                        end_ms,
                                    });
                                }
                                speech_buffer.clear();
                                vad.reset();
                                state = ListenerState::Idle;
                            }
                        }
                    }
                }
            }
            tracing::info!(source = %thread_source, "device listener stopped");
        });

        Self {
            source,
            config,
            running,
            handle: Some(handle),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> VadGateConfig {
        self.config
    }

    /// Signals the capture thread to stop and waits (bounded by the OS
    /// scheduler, not a hard timeout) for it to finish draining.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gibberish_vad::ScriptedVad;
    use std::sync::Mutex;

    fn feed(chunks: Vec<f32>, script: Vec<f32>) -> Vec<Utterance> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let utterances = Arc::new(Mutex::new(Vec::new()));
        let utterances_clone = utterances.clone();

        let vad = Box::new(ScriptedVad::new(script));
        let mut listener = DeviceListener::spawn(
            "mic",
            rx,
            vad,
            VadGateConfig::default(),
            move |u| utterances_clone.lock().unwrap().push(u),
        );

        tx.send(chunks).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        listener.stop();
        Arc::try_unwrap(utterances).unwrap().into_inner().unwrap()
    }

    #[test]
    fn s1_vad_segmentation_emits_one_utterance() {
        // 20 chunks speech (prob=0.8), then 17 chunks silence (prob=0.1)
        let script: Vec<f32> = std::iter::repeat(0.8)
            .take(20)
            .chain(std::iter::repeat(0.1).take(17))
            .collect();
        let samples = vec![0.0f32; VAD_CHUNK_SAMPLES * 37];
        let result = feed(samples, script);
        assert_eq!(result.len(), 1);
        assert!(result[0].pcm.len() as u64 >= 8000);
    }

    #[test]
    fn s2_short_speech_is_rejected() {
        // 1 chunk speech, then 17 chunks silence: too short to emit.
        let script: Vec<f32> = std::iter::once(0.8)
            .chain(std::iter::repeat(0.1).take(17))
            .collect();
        let samples = vec![0.0f32; VAD_CHUNK_SAMPLES * 18];
        let result = feed(samples, script);
        assert_eq!(result.len(), 0);
    }
}
