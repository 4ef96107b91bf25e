use crate::device::{list_devices, AudioDevice};
use crate::listener::{DeviceListener, Utterance, VadGateConfig};
use crate::stream::{AudioSource, AudioStream};
use gibberish_stt::SttEngine;
use gibberish_vad::VoiceActivityDetector;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct AudioSupervisorConfig {
    pub sample_rate: u32,
    pub vad: VadGateConfig,
    pub capture_system_audio: bool,
    /// Name-substrings that, if present in a device name, make it eligible
    /// even though it's not the default device (e.g. `blackhole`, `vb-cable`).
    pub include_name_substrings: HashSet<String>,
    /// Name-substrings that exclude a device outright, overriding inclusion.
    pub excluded_devices: HashSet<String>,
}

impl Default for AudioSupervisorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad: VadGateConfig::default(),
            capture_system_audio: true,
            include_name_substrings: ["blackhole", "vb-cable", "loopback"]
                .into_iter()
                .map(String::from)
                .collect(),
            excluded_devices: ["iphone", "teams"].into_iter().map(String::from).collect(),
        }
    }
}

type TranscriptCallback = Box<dyn Fn(String, String) + Send + Sync>;

/// Enumerates input devices, owns one `DeviceListener` per device, and
/// serializes transcription calls against a single STT engine instance
/// (spec invariant: at most one in-flight STT call at any time).
pub struct AudioSupervisor {
    config: AudioSupervisorConfig,
    stt: Arc<Mutex<Arc<dyn SttEngine>>>,
    vad_factory: Arc<dyn Fn() -> Box<dyn VoiceActivityDetector> + Send + Sync>,
    on_transcript: Arc<TranscriptCallback>,
    running: Arc<AtomicBool>,
    listeners: Mutex<Vec<DeviceListener>>,
    _streams: Mutex<Vec<AudioStream>>,
}

impl AudioSupervisor {
    pub fn new(
        config: AudioSupervisorConfig,
        stt: Arc<dyn SttEngine>,
        vad_factory: impl Fn() -> Box<dyn VoiceActivityDetector> + Send + Sync + 'static,
        on_transcript: impl Fn(String, String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            stt: Arc::new(Mutex::new(stt)),
            vad_factory: Arc::new(vad_factory),
            on_transcript: Arc::new(Box::new(on_transcript)),
            running: Arc::new(AtomicBool::new(false)),
            listeners: Mutex::new(Vec::new()),
            _streams: Mutex::new(Vec::new()),
        }
    }

    /// Device selection per spec §4.3: always the default device, plus any
    /// device whose name matches `include_name_substrings`, minus anything
    /// matching `excluded_devices`.
    pub fn eligible_devices(&self) -> crate::Result<Vec<AudioDevice>> {
        let devices = list_devices()?;
        let mut out = Vec::new();
        for device in devices {
            let lower = device.name.to_lowercase();
            if self
                .config
                .excluded_devices
                .iter()
                .any(|d| lower.contains(d.as_str()))
            {
                continue;
            }
            let included = device.is_default
                || (self.config.capture_system_audio
                    && self
                        .config
                        .include_name_substrings
                        .iter()
                        .any(|s| lower.contains(s.as_str())));
            if included {
                out.push(device);
            }
        }
        Ok(out)
    }

    /// Idempotent: calling `start` while already running is a no-op.
    pub fn start(&self) -> crate::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let devices = self.eligible_devices()?;
        let mut listeners = self.listeners.lock().expect("listeners mutex poisoned");
        let mut streams = self._streams.lock().expect("streams mutex poisoned");

        for device in devices {
            let source_kind = AudioSource::Microphone {
                device_id: Some(device.id.clone()),
            };
            let mut stream = match AudioStream::new(source_kind) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(device = %device.name, error = %e, "failed to open device, skipping");
                    continue;
                }
            };
            let Some(receiver) = stream.take_receiver() else {
                continue;
            };

            let stt = self.stt.clone();
            let callback = self.on_transcript.clone();
            let source_tag = if device.is_virtual() {
                "system".to_string()
            } else {
                "mic".to_string()
            };
            let emit_source_tag = source_tag.clone();

            let listener = DeviceListener::spawn(
                device.id.clone(),
                receiver,
                (self.vad_factory)(),
                self.config.vad,
                move |utterance: Utterance| {
                    Self::dispatch(&stt, &callback, &emit_source_tag, utterance);
                },
            );

            listeners.push(listener);
            streams.push(stream);
        }

        tracing::info!(devices = listeners.len(), "audio supervisor started");
        Ok(())
    }

    fn dispatch(
        stt: &Arc<Mutex<Arc<dyn SttEngine>>>,
        callback: &Arc<TranscriptCallback>,
        source: &str,
        utterance: Utterance,
    ) {
        let segments = {
            // single-flight: the STT model is not re-entrant.
            let engine = stt.lock().expect("stt mutex poisoned");
            engine.transcribe(&utterance.pcm, None)
        };
        match segments {
            Ok(segments) => {
                let text = segments
                    .into_iter()
                    .map(|s| s.text)
                    .collect::<Vec<_>>()
                    .join(" ");
                if !text.trim().is_empty() {
                    callback(text, source.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(source, error = %e, "transcription failed, dropping utterance");
            }
        }
    }

    /// Signals every listener, waits for them to drain, then clears state.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut listeners = self.listeners.lock().expect("listeners mutex poisoned");
        for listener in listeners.iter_mut() {
            listener.stop();
        }
        listeners.clear();
        self._streams
            .lock()
            .expect("streams mutex poisoned")
            .clear();
        tracing::info!("audio supervisor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for AudioSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gibberish_stt::EchoEngine;
    use gibberish_vad::ScriptedVad;

    #[test]
    fn device_selection_honors_include_and_exclude_lists() {
        let config = AudioSupervisorConfig {
            excluded_devices: ["teams"].into_iter().map(String::from).collect(),
            ..Default::default()
        };
        let supervisor = AudioSupervisor::new(
            config,
            Arc::new(EchoEngine::new("echo")),
            || Box::new(ScriptedVad::new(vec![0.0])) as Box<dyn VoiceActivityDetector>,
            |_text, _source| {},
        );
        // Device enumeration itself depends on the host's actual audio
        // backend; here we only assert the call doesn't panic/error on a
        // host with zero or more input devices.
        assert!(supervisor.eligible_devices().is_ok());
    }

    #[test]
    fn start_is_idempotent() {
        let supervisor = AudioSupervisor::new(
            AudioSupervisorConfig::default(),
            Arc::new(EchoEngine::new("echo")),
            || Box::new(ScriptedVad::new(vec![0.0])) as Box<dyn VoiceActivityDetector>,
            |_text, _source| {},
        );
        let _ = supervisor.start();
        let was_running = supervisor.is_running();
        let _ = supervisor.start();
        assert_eq!(was_running, supervisor.is_running());
        supervisor.stop();
        assert!(!supervisor.is_running());
    }
}
