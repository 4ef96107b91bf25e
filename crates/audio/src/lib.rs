mod device;
mod listener;
mod stream;
mod supervisor;

#[cfg(target_os = "macos")]
mod speaker;

pub use device::{
    find_device_by_id, find_virtual_device, get_default_device, list_devices, AudioDevice,
    DeviceType,
};
pub use listener::{DeviceListener, Utterance, VadGateConfig, VAD_CHUNK_SAMPLES};
pub use stream::{AudioSource, AudioStream};
pub use supervisor::{AudioSupervisor, AudioSupervisorConfig};

#[cfg(target_os = "macos")]
pub use speaker::{SpeakerInput, SpeakerStream, TAP_DEVICE_NAME};

pub const SAMPLE_RATE: u32 = 16000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("device error: {0}")]
    DeviceError(#[from] cpal::DevicesError),
    #[error("build stream error: {0}")]
    BuildStreamError(#[from] cpal::BuildStreamError),
}

pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        let devices = list_devices().unwrap();
        println!("Found {} audio devices:", devices.len());
        for device in &devices {
            println!("  - {} (default: {})", device.name, device.is_default);
        }
    }

}
