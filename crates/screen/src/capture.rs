use image::RgbaImage;

/// Grabs the primary monitor as an RGBA image. A trait so tests and the
/// screen loop don't depend on an attached display.
pub trait ScreenCapture: Send + Sync {
    fn capture_primary(&self) -> crate::Result<RgbaImage>;
}

/// Real capture backend (replaces the Python reference's `mss`).
pub struct XcapCapture;

impl ScreenCapture for XcapCapture {
    fn capture_primary(&self) -> crate::Result<RgbaImage> {
        let mut monitors =
            xcap::Monitor::all().map_err(|e| crate::ScreenError::CaptureFailed(e.to_string()))?;
        if monitors.is_empty() {
            return Err(crate::ScreenError::CaptureFailed(
                "no monitors found".to_string(),
            ));
        }
        let primary_index = monitors
            .iter()
            .position(|m| m.is_primary().unwrap_or(false))
            .unwrap_or(0);
        let monitor = monitors.swap_remove(primary_index);
        monitor
            .capture_image()
            .map_err(|e| crate::ScreenError::CaptureFailed(e.to_string()))
    }
}

/// Deterministic stand-in for tests: returns a fixed-size solid image whose
/// pixel value can be varied to simulate a changing screen.
pub struct FixedCapture {
    pub width: u32,
    pub height: u32,
    pub value: std::sync::atomic::AtomicU8,
}

impl FixedCapture {
    pub fn new(width: u32, height: u32, initial: u8) -> Self {
        Self {
            width,
            height,
            value: std::sync::atomic::AtomicU8::new(initial),
        }
    }

    pub fn set(&self, value: u8) {
        self.value.store(value, std::sync::atomic::Ordering::SeqCst);
    }
}

impl ScreenCapture for FixedCapture {
    fn capture_primary(&self) -> crate::Result<RgbaImage> {
        let value = self.value.load(std::sync::atomic::Ordering::SeqCst);
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            image::Rgba([value, value, value, 255]),
        ))
    }
}
