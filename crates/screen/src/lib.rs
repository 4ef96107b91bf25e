//! C4: periodic screen capture, change-debounced OCR, and a stability gate
//! that decides when extracted text is worth persisting (spec.md §4.4).

mod capture;
mod gate;
mod hash;
mod loop_;
mod ocr;

pub use capture::{FixedCapture, ScreenCapture, XcapCapture};
pub use gate::StabilityGate;
pub use hash::perceptual_hash;
pub use loop_::{LatestScreen, ScreenLoop, ScreenLoopConfig};
pub use ocr::{LeptessOcr, OcrEngine, ScriptedOcr};

#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    #[error("screen capture failed: {0}")]
    CaptureFailed(String),
    #[error("OCR engine initialization failed: {0}")]
    OcrInitFailed(String),
    #[error("OCR text extraction failed: {0}")]
    OcrExtractFailed(String),
}

pub type Result<T> = std::result::Result<T, ScreenError>;
