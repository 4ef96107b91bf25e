use image::RgbaImage;

/// OCR collaborator contract: `image -> text`, possibly with
/// `[x1,y1,x2,y2] line` per-region annotations (spec.md §3), though the
/// Tesseract-backed implementation here returns plain text.
pub trait OcrEngine: Send + Sync {
    fn extract_text(&self, image: &RgbaImage) -> crate::Result<String>;
}

/// Tesseract via `leptess` (replaces the Python reference's `pytesseract`,
/// same underlying engine).
pub struct LeptessOcr {
    lang: String,
}

impl LeptessOcr {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

impl Default for LeptessOcr {
    fn default() -> Self {
        Self::new("eng")
    }
}

impl OcrEngine for LeptessOcr {
    fn extract_text(&self, image: &RgbaImage) -> crate::Result<String> {
        let mut png_bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image.clone())
            .write_to(
                &mut std::io::Cursor::new(&mut png_bytes),
                image::ImageFormat::Png,
            )
            .map_err(|e| crate::ScreenError::OcrExtractFailed(e.to_string()))?;

        let mut engine = leptess::LepTess::new(None, &self.lang)
            .map_err(|e| crate::ScreenError::OcrInitFailed(e.to_string()))?;
        engine
            .set_image_from_mem(&png_bytes)
            .map_err(|e| crate::ScreenError::OcrExtractFailed(e.to_string()))?;
        let text = engine
            .get_utf8_text()
            .map_err(|e| crate::ScreenError::OcrExtractFailed(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

/// Deterministic stand-in for tests: returns a scripted sequence of OCR
/// results, one per call, repeating the last value once exhausted.
pub struct ScriptedOcr {
    script: Vec<String>,
    pos: std::sync::atomic::AtomicUsize,
}

impl ScriptedOcr {
    pub fn new(script: Vec<String>) -> Self {
        Self {
            script,
            pos: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl OcrEngine for ScriptedOcr {
    fn extract_text(&self, _image: &RgbaImage) -> crate::Result<String> {
        if self.script.is_empty() {
            return Ok(String::new());
        }
        let index = self.pos.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.script[index.min(self.script.len() - 1)].clone())
    }
}
