use image::RgbaImage;

/// Fixed assistant identity and formatting rules, shared by every prompt
/// this client builds (the "analysis" and "monitor" templates alike).
const SYSTEM_PROMPT: &str = "You are a good listener, an AI assistant developed to analyze and solve problems specific, accurate, and actionable.\n\n\
CORE IDENTITY:\n\
- You are a careful, attentive listener.\n\
- Your responses must be specific, accurate, and actionable.\n\n\
GENERAL GUIDELINES:\n\
- NEVER use meta-phrases (e.g., \"let me help you\").\n\
- NEVER summarize unless explicitly requested.\n\
- NEVER provide unsolicited advice.\n\
- NEVER refer to \"screenshot\" or \"image\" - refer to it as \"the screen\".\n\
- ALWAYS be specific, detailed, and accurate.\n\
- ALWAYS use markdown formatting.\n\
- Render all math using LaTeX: $...$ for in-line, $$...$$ for multi-line.\n\n\
UI/SCREEN NAVIGATION:\n\
- Provide EXTREMELY detailed step-by-step instructions.\n\
- Specify exact button/menu names, locations, visual identifiers.";

/// A two-message prompt ready to hand to a provider: a fixed system message
/// plus a human message, with an optional base64-encoded JPEG attachment.
pub struct Prompt {
    pub system: String,
    pub human: String,
    pub image_base64: Option<String>,
}

pub fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len).collect()
    }
}

/// Builds the `analyze` prompt (spec.md §4.8): screen/OCR context, an
/// optional memory-context section, and the user's query.
pub fn build_analysis_prompt(
    context_text: &str,
    memory_context: &str,
    user_query: &str,
    image: Option<&RgbaImage>,
) -> crate::Result<Prompt> {
    let context_text = if context_text.is_empty() {
        "No text detected via OCR."
    } else {
        context_text
    };
    let user_query = if user_query.is_empty() {
        "Analyze this screen."
    } else {
        user_query
    };

    let human = format!(
        "Context from screen (OCR) with bounding boxes [x1, y1, x2, y2]:\n{context_text}\n\n\
{memory_context}\n\n\
User Query: {user_query}\n\n\
Please provide a concise, helpful response. Use the spatial coordinates to understand the layout."
    );

    Ok(Prompt {
        system: SYSTEM_PROMPT.to_string(),
        human,
        image_base64: image.map(encode_jpeg_base64).transpose()?,
    })
}

/// Formats queried memory documents as a labeled section, or an empty
/// string when there is nothing relevant (spec.md §4.8 memory-context gate).
pub fn format_memory_context(documents: &[String]) -> String {
    if documents.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nRelevant Past Context:\n");
    for doc in documents {
        out.push_str("- ");
        out.push_str(doc);
        out.push('\n');
    }
    out
}

fn encode_jpeg_base64(image: &RgbaImage) -> crate::Result<String> {
    use base64::Engine;

    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .map_err(|e| crate::LlmError::ApiError(format!("image encode failed: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_falls_back_when_context_is_empty() {
        let prompt = build_analysis_prompt("", "", "", None).unwrap();
        assert!(prompt.human.contains("No text detected via OCR."));
        assert!(prompt.human.contains("Analyze this screen."));
    }

    #[test]
    fn truncate_respects_max_len() {
        let long = "a".repeat(100);
        assert_eq!(truncate(&long, 10).len(), 10);
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn memory_context_is_empty_when_no_documents() {
        assert_eq!(format_memory_context(&[]), "");
        assert!(format_memory_context(&["a memory".to_string()]).contains("a memory"));
    }
}
