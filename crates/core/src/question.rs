/// Interrogative starters recognized case-insensitively (spec.md §4.5),
/// grounded on `examples/original_source/backend/app/services/monitor.py`'s
/// `QUESTION_STARTERS` regex.
const QUESTION_STARTERS: &[&str] = &[
    "who", "what", "where", "when", "why", "how", "can", "could", "would", "should", "is", "are",
    "was", "were", "do", "does", "did", "have", "has", "will", "which", "shall", "may", "might",
    "won't", "isn't", "aren't", "don't", "doesn't", "didn't", "haven't", "hasn't", "tell me",
];

/// Detects whether `text` is a question directed at the user (spec.md
/// §4.5): too short to judge, an explicit `?`, or one of a fixed set of
/// interrogative starters. Pure and idempotent — same input, same output
/// (spec.md §8 testable property 7).
pub fn is_question(text: &str, min_length: usize) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < min_length {
        return false;
    }
    if trimmed.ends_with('?') {
        return true;
    }
    let lower = trimmed.to_lowercase();
    QUESTION_STARTERS
        .iter()
        .any(|starter| starts_with_word(&lower, starter))
}

/// `haystack` starts with `word` followed by a word boundary (so "what" does
/// not match "whatever").
fn starts_with_word(haystack: &str, word: &str) -> bool {
    match haystack.strip_prefix(word) {
        Some(rest) => rest.is_empty() || !rest.chars().next().unwrap().is_alphanumeric(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_LEN: usize = 10;

    #[test]
    fn s3_question_detection_matrix() {
        assert!(is_question("What do you think about this approach?", MIN_LEN));
        assert!(!is_question("What?", MIN_LEN));
        assert!(!is_question("I like pizza", MIN_LEN));
        assert!(is_question("Tell me about your day", MIN_LEN));
    }

    #[test]
    fn explicit_question_mark_always_matches() {
        assert!(is_question("What time is it?", MIN_LEN));
        assert!(is_question("Is this correct?", MIN_LEN));
    }

    #[test]
    fn starter_words_without_question_mark() {
        assert!(is_question("What is the meaning of life", MIN_LEN));
        assert!(is_question("How do I fix this bug", MIN_LEN));
        assert!(is_question("Can you help me with this", MIN_LEN));
        assert!(is_question("Why is this happening", MIN_LEN));
    }

    #[test]
    fn plain_statements_are_not_questions() {
        assert!(!is_question("This is a statement", MIN_LEN));
        assert!(!is_question("Let me explain", MIN_LEN));
    }

    #[test]
    fn empty_and_whitespace_are_not_questions() {
        assert!(!is_question("", MIN_LEN));
        assert!(!is_question("   ", MIN_LEN));
        assert!(!is_question("\n\t", MIN_LEN));
    }

    #[test]
    fn starter_prefix_requires_word_boundary() {
        assert!(!is_question("Whatever you decide is fine", MIN_LEN));
    }

    #[test]
    fn idempotent_for_same_input() {
        let text = "Would you like some coffee";
        assert_eq!(is_question(text, MIN_LEN), is_question(text, MIN_LEN));
    }
}
