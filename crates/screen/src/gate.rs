/// Pure stability-gate state machine for screen OCR text (spec.md §4.4
/// steps 4-5), factored out of the async capture loop so it can be tested
/// without timing or a real capture/OCR backend.
#[derive(Debug, Default)]
pub struct StabilityGate {
    previous_text: Option<String>,
    last_stored_text: Option<String>,
    stable_count: u32,
}

impl StabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one OCR observation. Returns `true` if this observation should
    /// be persisted as a memory record: recording is enabled, the text has
    /// been stable for `stable_count_threshold` consecutive observations,
    /// it differs from the last stored text, and it is at least
    /// `min_text_length` characters long.
    pub fn observe(
        &mut self,
        text: &str,
        recording: bool,
        stable_count_threshold: u32,
        min_text_length: usize,
    ) -> bool {
        if self.previous_text.as_deref() == Some(text) {
            self.stable_count += 1;
        } else {
            self.previous_text = Some(text.to_string());
            self.stable_count = 1;
        }

        let is_stable = self.stable_count >= stable_count_threshold;
        let is_new = self.last_stored_text.as_deref() != Some(text);
        let is_long_enough = text.len() >= min_text_length;

        if recording && is_stable && is_new && is_long_enough {
            self.last_stored_text = Some(text.to_string());
            self.stable_count = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_stores_once_after_second_stable_observation() {
        let mut gate = StabilityGate::new();
        let long_hello = "Hello".repeat(20);
        let long_world = "World".repeat(20);

        assert!(!gate.observe(&long_hello, true, 2, 10));
        assert!(gate.observe(&long_hello, true, 2, 10));
        // A single "World" observation never reaches the threshold.
        assert!(!gate.observe(&long_world, true, 2, 10));
    }

    #[test]
    fn short_text_never_persists() {
        let mut gate = StabilityGate::new();
        assert!(!gate.observe("short", true, 2, 50));
        assert!(!gate.observe("short", true, 2, 50));
    }

    #[test]
    fn disabled_recording_suppresses_writes() {
        let mut gate = StabilityGate::new();
        let text = "x".repeat(60);
        gate.observe(&text, false, 2, 50);
        assert!(!gate.observe(&text, false, 2, 50));
    }

    #[test]
    fn oscillation_resets_against_the_immediately_preceding_value() {
        // Open Question (b): A -> B -> A never accumulates stability
        // against A's earlier observation.
        let mut gate = StabilityGate::new();
        let a = "a".repeat(60);
        let b = "b".repeat(60);
        assert!(!gate.observe(&a, true, 2, 50));
        assert!(!gate.observe(&b, true, 2, 50));
        assert!(!gate.observe(&a, true, 2, 50));
    }
}
