use std::collections::HashSet;
use std::time::Duration;

use gibberish_audio::AudioSupervisorConfig;
use gibberish_llm::LlmConfig;
use gibberish_memory::MemoryConfig;
use gibberish_screen::ScreenLoopConfig;

/// Every knob spec.md §6 enumerates for the auto-answer subsystem.
#[derive(Debug, Clone)]
pub struct AutoAnswerConfig {
    pub enabled: bool,
    pub cooldown: Duration,
    pub min_question_length: usize,
    pub context_window: Duration,
    pub screen_truncate: usize,
    /// spec.md §9 Open Question (a): which source tags count as "the other
    /// party" in a live conversation. Resolved from the Python reference
    /// (`source == "system"`), see DESIGN.md.
    pub other_party_sources: HashSet<String>,
}

impl Default for AutoAnswerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::from_secs(10),
            min_question_length: 10,
            context_window: Duration::from_secs(120),
            screen_truncate: 2000,
            other_party_sources: ["system"].into_iter().map(String::from).collect(),
        }
    }
}

/// Every knob spec.md §6 enumerates, gathered under one struct so the whole
/// cognition runtime can be constructed from one value. Loading this from
/// env/file/CLI is out of scope (spec.md §1); callers build it however they
/// like and hand it to `Supervisor::new`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub audio: AudioSupervisorConfig,
    pub screen: ScreenLoopConfig,
    pub memory: MemoryConfig,
    pub auto_answer: AutoAnswerConfig,
    pub llm: LlmConfig,
    /// Capacity of the recent-transcript ring (spec.md §4.6, default 30).
    pub transcript_ring_capacity: usize,
    /// Minimum word count for a transcript item to be persisted to memory
    /// (spec.md §3, default 4).
    pub word_count_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            audio: AudioSupervisorConfig::default(),
            screen: ScreenLoopConfig::default(),
            memory: MemoryConfig::default(),
            auto_answer: AutoAnswerConfig::default(),
            llm: LlmConfig::default(),
            transcript_ring_capacity: 30,
            word_count_threshold: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_knobs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.transcript_ring_capacity, 30);
        assert_eq!(config.word_count_threshold, 4);
        assert_eq!(config.auto_answer.cooldown, Duration::from_secs(10));
        assert!(config.auto_answer.other_party_sources.contains("system"));
        assert!(!config.auto_answer.other_party_sources.contains("mic"));
    }
}
