//! C6, C7 and C9: the transcript dispatcher, auto-answer controller and
//! monitor supervisor that tie the per-modality services (C1–C5, C8) into
//! one long-running cognition runtime (spec.md §2).

mod auto_answer;
mod config;
mod dispatcher;
mod question;
mod subscribers;
mod supervisor;

pub use auto_answer::AutoAnswerController;
pub use config::{AutoAnswerConfig, RuntimeConfig};
pub use dispatcher::TranscriptDispatcher;
pub use question::is_question;
pub use subscribers::{SubscriberGuard, SubscriberRegistry};
pub use supervisor::Supervisor;

/// Error kinds a `Supervisor` can surface directly to its caller. Most
/// failure modes in spec.md §7 are recovered locally (logged, loop
/// continues) inside the owning component; this enum covers what's left
/// once construction/lifecycle calls leave the service's own crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("audio supervisor error: {0}")]
    Audio(#[from] gibberish_audio::AudioError),
    #[error("screen loop error: {0}")]
    Screen(#[from] gibberish_screen::ScreenError),
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
