//! User feedback cues.
//!
//! Every button press gets a short cue. Cues are best-effort: a failing cue
//! never affects the action that triggered it.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Something that can acknowledge a user action.
pub trait Feedback: Send + Sync {
    /// Play the cue. Must not fail loudly.
    fn cue(&self);
}

/// No feedback at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Feedback for Silent {
    fn cue(&self) {}
}

/// Rings the terminal bell.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl Feedback for TerminalBell {
    fn cue(&self) {
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            trace!("Bell failed: {}", e);
        }
    }
}

/// Feedback selection in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// [`Silent`].
    #[default]
    Silent,
    /// [`TerminalBell`].
    Bell,
}

impl FeedbackKind {
    /// Build the configured feedback.
    pub fn build(&self) -> Box<dyn Feedback> {
        match self {
            Self::Silent => Box::new(Silent),
            Self::Bell => Box::new(TerminalBell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_kind_from_json() {
        let kind: FeedbackKind = serde_json::from_str("\"bell\"").unwrap();
        assert_eq!(kind, FeedbackKind::Bell);
        assert_eq!(FeedbackKind::default(), FeedbackKind::Silent);
    }

    #[test]
    fn test_build() {
        FeedbackKind::Silent.build().cue();
        // Building the bell must not ring it
        let _bell = FeedbackKind::Bell.build();
    }
}
