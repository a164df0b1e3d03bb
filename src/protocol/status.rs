//! Notification text interpretation.
//!
//! Peripherals that echo acknowledgements send short text lines such as
//! `ACK:ON` or `STATUS:OFF`. Firmware variants disagree on which lines they
//! send, so the mapping from prefix to status text is configurable.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// One prefix-to-status mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRule {
    /// Notification text must start with this.
    pub prefix: String,
    /// Status text shown when the rule matches.
    pub status: String,
}

impl StatusRule {
    /// Create a new rule.
    pub fn new(prefix: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            status: status.into(),
        }
    }
}

/// Ordered list of [`StatusRule`]s. The first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusRules(Vec<StatusRule>);

impl Default for StatusRules {
    fn default() -> Self {
        Self(vec![
            StatusRule::new("ACK:ON", "System: On (ACK)"),
            StatusRule::new("ACK:OFF", "System: Off (ACK)"),
            StatusRule::new("STATUS:ON", "System: On"),
            StatusRule::new("STATUS:OFF", "System: Off"),
        ])
    }
}

impl StatusRules {
    /// Create a rule set from an explicit list.
    pub fn new(rules: Vec<StatusRule>) -> Self {
        Self(rules)
    }

    /// Only the acknowledgement rules, for firmware that never sends `STATUS:*`.
    pub fn ack_only() -> Self {
        Self(
            Self::default()
                .0
                .into_iter()
                .filter(|rule| rule.prefix.starts_with("ACK:"))
                .collect(),
        )
    }

    /// Find the status text for a notification line.
    pub fn status_for(&self, text: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|rule| text.starts_with(rule.prefix.as_str()))
            .map(|rule| rule.status.as_str())
    }

    /// Get the rules in match order.
    pub fn rules(&self) -> &[StatusRule] {
        &self.0
    }
}

/// Decode notification bytes as UTF-8. Invalid sequences become U+FFFD.
pub fn decode_text(value: &[u8]) -> String {
    if let Err(e) = std::str::from_utf8(value) {
        trace!("Notification is not UTF-8 ({}): {:02X?}", e, value);
    }
    String::from_utf8_lossy(value).into_owned()
}
