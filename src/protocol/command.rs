//! On/off command encoding.
//!
//! UART bridge firmware usually reacts to either a single character or a
//! word. Which one the peripheral expects is a user toggle.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A user command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Switch the peripheral on.
    On,
    /// Switch the peripheral off.
    Off,
}

impl Command {
    /// Get a human-readable name for this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::On => "On",
            Self::Off => "Off",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How commands are encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    /// One character per command.
    #[default]
    SingleByte,
    /// A text word per command.
    Text,
}

impl CommandMode {
    /// Mode for the text-mode toggle.
    pub fn from_text_mode(text_mode: bool) -> Self {
        if text_mode {
            Self::Text
        } else {
            Self::SingleByte
        }
    }

    /// Check if this is text mode.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Payload table for both modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    /// Single-byte payload for [`Command::On`].
    pub on_byte: String,
    /// Single-byte payload for [`Command::Off`].
    pub off_byte: String,
    /// Text payload for [`Command::On`].
    pub on_text: String,
    /// Text payload for [`Command::Off`].
    pub off_text: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            on_byte: "a".to_string(),
            off_byte: "b".to_string(),
            on_text: "LIGAR".to_string(),
            off_text: "DESLIGAR".to_string(),
        }
    }
}

impl CommandSet {
    /// The payload text for a command in a mode.
    pub fn text(&self, command: Command, mode: CommandMode) -> &str {
        match (command, mode) {
            (Command::On, CommandMode::SingleByte) => &self.on_byte,
            (Command::Off, CommandMode::SingleByte) => &self.off_byte,
            (Command::On, CommandMode::Text) => &self.on_text,
            (Command::Off, CommandMode::Text) => &self.off_text,
        }
    }

    /// Encode a command as raw bytes (UTF-8 of the payload text).
    pub fn encode(&self, command: Command, mode: CommandMode) -> Bytes {
        Bytes::copy_from_slice(self.text(command, mode).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_mode() {
        let set = CommandSet::default();
        assert_eq!(
            set.encode(Command::On, CommandMode::SingleByte),
            Bytes::from_static(b"a")
        );
        assert_eq!(
            set.encode(Command::Off, CommandMode::SingleByte),
            Bytes::from_static(b"b")
        );
    }

    #[test]
    fn test_text_mode() {
        let set = CommandSet::default();
        assert_eq!(
            set.encode(Command::On, CommandMode::Text),
            Bytes::from_static(b"LIGAR")
        );
        assert_eq!(
            set.encode(Command::Off, CommandMode::Text),
            Bytes::from_static(b"DESLIGAR")
        );
    }

    #[test]
    fn test_mode_from_toggle() {
        assert_eq!(CommandMode::from_text_mode(false), CommandMode::SingleByte);
        assert_eq!(CommandMode::from_text_mode(true), CommandMode::Text);
        assert!(CommandMode::Text.is_text());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let set: CommandSet = serde_json::from_str(r#"{"on_text": "ON"}"#).unwrap();
        assert_eq!(set.text(Command::On, CommandMode::Text), "ON");
        assert_eq!(set.text(Command::Off, CommandMode::Text), "DESLIGAR");
        assert_eq!(set.text(Command::On, CommandMode::SingleByte), "a");
    }
}
