//! Protocol module for the UART peripheral.
//!
//! This module contains:
//! - On/off command encoding
//! - Notification text interpretation

pub mod command;
pub mod status;

pub use command::{Command, CommandMode, CommandSet};
pub use status::{decode_text, StatusRule, StatusRules};
