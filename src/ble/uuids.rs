//! Service and characteristic identifiers.
//!
//! Users type identifiers by hand, so they arrive in every shape: `FFE0`,
//! `0xffe1`, `6E400001B5A3F393E0A9E50E24DCCA9E`, or an already hyphenated
//! UUID. This module cleans that text and turns it into the forms the
//! platform layer understands.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Bluetooth Base UUID. Short-form identifiers are placed in bits 96..112.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(BASE_UUID_BITS);

const BASE_UUID_BITS: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Default service identifier of HC-series / HM-10 UART modules.
pub const DEFAULT_SERVICE: &str = "FFE0";
/// Default characteristic identifier of HC-series / HM-10 UART modules.
pub const DEFAULT_CHARACTERISTIC: &str = "FFE1";

/// Default UART service UUID (`0xFFE0` on the base UUID).
pub const DEFAULT_SERVICE_UUID: Uuid = short_uuid(0xFFE0);
/// Default UART characteristic UUID (`0xFFE1` on the base UUID).
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid = short_uuid(0xFFE1);

/// Name prefixes offered to the device picker.
pub const DEFAULT_NAME_PREFIXES: [&str; 3] = ["HC", "BT", "BLE"];

/// Expand a 16-bit short-form identifier onto the Bluetooth Base UUID.
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID_BITS | ((short as u128) << 96))
}

/// A normalized identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalIdentifier {
    /// 16-bit short form (cleaned text of 1 to 4 hex digits).
    Short(u16),
    /// 128-bit UUID in `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` layout.
    Uuid(String),
    /// Anything else, lowercased and passed through as-is.
    Raw(String),
}

impl CanonicalIdentifier {
    /// Resolve to a full 128-bit UUID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] if a passthrough string is not a
    /// parseable UUID.
    pub fn to_uuid(&self) -> Result<Uuid> {
        match self {
            Self::Short(short) => Ok(short_uuid(*short)),
            Self::Uuid(text) | Self::Raw(text) => {
                Uuid::parse_str(text).map_err(|_| Error::InvalidIdentifier {
                    input: text.clone(),
                })
            }
        }
    }

    /// Check if this is a 16-bit short form.
    pub fn is_short(&self) -> bool {
        matches!(self, Self::Short(_))
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(short) => write!(f, "0x{:04x}", short),
            Self::Uuid(text) | Self::Raw(text) => write!(f, "{}", text),
        }
    }
}

/// Strip a leading `0x`, drop everything that is not a hex digit, lowercase.
fn clean_hex(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    stripped
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Normalize user-entered identifier text.
///
/// | cleaned length | result |
/// |---|---|
/// | 0 | [`Error::InvalidIdentifier`] |
/// | 1..=4 | [`CanonicalIdentifier::Short`] |
/// | 32 | [`CanonicalIdentifier::Uuid`], hyphens at 8, 12, 16, 20 |
/// | other | [`CanonicalIdentifier::Raw`], the input lowercased |
///
/// # Example
///
/// ```
/// use ble_uart_remote::ble::uuids::{normalize, CanonicalIdentifier};
///
/// assert_eq!(normalize("0xFFE0").unwrap(), CanonicalIdentifier::Short(0xffe0));
/// ```
pub fn normalize(raw: &str) -> Result<CanonicalIdentifier> {
    let cleaned = clean_hex(raw);

    match cleaned.len() {
        0 => Err(Error::InvalidIdentifier {
            input: raw.to_string(),
        }),
        1..=4 => u16::from_str_radix(&cleaned, 16)
            .map(CanonicalIdentifier::Short)
            .map_err(|_| Error::InvalidIdentifier {
                input: raw.to_string(),
            }),
        32 => Ok(CanonicalIdentifier::Uuid(format!(
            "{}-{}-{}-{}-{}",
            &cleaned[0..8],
            &cleaned[8..12],
            &cleaned[12..16],
            &cleaned[16..20],
            &cleaned[20..32]
        ))),
        _ => Ok(CanonicalIdentifier::Raw(raw.trim().to_lowercase())),
    }
}

/// Clean identifier text, substituting `default` when nothing is left.
///
/// Non-empty cleaned text is returned regardless of its length.
///
/// # Example
///
/// ```
/// use ble_uart_remote::ble::uuids::hex_or_default;
///
/// assert_eq!(hex_or_default("", "FFE0"), "ffe0");
/// assert_eq!(hex_or_default("0xFFE1", "FFE0"), "ffe1");
/// ```
pub fn hex_or_default(raw: &str, default: &str) -> String {
    let cleaned = clean_hex(raw);
    if cleaned.is_empty() {
        default.to_lowercase()
    } else {
        cleaned
    }
}

/// Clean, default and normalize in one go, returning the platform UUID.
pub fn resolve_uuid(raw: &str, default: &str) -> Result<Uuid> {
    normalize(&hex_or_default(raw, default))?.to_uuid()
}
