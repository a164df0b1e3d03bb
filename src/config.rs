//! Controller configuration.
//!
//! Read from JSON; every field has a default, so a partial file (or none at
//! all) is fine. The file is never written back.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ble::connection::ConnectTarget;
use crate::ble::uuids::{self, DEFAULT_CHARACTERISTIC, DEFAULT_SERVICE};
use crate::error::{Error, Result};
use crate::feedback::FeedbackKind;
use crate::protocol::command::{CommandMode, CommandSet};
use crate::protocol::status::StatusRules;

/// Directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "ble-uart-remote";
/// File name of the configuration.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 2_000;
/// Default device scan timeout.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Service identifier text.
    pub service: String,
    /// Characteristic identifier text.
    pub characteristic: String,
    /// Device picker name prefixes.
    pub name_prefixes: Vec<String>,
    /// Send text commands instead of single bytes.
    pub text_mode: bool,
    /// Interval between connection reconciliation checks.
    pub reconcile_interval_ms: u64,
    /// How long the device picker scans before giving up.
    pub scan_timeout_ms: u64,
    /// Command payloads.
    pub commands: CommandSet,
    /// Notification prefix rules.
    pub status_rules: StatusRules,
    /// Cue played on every user action.
    pub feedback: FeedbackKind,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            characteristic: DEFAULT_CHARACTERISTIC.to_string(),
            name_prefixes: uuids::DEFAULT_NAME_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            text_mode: false,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            commands: CommandSet::default(),
            status_rules: StatusRules::default(),
            feedback: FeedbackKind::default(),
        }
    }
}

impl RemoteConfig {
    /// Default location, `<config dir>/ble-uart-remote/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed, or
    /// holds invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, or use defaults if there is no file.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Check values that would break the controller.
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval_ms == 0 {
            return Err(Error::Config(
                "reconcile_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Store identifier text the way the input fields do: cleaned, with
    /// defaults substituted for empty input.
    pub fn set_identifiers(&mut self, service: &str, characteristic: &str) {
        self.service = uuids::hex_or_default(service, DEFAULT_SERVICE);
        self.characteristic = uuids::hex_or_default(characteristic, DEFAULT_CHARACTERISTIC);
    }

    /// Interval between reconciliation checks.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Device scan timeout.
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Command encoding mode.
    pub fn command_mode(&self) -> CommandMode {
        CommandMode::from_text_mode(self.text_mode)
    }

    /// Connect target built from this configuration.
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget {
            service: self.service.clone(),
            characteristic: self.characteristic.clone(),
            name_prefixes: self.name_prefixes.clone(),
        }
    }
}
