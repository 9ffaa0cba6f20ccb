//! Settings file.
//!
//! Settings are read from a TOML file: `$NBDEVICES_CONFIG` when set, otherwise
//! `nbdevices.toml` in the platform configuration directory. Every section is optional.
//!
//! ```toml
//! [credentials.cak]
//! name = "DefaultCAKKey1"
//! key = "<64 hex digits>"
//!
//! [calibration]
//! directory = "/var/lib/nbdevices"
//!
//! [capture]
//! preview_capacity = 16
//! cancel_grace_ms = 500
//! continuous_timeout_us = 1000000
//!
//! [spi]
//! name = "/dev/arafp0"
//!
//! [session]
//! probe = "tolerate_not_set"
//! ```

use crate::{
    CalibrationStore, CaptureController, ConfigError, Credential, CredentialKind, CredentialStore,
    ProvisioningProbe, QualityAlgorithm, SpiBus,
};
use directories::ProjectDirs;
use log::debug;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "NBDEVICES_CONFIG";
pub const CONFIG_FILE: &str = "nbdevices.toml";

// GPIO controller base of the reference SPI platform.
const GPIO_BASE: u32 = 343;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub credentials: CredentialSettings,
    pub calibration: CalibrationSettings,
    pub capture: CaptureSettings,
    pub spi: SpiSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub cak: Option<CredentialEntry>,
    pub cdk: Option<CredentialEntry>,
    pub legacy: Option<CredentialEntry>,
}

/// One credential. `name` falls back to the identifier the sensors ship with.
#[derive(Clone, Deserialize)]
pub struct CredentialEntry {
    pub name: Option<String>,
    /// Hex-encoded key.
    pub key: String,
}

impl std::fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Overrides `<downloads>/NBData`.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub preview_capacity: usize,
    pub cancel_grace_ms: u64,
    pub continuous_timeout_us: u64,
    pub elevate_priority: bool,
    pub algorithm: QualityAlgorithm,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            preview_capacity: crate::capture::DEFAULT_PREVIEW_CAPACITY,
            cancel_grace_ms: 500,
            continuous_timeout_us: 1_000_000,
            elevate_priority: true,
            algorithm: QualityAlgorithm::Nfiq,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpiSettings {
    pub name: String,
    pub awake_pin: u32,
    pub reset_pin: u32,
    pub chip_select_pin: u32,
}

impl Default for SpiSettings {
    fn default() -> Self {
        SpiSettings {
            name: "/dev/arafp0".to_string(),
            awake_pin: GPIO_BASE + 14,
            reset_pin: GPIO_BASE + 13,
            chip_select_pin: GPIO_BASE + 31,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub probe: ProvisioningProbe,
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.display().to_string(), err))?;

        Self::from_toml(&content)
    }

    /// `$NBDEVICES_CONFIG`, or the file in the platform configuration directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("com", "nbdevices", "nbdevices")
            .ok_or(ConfigError::MissingDirectory("configuration"))?;

        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Loads the default settings file; a missing file gives the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        debug!("Loading settings from {}", path.display());
        Self::load(&path)
    }

    pub fn credential_store(&self) -> Result<CredentialStore, ConfigError> {
        let entries = [
            (CredentialKind::Cak, &self.credentials.cak),
            (CredentialKind::Cdk, &self.credentials.cdk),
            (CredentialKind::LegacyAuth, &self.credentials.legacy),
        ];

        let mut store = CredentialStore::new();
        for (kind, entry) in entries.iter() {
            if let Some(entry) = entry {
                let name = entry
                    .name
                    .as_deref()
                    .unwrap_or_else(|| kind.default_name());
                store.insert(*kind, Credential::from_hex(name, &entry.key)?);
            }
        }

        Ok(store)
    }

    pub fn calibration_store(&self) -> Result<CalibrationStore, ConfigError> {
        match &self.calibration.directory {
            Some(directory) => Ok(CalibrationStore::new(directory)),
            None => CalibrationStore::in_downloads().ok_or(ConfigError::MissingDirectory("downloads")),
        }
    }

    pub fn capture_controller(&self) -> CaptureController {
        CaptureController::new()
            .with_algorithm(self.capture.algorithm)
            .with_preview_capacity(self.capture.preview_capacity)
            .with_cancel_grace(Duration::from_millis(self.capture.cancel_grace_ms))
            .with_priority_elevation(self.capture.elevate_priority)
    }

    pub fn continuous_timeout(&self) -> Duration {
        Duration::from_micros(self.capture.continuous_timeout_us)
    }

    pub fn spi_bus(&self) -> SpiBus {
        SpiBus::new(
            self.spi.name.clone(),
            self.spi.awake_pin,
            self.spi.reset_pin,
            self.spi.chip_select_pin,
        )
    }
}
