//! Station configuration file.
//!
//! A station is described by one TOML document:
//!
//! ```toml
//! [[devices]]
//! role = "analyzer"
//! id = "wt310"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! parity = "none"
//! timeout = "500ms"
//!
//! [[models]]
//! id = "PSU-200"
//!
//! [[models.phases]]
//! name = "P1"
//! duration = "10s"
//! wait = "2s"
//! interval = "500ms"
//! lower = 0.05
//! upper = 1.0
//!
//! [driver]
//! retries = 3
//! backoff = "50ms"
//!
//! [manager]
//! max_workers = 4
//!
//! [sequencer]
//! device_role = "analyzer"
//! event_capacity = 256
//! ```
//!
//! Every section except `devices` and `models` may be omitted.

use crate::collaborators::{DeviceEntry, InMemoryCatalog};
use crate::error::ConfigError;
use benchline_core::PhaseSpec;
use benchline_core::constants::{DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_WORKERS};
use benchline_hardware::{DriverSettings, ManagerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default role of the measuring device.
pub const DEFAULT_DEVICE_ROLE: &str = "analyzer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub phases: Vec<PhaseSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    pub max_workers: usize,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Registry role of the device every session measures with.
    pub device_role: String,
    pub event_capacity: usize,
    /// JSON-lines file receiving finished sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_path: Option<PathBuf>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            device_role: DEFAULT_DEVICE_ROLE.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            results_path: None,
        }
    }
}

impl SequencerConfig {
    #[must_use]
    pub fn with_device_role(mut self, role: impl Into<String>) -> Self {
        self.device_role = role.into();
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub sequencer: SequencerConfig,
}

impl StationConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StationConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-references the type system cannot express.
    ///
    /// # Errors
    /// `ConfigError::Invalid` for duplicate device roles or model ids, a
    /// model without phases, an invalid phase or serial setting, a zero
    /// worker count or event capacity, or a `sequencer.device_role` that
    /// names no device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut roles = HashSet::new();
        for device in &self.devices {
            if !roles.insert(device.role.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device role '{}'",
                    device.role
                )));
            }
            device.settings.validate()?;
        }

        let mut model_ids = HashSet::new();
        for model in &self.models {
            if !model_ids.insert(model.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
            if model.phases.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "model '{}' has no phases",
                    model.id
                )));
            }
            for phase in &model.phases {
                phase.validate()?;
            }
        }

        if self.manager.max_workers == 0 {
            return Err(ConfigError::Invalid("manager.max_workers must be > 0".into()));
        }
        if self.sequencer.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sequencer.event_capacity must be > 0".into(),
            ));
        }
        if !roles.contains(self.sequencer.device_role.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "sequencer.device_role '{}' matches no device",
                self.sequencer.device_role
            )));
        }
        Ok(())
    }

    /// Catalog and registry holding every model and device of this file.
    pub fn catalog(&self) -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        for model in &self.models {
            catalog.insert_model(model.id.clone(), model.phases.clone());
        }
        for device in &self.devices {
            catalog.insert_device(device.clone());
        }
        catalog
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::default()
            .with_max_workers(self.manager.max_workers)
            .with_driver(self.driver.clone())
    }

    /// Entry of the measuring device.
    pub fn measuring_device(&self) -> Option<&DeviceEntry> {
        self.devices
            .iter()
            .find(|d| d.role == self.sequencer.device_role)
    }
}
