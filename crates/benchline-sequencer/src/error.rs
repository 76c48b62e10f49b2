use benchline_hardware::ConnError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to callers of the orchestrator.
///
/// `start_session` rejects a request with one of the first four variants
/// without touching the instrument; `PhaseConfigFailed` is what a running
/// session records when setting up a phase fails.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Another session holds the station
    #[error("A session is already running")]
    SessionBusy,

    /// The measuring device has no open connection
    #[error("Device '{device}' is not connected")]
    DeviceNotConnected { device: String },

    /// The catalog has no model with this id
    #[error("Model '{model_id}' not found")]
    ModelNotFound { model_id: String },

    /// The model exists but cannot be run
    #[error("Model '{model_id}' is invalid: {reason}")]
    InvalidModel { model_id: String, reason: String },

    /// Instrument setup for a phase failed
    #[error("Configuring phase '{phase}' failed: {source}")]
    PhaseConfigFailed {
        phase: String,
        #[source]
        source: ConnError,
    },

    /// Abort requested while the station is idle
    #[error("No session is running")]
    NoActiveSession,

    /// State machine refused a transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Failures of the catalog, registry and session store collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Lookup key has no entry
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors loading a station configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<benchline_core::Error> for ConfigError {
    fn from(err: benchline_core::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Result alias for collaborator operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
