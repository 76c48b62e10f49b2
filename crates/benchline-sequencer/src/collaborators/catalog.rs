use crate::error::{StorageError, StorageResult};
use benchline_core::{DeviceId, PhaseSpec, SerialSettings};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Source of inspection models and their phase limits.
pub trait ModelCatalog: Send + Sync {
    /// Ordered phase list of `model_id`.
    ///
    /// # Errors
    /// `StorageError::NotFound` when the model does not exist.
    fn phase_specs<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, StorageResult<Vec<PhaseSpec>>>;
}

/// A device known to the station, addressed by its role ("analyzer", …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub role: String,
    pub id: DeviceId,
    #[serde(flatten)]
    pub settings: SerialSettings,
}

/// Source of device serial settings.
pub trait DeviceRegistry: Send + Sync {
    fn device_config<'a>(&'a self, role: &'a str) -> BoxFuture<'a, StorageResult<DeviceEntry>>;
}

/// Catalog and registry held in memory, typically filled from the station
/// configuration file.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    models: RwLock<HashMap<String, Vec<PhaseSpec>>>,
    devices: RwLock<HashMap<String, DeviceEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_model(self, model_id: impl Into<String>, phases: Vec<PhaseSpec>) -> Self {
        self.insert_model(model_id, phases);
        self
    }

    #[must_use]
    pub fn with_device(self, entry: DeviceEntry) -> Self {
        self.insert_device(entry);
        self
    }

    /// Add or replace a model.
    pub fn insert_model(&self, model_id: impl Into<String>, phases: Vec<PhaseSpec>) {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_id.into(), phases);
    }

    /// Add or replace the device for `entry.role`.
    pub fn insert_device(&self, entry: DeviceEntry) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.role.clone(), entry);
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Every registered device, sorted by role.
    pub fn devices(&self) -> Vec<DeviceEntry> {
        let mut devices: Vec<DeviceEntry> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.role.cmp(&b.role));
        devices
    }
}

impl ModelCatalog for InMemoryCatalog {
    fn phase_specs<'a>(
        &'a self,
        model_id: &'a str,
    ) -> BoxFuture<'a, StorageResult<Vec<PhaseSpec>>> {
        Box::pin(async move {
            self.models
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(model_id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("model", model_id))
        })
    }
}

impl DeviceRegistry for InMemoryCatalog {
    fn device_config<'a>(&'a self, role: &'a str) -> BoxFuture<'a, StorageResult<DeviceEntry>> {
        Box::pin(async move {
            self.devices
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(role)
                .cloned()
                .ok_or_else(|| StorageError::not_found("device", role))
        })
    }
}
