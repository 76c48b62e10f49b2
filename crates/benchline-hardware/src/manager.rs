//! Connection manager.
//!
//! The [`ConnectionManager`] owns every open transport, keyed by device id,
//! and runs all blocking serial I/O on a bounded worker pool so that async
//! callers never block their own task.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────────────────────────────────┐
//! caller task ───►│ table: DeviceId ─► Arc<Mutex<Transport>>   │
//!   (async)       └──────────────┬─────────────────────────────┘
//!                                │ lock_owned (one exchange per device)
//!                                ▼
//!                  Semaphore (max_workers permits)
//!                                │
//!                                ▼
//!                  spawn_blocking ─► InstrumentDriver ─► Transport
//! ```
//!
//! Calls for different devices proceed in parallel up to the worker limit;
//! calls for the same device queue on that device's mutex.
//!
//! # Examples
//!
//! ```
//! use benchline_core::{DeviceId, Element, SerialSettings};
//! use benchline_hardware::manager::{ConnectionManager, ManagerConfig};
//! use benchline_hardware::mock::{MockInstrumentHandle, MockOpener};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> benchline_hardware::Result<()> {
//!     let analyzer = MockInstrumentHandle::new();
//!     let opener = MockOpener::new().with_instrument("COM3", analyzer);
//!     let manager = ConnectionManager::new(ManagerConfig::default(), Arc::new(opener));
//!
//!     let device = DeviceId::new("wt310").unwrap();
//!     manager.connect(&device, SerialSettings::new("COM3")).await?;
//!
//!     let value = manager.with_driver(&device, |driver| {
//!         driver.configure(Element::Channel(1))?;
//!         driver.read_value()
//!     }).await?;
//!     assert_eq!(value, Some(0.5));
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::driver::{DriverSettings, InstrumentDriver};
use crate::error::{ConnError, DriverError, Result};
use crate::sink::{ExchangeSink, TracingSink};
use crate::traits::Instrument;
use crate::transport::{Transport, TransportOpener};
use benchline_core::constants::DEFAULT_MAX_WORKERS;
use benchline_core::{DeviceId, Element, SerialSettings};
use benchline_protocol::{Exchange, Identity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

type Link = Arc<Mutex<Box<dyn Transport>>>;

/// Configuration of a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Maximum number of blocking I/O jobs running at once.
    pub max_workers: usize,

    /// Driver tunables applied to every device.
    pub driver: DriverSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            driver: DriverSettings::default(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    #[must_use]
    pub fn with_driver(mut self, driver: DriverSettings) -> Self {
        self.driver = driver;
        self
    }
}

/// Summary of one open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub device: DeviceId,
    pub settings: SerialSettings,
    pub connected_at: DateTime<Utc>,
}

struct Slot {
    link: Link,
    settings: SerialSettings,
    connected_at: DateTime<Utc>,
}

struct Inner {
    slots: RwLock<HashMap<DeviceId, Slot>>,
    workers: Arc<Semaphore>,
    opener: Arc<dyn TransportOpener>,
    driver: Arc<DriverSettings>,
    sink: Arc<dyn ExchangeSink>,
}

/// Owner of all instrument connections. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("devices", &self.connected_devices())
            .field("available_workers", &self.inner.workers.available_permits())
            .finish()
    }
}

impl ConnectionManager {
    /// Manager logging exchanges through `tracing`.
    pub fn new(config: ManagerConfig, opener: Arc<dyn TransportOpener>) -> Self {
        Self::with_sink(config, opener, Arc::new(TracingSink))
    }

    pub fn with_sink(
        config: ManagerConfig,
        opener: Arc<dyn TransportOpener>,
        sink: Arc<dyn ExchangeSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
                opener,
                driver: Arc::new(config.driver),
                sink,
            }),
        }
    }

    /// Run a blocking job on the worker pool.
    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.inner.workers)
            .acquire_owned()
            .await
            .map_err(|_| ConnError::worker_pool("worker pool closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| ConnError::worker_pool(e.to_string()))
    }

    fn link(&self, device: &DeviceId) -> Option<Link> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .map(|slot| Arc::clone(&slot.link))
    }

    /// Close a handle once any in-flight exchange on it has finished.
    async fn close_link(&self, device: &DeviceId, link: Link) -> Result<()> {
        let mut guard = link.lock_owned().await;
        self.run_blocking(move || guard.close()).await?;
        debug!("Closed transport for {}", device);
        Ok(())
    }

    /// Open a fresh transport for `device`.
    ///
    /// An existing handle for the same device is closed first, so calling
    /// this twice always leaves exactly one live handle.
    ///
    /// # Errors
    /// `ConnError::PortUnavailable` when the port is missing, forbidden or
    /// busy; `ConnError::Open` for other open failures. No table entry is
    /// created on failure.
    pub async fn connect(&self, device: &DeviceId, settings: SerialSettings) -> Result<()> {
        let previous = self
            .inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device);
        if let Some(previous) = previous {
            info!("Reconnecting {}: closing previous handle", device);
            self.close_link(device, previous.link).await?;
        }

        let opener = Arc::clone(&self.inner.opener);
        let open_settings = settings.clone();
        let transport = self
            .run_blocking(move || opener.open(&open_settings))
            .await?
            .map_err(|e| {
                warn!("Failed to open {} on {}: {}", device, settings.port, e);
                ConnError::from_open(device, e)
            })?;

        let slot = Slot {
            link: Arc::new(Mutex::new(transport)),
            settings,
            connected_at: Utc::now(),
        };
        info!("Connected {} on {}", device, slot.settings.port);

        let displaced = self
            .inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.clone(), slot);
        // A concurrent connect for the same device lost the race
        if let Some(displaced) = displaced {
            self.close_link(device, displaced.link).await?;
        }
        Ok(())
    }

    /// Close and forget the handle for `device`. Succeeds if there is none.
    pub async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        let slot = self
            .inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device);

        match slot {
            Some(slot) => {
                self.close_link(device, slot.link).await?;
                info!("Disconnected {}", device);
            }
            None => debug!("Disconnect of {}: not connected", device),
        }
        Ok(())
    }

    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(device)
    }

    /// Devices with an open handle, sorted by id.
    pub fn connected_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        devices.sort();
        devices
    }

    pub fn connection_info(&self, device: &DeviceId) -> Option<ConnectionInfo> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .map(|slot| ConnectionInfo {
                device: device.clone(),
                settings: slot.settings.clone(),
                connected_at: slot.connected_at,
            })
    }

    /// Run `job` with exclusive use of the device's driver, on the worker pool.
    ///
    /// # Errors
    /// `ConnError::NotConnected` if there is no open handle, otherwise the
    /// driver error wrapped in `ConnError::Driver`.
    pub async fn with_driver<T, F>(&self, device: &DeviceId, job: F) -> Result<T>
    where
        F: FnOnce(&mut InstrumentDriver<'_>) -> std::result::Result<T, DriverError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let link = self
            .link(device)
            .ok_or_else(|| ConnError::not_connected(device))?;
        let mut guard = link.lock_owned().await;
        if !guard.is_open() {
            return Err(ConnError::not_connected(device));
        }

        let settings = Arc::clone(&self.inner.driver);
        let sink = Arc::clone(&self.inner.sink);
        let owner = device.clone();

        self.run_blocking(move || {
            let mut driver = InstrumentDriver::new(&mut **guard, &owner, &settings, &*sink);
            job(&mut driver)
        })
        .await?
        .map_err(|e| ConnError::driver(device, e))
    }

    /// Perform a raw exchange and return the reply line.
    pub async fn execute(&self, device: &DeviceId, exchange: Exchange) -> Result<String> {
        self.with_driver(device, move |driver| driver.exchange(&exchange))
            .await
    }

    /// Async instrument handle for `device`.
    pub fn instrument(&self, device: &DeviceId) -> RemoteInstrument {
        RemoteInstrument {
            manager: self.clone(),
            device: device.clone(),
        }
    }

    /// Close every handle; used at process teardown.
    pub async fn shutdown(&self) {
        let slots: Vec<(DeviceId, Slot)> = self
            .inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (device, slot) in slots {
            if let Err(e) = self.close_link(&device, slot.link).await {
                warn!("Failed to close {} during shutdown: {}", device, e);
            }
        }
        info!("Connection manager shut down");
    }
}

/// [`Instrument`] backed by a [`ConnectionManager`] entry.
///
/// Holds only the device id; the transport stays owned by the manager.
#[derive(Debug, Clone)]
pub struct RemoteInstrument {
    manager: ConnectionManager,
    device: DeviceId,
}

impl RemoteInstrument {
    pub fn device(&self) -> &DeviceId {
        &self.device
    }
}

impl Instrument for RemoteInstrument {
    async fn configure(&mut self, element: Element) -> Result<()> {
        self.manager
            .with_driver(&self.device, move |d| d.configure(element))
            .await
    }

    async fn read_value(&mut self) -> Result<Option<f64>> {
        self.manager
            .with_driver(&self.device, |d| d.read_value())
            .await
    }

    async fn arm_data_ready(&mut self) -> Result<()> {
        self.manager
            .with_driver(&self.device, |d| d.arm_data_ready().map(|_| ()))
            .await
    }

    async fn wait_data_ready(&mut self) -> Result<bool> {
        self.manager
            .with_driver(&self.device, |d| d.wait_data_ready())
            .await
    }

    async fn clear_event_register(&mut self) -> Result<u32> {
        self.manager
            .with_driver(&self.device, |d| d.clear_event_register())
            .await
    }

    async fn identify(&mut self) -> Result<Identity> {
        self.manager
            .with_driver(&self.device, |d| d.identify())
            .await
    }
}
