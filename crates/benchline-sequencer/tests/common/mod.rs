//! Common test utilities for integration tests.
//!
//! [`Station`] wires a full benchline stack (connection manager, emulated
//! analyzer, in-memory catalog and store, orchestrator) so each test only
//! states the models it needs and the instrument behavior it scripts.

#![allow(dead_code)]

use benchline_core::{DeviceId, PhaseSpec, SerialSettings};
use benchline_hardware::mock::{MockInstrumentHandle, MockOpener};
use benchline_hardware::{ConnectionManager, DriverSettings, ManagerConfig};
use benchline_sequencer::collaborators::{DeviceEntry, InMemoryCatalog, MemoryStore};
use benchline_sequencer::{Event, EventKind, EventSubscriber, Orchestrator, SequencerConfig};
use std::sync::Arc;
use std::time::Duration;

pub const PORT: &str = "COM1";
pub const DEVICE: &str = "wt310";

pub struct Station {
    pub orchestrator: Orchestrator,
    pub events: EventSubscriber,
    pub analyzer: MockInstrumentHandle,
    pub opener: Arc<MockOpener>,
    pub catalog: Arc<InMemoryCatalog>,
    pub store: Arc<MemoryStore>,
}

pub fn device_id() -> DeviceId {
    DeviceId::new(DEVICE).unwrap()
}

pub fn serial_settings() -> SerialSettings {
    SerialSettings::new(PORT).with_timeout(Duration::from_millis(5))
}

/// Polling phase with short timings.
pub fn phase(name: &str, duration_ms: u64, lower: f64, upper: f64) -> PhaseSpec {
    PhaseSpec::new(name, Duration::from_millis(duration_ms), lower, upper)
        .with_interval(Duration::from_millis(20))
        .with_wait(Duration::from_millis(20))
}

impl Station {
    pub fn new() -> Self {
        Self::with_driver(DriverSettings::default())
    }

    pub fn with_driver(driver: DriverSettings) -> Self {
        let analyzer = MockInstrumentHandle::new();
        let opener = Arc::new(MockOpener::new().with_instrument(PORT, analyzer.clone()));
        let manager = ConnectionManager::new(
            ManagerConfig::default().with_driver(
                driver
                    .with_backoff(Duration::from_millis(1))
                    .with_exchange_timeout(Duration::from_millis(50))
                    .with_wait_timeout(Duration::from_millis(100)),
            ),
            opener.clone(),
        );
        let catalog = Arc::new(InMemoryCatalog::new().with_device(DeviceEntry {
            role: "analyzer".into(),
            id: device_id(),
            settings: serial_settings(),
        }));
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, events) = Orchestrator::new(
            manager,
            catalog.clone(),
            catalog.clone(),
            store.clone(),
            SequencerConfig::default(),
        );

        Self {
            orchestrator,
            events,
            analyzer,
            opener,
            catalog,
            store,
        }
    }

    pub fn with_model(self, model_id: &str, phases: Vec<PhaseSpec>) -> Self {
        self.catalog.insert_model(model_id, phases);
        self
    }

    pub async fn connect(&self) {
        self.orchestrator
            .manager()
            .connect(&device_id(), serial_settings())
            .await
            .unwrap();
    }

    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Wait for an event of `event_type`, returning it and everything before it.
    pub async fn until(&mut self, event_type: &str) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let found = event.event_type() == event_type;
            seen.push(event);
            if found {
                return seen;
            }
        }
    }

    /// Every remaining event of the running session, including anything
    /// published after the terminal event.
    pub async fn drain_session(&mut self) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        self.orchestrator.wait_until_idle().await;
        while let Some(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn event_types(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::event_type).collect()
}

pub fn count(events: &[Event], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

/// Phase indices of the `phase_complete` events, in order.
pub fn completed_indices(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::PhaseComplete { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}
