//! Boundaries to the systems around the sequencer.
//!
//! The orchestrator only sees these traits: where models, device settings
//! and finished sessions actually live is up to the station. The traits
//! return boxed futures so they can be held as `Arc<dyn …>`.

mod catalog;
mod store;

pub use catalog::{DeviceEntry, DeviceRegistry, InMemoryCatalog, ModelCatalog};
pub use store::{JsonLinesStore, MemoryStore, SessionStore};
