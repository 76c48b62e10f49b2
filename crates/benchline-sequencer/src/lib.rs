//! Measurement sequencing for the benchline test station.
//!
//! A session measures one unit under test (identified by its barcode)
//! through the ordered phases of an inspection model:
//!
//! - [`state_machine`] keeps phases strictly ordered.
//! - [`collector`] acquires the samples of one phase, by polling or by
//!   waiting for the instrument's data-update event.
//! - [`orchestrator`] runs sessions, judges phases against their limits and
//!   hands finished sessions to the store.
//! - [`events`] carries progress to observers such as a live dashboard.
//! - [`collaborators`] defines the model catalog, device registry and
//!   session store boundaries, with in-memory and JSON-lines adapters.
//! - [`config`] loads a station description from TOML.

pub mod collaborators;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state_machine;

pub use config::{SequencerConfig, StationConfig};
pub use error::{ConfigError, OrchestratorError, Result, StorageError, StorageResult};
pub use events::{ErrorKind, Event, EventKind, EventPublisher, EventSubscriber, event_channel};
pub use orchestrator::{Orchestrator, StatusSnapshot};
pub use state_machine::{SequenceState, StateMachine, StateTransition};
