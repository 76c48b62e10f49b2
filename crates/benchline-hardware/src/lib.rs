//! Instrument I/O layer for the benchline power test station.
//!
//! This crate owns everything between a typed command and the serial line:
//!
//! - [`transport`]: the byte-level [`Transport`] trait and the OS serial port
//!   binding (feature `serial`).
//! - [`driver`]: the synchronous [`InstrumentDriver`] that performs
//!   request/response exchanges with retry, confirmation and timeouts.
//! - [`manager`]: the async [`ConnectionManager`] that keys open transports
//!   by device id and runs blocking I/O on a bounded worker pool.
//! - [`traits`]: the async [`Instrument`] abstraction the sequencer consumes.
//! - [`mock`]: an emulated analyzer for tests and the station's emulation mode.
//! - [`sink`]: the exchange audit trail.
//!
//! # Design Philosophy
//!
//! - **Blocking I/O off the runtime**: serial reads never run on an async
//!   worker thread.
//! - **One exchange per device at a time**: a device's transport sits behind
//!   its own async mutex.
//! - **Typed failures**: port faults, silence and malformed replies are
//!   distinct [`ConnError`] variants.
//!
//! # Example
//!
//! ```no_run
//! use benchline_core::{DeviceId, Element, SerialSettings};
//! use benchline_hardware::{ConnectionManager, Instrument, ManagerConfig, Result};
//! use benchline_hardware::transport::SerialOpener;
//! use std::sync::Arc;
//!
//! async fn first_reading() -> Result<Option<f64>> {
//!     let manager = ConnectionManager::new(ManagerConfig::default(), Arc::new(SerialOpener));
//!     let device = DeviceId::new("wt310").expect("valid id");
//!     manager.connect(&device, SerialSettings::new("/dev/ttyUSB0")).await?;
//!
//!     let mut analyzer = manager.instrument(&device);
//!     analyzer.configure(Element::Channel(1)).await?;
//!     analyzer.read_value().await
//! }
//! ```

pub mod driver;
pub mod error;
pub mod manager;
pub mod mock;
pub mod sink;
pub mod traits;
pub mod transport;

// Re-export commonly used types for convenience
pub use driver::{DriverSettings, InstrumentDriver};
pub use error::{ConnError, DriverError, PortFault, Result, TransportError};
pub use manager::{ConnectionInfo, ConnectionManager, ManagerConfig, RemoteInstrument};
pub use sink::{Direction, ExchangeRecord, ExchangeSink, MemorySink, TracingSink};
pub use traits::Instrument;
pub use transport::{Transport, TransportOpener};
