//! Async instrument abstraction.
//!
//! The sample collector and the sequencer talk to an instrument through
//! [`Instrument`], never through a transport. The production implementation
//! is [`RemoteInstrument`](crate::manager::RemoteInstrument), which runs every
//! call on the connection manager's worker pool; tests substitute a scripted
//! fake.
//!
//! The trait uses native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT).
//! Callers that spawn work use a concrete type so the futures stay `Send`.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use benchline_core::Element;
use benchline_protocol::Identity;

/// One connected power analyzer.
pub trait Instrument: Send {
    /// Select active power of `element` as the single output item.
    async fn configure(&mut self, element: Element) -> Result<()>;

    /// Current value; `None` when the instrument has no data.
    async fn read_value(&mut self) -> Result<Option<f64>>;

    /// Enable data-update events and clear the event register.
    async fn arm_data_ready(&mut self) -> Result<()>;

    /// Wait (bounded) for a data update. `false` means the update came after
    /// the wait timed out; an update that never comes is an error.
    async fn wait_data_ready(&mut self) -> Result<bool>;

    /// Read and clear the event register, returning its previous value.
    async fn clear_event_register(&mut self) -> Result<u32>;

    async fn identify(&mut self) -> Result<Identity>;
}
