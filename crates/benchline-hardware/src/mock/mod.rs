//! Mock instruments for testing and development.
//!
//! This module provides an emulated power analyzer that behaves like the real
//! instrument over a serial link, without any hardware attached.

pub mod instrument;
pub mod opener;

pub use instrument::{MockInstrument, MockInstrumentHandle, Reading};
pub use opener::MockOpener;
