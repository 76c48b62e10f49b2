//! Text command set and response handling for the WT300-family power analyzer.
//!
//! Everything in this crate is pure: commands are rendered to strings,
//! responses are parsed from strings, and the [`LineBuffer`] frames raw bytes
//! into lines. Performing the I/O is left to `benchline-hardware`.
//!
//! ```text
//! Command ──render──> Exchange ──bytes──> (wire) ──bytes──> LineBuffer ──line──> parse_*
//! ```

pub mod commands;
pub mod error;
pub mod exchange;
pub mod line;
pub mod response;

pub use commands::{Command, ResponseFormat};
pub use error::{ResponseError, Result};
pub use exchange::Exchange;
pub use line::LineBuffer;
pub use response::{Identity, parse_numeric, parse_register};
