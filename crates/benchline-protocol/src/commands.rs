//! Command set of the power analyzer.
//!
//! Only the handful of commands needed to measure active power are modelled.
//! Each variant renders to the exact text sent on the wire, without the line
//! terminator.
//!
//! # Command Categories
//!
//! ## Setup
//! - `RemoteOn` (`:COMMUNICATE:REMOTE ON`): take the front panel out of local mode
//! - `SetFormat` (`:NUMERIC:FORMAT ASCII|FLOAT`): numeric output encoding
//! - `ClearItems` (`:NUMERIC:NORMAL:CLEAR ALL`): empty the output item list
//! - `SetActivePowerItem` (`:NUMERIC:NORMAL:ITEM1 P,<element>`): first item is active power
//! - `SetItemCount` (`:NUMERIC:NORMAL:NUMBER <n>`): number of items returned
//!
//! ## Measurement
//! - `QueryValue` (`:NUMERIC:NORMAL:VALUE?`): comma-separated item values
//!
//! ## Event synchronization
//! - `SetUpdateFilter` (`:STATUS:FILTER1 FALL`): latch the data-updated bit on its falling edge
//! - `QueryEventRegister` (`:STATUS:EESR?`): read and clear the extended event register
//! - `WaitForUpdate` (`:COMMUNICATE:WAIT 1`): block until the data-updated bit is set
//!
//! ## Common
//! - `Identify` (`*IDN?`)
//! - `OperationComplete` (`*OPC?`)
//!
//! # Examples
//!
//! ```
//! use benchline_core::Element;
//! use benchline_protocol::{Command, ResponseFormat};
//!
//! assert_eq!(
//!     Command::SetActivePowerItem(Element::Channel(2)).to_scpi(),
//!     ":NUMERIC:NORMAL:ITEM1 P,2"
//! );
//! assert_eq!(Command::SetFormat(ResponseFormat::Ascii).to_scpi(), ":NUMERIC:FORMAT ASCII");
//! assert!(Command::QueryValue.is_query());
//! ```

use benchline_core::Element;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix turning a write-only command into one that answers `1` when done.
pub const OPC_SUFFIX: &str = ";*OPC?";

/// Encoding of numeric responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Ascii,
    /// IEEE-754 block data. Not decoded by the driver.
    Float,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Ascii => "ASCII",
            ResponseFormat::Float => "FLOAT",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // Setup
    RemoteOn,
    SetFormat(ResponseFormat),
    ClearItems,
    SetActivePowerItem(Element),
    SetItemCount(u8),

    // Measurement
    QueryValue,

    // Event synchronization
    SetUpdateFilter,
    QueryEventRegister,
    WaitForUpdate,

    // Common
    Identify,
    OperationComplete,
}

impl Command {
    /// Wire text of the command, without terminator.
    pub fn to_scpi(&self) -> String {
        match self {
            Command::RemoteOn => ":COMMUNICATE:REMOTE ON".to_string(),
            Command::SetFormat(format) => format!(":NUMERIC:FORMAT {format}"),
            Command::ClearItems => ":NUMERIC:NORMAL:CLEAR ALL".to_string(),
            Command::SetActivePowerItem(element) => {
                format!(":NUMERIC:NORMAL:ITEM1 P,{}", element.selector())
            }
            Command::SetItemCount(n) => format!(":NUMERIC:NORMAL:NUMBER {n}"),
            Command::QueryValue => ":NUMERIC:NORMAL:VALUE?".to_string(),
            Command::SetUpdateFilter => ":STATUS:FILTER1 FALL".to_string(),
            Command::QueryEventRegister => ":STATUS:EESR?".to_string(),
            Command::WaitForUpdate => ":COMMUNICATE:WAIT 1".to_string(),
            Command::Identify => "*IDN?".to_string(),
            Command::OperationComplete => "*OPC?".to_string(),
        }
    }

    /// Returns `true` if the instrument answers this command on its own.
    #[inline]
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::QueryValue
                | Command::QueryEventRegister
                | Command::Identify
                | Command::OperationComplete
        )
    }

    /// Setup sequence selecting active power of `element` as the single
    /// output item, in the order the instrument expects.
    pub fn setup_sequence(element: Element, format: ResponseFormat) -> [Command; 5] {
        [
            Command::RemoteOn,
            Command::SetFormat(format),
            Command::ClearItems,
            Command::SetActivePowerItem(element),
            Command::SetItemCount(1),
        ]
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_scpi())
    }
}
