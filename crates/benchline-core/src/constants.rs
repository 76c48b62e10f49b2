//! Station-wide constants for instrument communication and sequencing.
//!
//! These values are the defaults used when a station configuration does not
//! override them. They are grouped by the layer that consumes them:
//!
//! | Group | Used by |
//! |-------|---------|
//! | Serial link | transport layer when opening a port |
//! | Exchange | instrument driver retry loop |
//! | Sequencing | orchestrator and event channel |
//!
//! # Usage
//!
//! ```
//! use benchline_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(DEFAULT_RETRY_BUDGET, 3);
//! let backoff = Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS);
//! assert!(backoff < Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS));
//! ```

// ============================================================================
// Serial Link
// ============================================================================

/// Default baud rate of the power analyzer RS-232 port.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout on the serial port, in milliseconds.
///
/// A read that sees no byte within this window returns empty rather than
/// failing, which the driver treats as an "empty response".
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Maximum length of a device identifier.
pub const MAX_DEVICE_ID_LEN: usize = 64;

// ============================================================================
// Exchange
// ============================================================================

/// Line terminator appended to every outbound command.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Number of attempts made for one command exchange.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Fixed pause between two attempts of the same exchange, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Upper bound for a single exchange (write plus read of one line), in milliseconds.
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 2000;

/// Device-side bound for a "wait for data ready" command, in milliseconds.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 500;

/// Longest response line accepted from an instrument, in bytes.
///
/// Anything longer is a framing fault; a numeric reply is a few dozen bytes.
pub const MAX_RESPONSE_LINE: usize = 4096;

// ============================================================================
// Sequencing
// ============================================================================

/// Number of blocking I/O workers shared by all devices.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Capacity of the bounded event queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Maximum number of state transitions kept in the sequencer history.
pub const MAX_HISTORY_SIZE: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_shorter_than_exchange_timeout() {
        assert!(DEFAULT_RETRY_BACKOFF_MS < DEFAULT_EXCHANGE_TIMEOUT_MS);
    }

    #[test]
    fn test_terminator_is_newline() {
        assert_eq!(DEFAULT_TERMINATOR, "\n");
    }
}
