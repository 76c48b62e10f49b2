//! Error types for instrument I/O.
//!
//! Errors are layered the same way the code is:
//!
//! - [`TransportError`]: the byte channel itself (port missing, busy, I/O).
//! - [`DriverError`]: one command exchange went wrong (no reply, bad reply).
//! - [`ConnError`]: the connection manager could not run an operation for a
//!   device, usually wrapping one of the above.

use benchline_core::DeviceId;
use benchline_protocol::{ResponseError, ResponseFormat};
use std::fmt;

/// Result type alias for connection manager operations.
pub type Result<T> = std::result::Result<T, ConnError>;

/// Why a serial port could not be opened.
///
/// Each cause calls for a different fix at the bench, so they are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortFault {
    /// No device at that path; cable unplugged or wrong port name.
    NotFound,
    /// The OS refused access; the user lacks rights on the device node.
    PermissionDenied,
    /// Another process (or handle) holds the port.
    AlreadyClaimed,
}

impl fmt::Display for PortFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "port not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::AlreadyClaimed => write!(f, "port already in use"),
        }
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The port could not be opened.
    #[error("Port {port} unavailable: {fault}")]
    Unavailable { port: String, fault: PortFault },

    /// The handle was closed.
    #[error("Transport closed")]
    Closed,

    /// Rejected serial settings.
    #[error("Invalid serial settings: {0}")]
    Settings(#[from] benchline_core::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn unavailable(port: impl Into<String>, fault: PortFault) -> Self {
        Self::Unavailable {
            port: port.into(),
            fault,
        }
    }
}

/// Errors raised by the instrument driver for a single exchange.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// No usable reply after the retry budget was spent.
    #[error("Protocol error on '{command}': {reason}")]
    Protocol { command: String, reason: String },

    /// A reply arrived but could not be interpreted.
    #[error("Parse error on '{command}': {source}")]
    Parse {
        command: String,
        #[source]
        source: ResponseError,
    },

    /// A reply arrived but did not match the expected pattern.
    #[error("Unexpected response to '{command}': got {response:?}, expected {expected}")]
    UnexpectedResponse {
        command: String,
        response: String,
        expected: String,
    },

    /// The configured response format is not decoded.
    #[error("Unsupported response format: {format}")]
    UnsupportedFormat { format: ResponseFormat },

    /// Transport-level failure; never retried.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DriverError {
    pub fn protocol(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(command: impl Into<String>, source: ResponseError) -> Self {
        Self::Parse {
            command: command.into(),
            source,
        }
    }
}

/// Errors raised by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Opening the port failed for one of the three diagnosable causes.
    #[error("Device {device}: port {port} unavailable: {fault}")]
    PortUnavailable {
        device: DeviceId,
        port: String,
        fault: PortFault,
    },

    /// Opening the port failed for another reason.
    #[error("Device {device}: failed to open transport: {source}")]
    Open {
        device: DeviceId,
        #[source]
        source: TransportError,
    },

    /// No open handle for the device.
    #[error("Device {device} is not connected")]
    NotConnected { device: DeviceId },

    /// The driver failed while talking to the device.
    #[error("Device {device}: {source}")]
    Driver {
        device: DeviceId,
        #[source]
        source: DriverError,
    },

    /// The blocking worker pool could not run the job.
    #[error("Worker pool error: {reason}")]
    WorkerPool { reason: String },
}

impl ConnError {
    pub fn not_connected(device: &DeviceId) -> Self {
        Self::NotConnected {
            device: device.clone(),
        }
    }

    pub fn driver(device: &DeviceId, source: DriverError) -> Self {
        Self::Driver {
            device: device.clone(),
            source,
        }
    }

    pub fn worker_pool(reason: impl Into<String>) -> Self {
        Self::WorkerPool {
            reason: reason.into(),
        }
    }

    /// Map an open failure onto the manager's taxonomy.
    pub fn from_open(device: &DeviceId, error: TransportError) -> Self {
        match error {
            TransportError::Unavailable { port, fault } => Self::PortUnavailable {
                device: device.clone(),
                port,
                fault,
            },
            source => Self::Open {
                device: device.clone(),
                source,
            },
        }
    }

    /// The port fault behind this error, if any.
    pub fn port_fault(&self) -> Option<PortFault> {
        match self {
            Self::PortUnavailable { fault, .. } => Some(*fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::new("wt310").unwrap()
    }

    #[test]
    fn test_port_fault_display() {
        assert_eq!(PortFault::NotFound.to_string(), "port not found");
        assert_eq!(PortFault::PermissionDenied.to_string(), "permission denied");
        assert_eq!(PortFault::AlreadyClaimed.to_string(), "port already in use");
    }

    #[test]
    fn test_from_open_keeps_fault() {
        let err = ConnError::from_open(
            &device(),
            TransportError::unavailable("/dev/ttyUSB9", PortFault::NotFound),
        );
        assert_eq!(err.port_fault(), Some(PortFault::NotFound));
        assert_eq!(
            err.to_string(),
            "Device wt310: port /dev/ttyUSB9 unavailable: port not found"
        );
    }

    #[test]
    fn test_from_open_other() {
        let err = ConnError::from_open(&device(), TransportError::Closed);
        assert!(matches!(err, ConnError::Open { .. }));
        assert_eq!(err.port_fault(), None);
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::protocol(":NUMERIC:NORMAL:VALUE?", "no response after 3 attempts");
        assert_eq!(
            err.to_string(),
            "Protocol error on ':NUMERIC:NORMAL:VALUE?': no response after 3 attempts"
        );

        let err = DriverError::UnsupportedFormat {
            format: ResponseFormat::Float,
        };
        assert_eq!(err.to_string(), "Unsupported response format: FLOAT");
    }

    #[test]
    fn test_not_connected_display() {
        assert_eq!(
            ConnError::not_connected(&device()).to_string(),
            "Device wt310 is not connected"
        );
    }
}
