//! Byte-oriented duplex channel to one instrument.
//!
//! A [`Transport`] is blocking: reads wait up to the configured timeout. It is
//! only ever driven from the connection manager's worker pool, never from an
//! async context.
//!
//! [`TransportOpener`] is the seam between the manager and the OS. The serial
//! implementation lives here; the in-memory emulator lives in [`crate::mock`].

use crate::error::TransportError;
use benchline_core::SerialSettings;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// An open channel to one instrument.
pub trait Transport: Send {
    /// Write every byte or fail.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`.
    ///
    /// Returns `Ok(0)` if nothing arrived within the read timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Drop any bytes received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Release the underlying handle. Further I/O fails with `Closed`.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Port name, for logs.
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens transports from serial settings.
pub trait TransportOpener: Send + Sync {
    /// # Errors
    /// Returns `TransportError::Unavailable` with the matching
    /// [`PortFault`](crate::error::PortFault)
    /// for a missing, forbidden or busy port.
    fn open(&self, settings: &SerialSettings) -> Result<Box<dyn Transport>>;
}

#[cfg(feature = "serial")]
pub use serial::{SerialOpener, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use super::{Result, Transport, TransportOpener};
    use crate::error::TransportError;
    use benchline_core::{DataBits, FlowControl, Parity, SerialSettings, StopBits};
    use serialport::{ClearBuffer, SerialPort};
    use std::io::{ErrorKind, Read, Write};
    use tracing::{debug, info};

    /// Transport over an OS serial port.
    pub struct SerialTransport {
        port: Option<Box<dyn SerialPort>>,
        name: String,
    }

    impl SerialTransport {
        fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
            self.port.as_mut().ok_or(TransportError::Closed)
        }
    }

    impl Transport for SerialTransport {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            let port = self.port()?;
            port.write_all(bytes)?;
            port.flush()?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.port()?.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        fn clear_input(&mut self) -> Result<()> {
            self.port()?
                .clear(ClearBuffer::Input)
                .map_err(|e| TransportError::Io(e.into()))
        }

        fn close(&mut self) {
            if self.port.take().is_some() {
                debug!("Closed serial port {}", self.name);
            }
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// Opens [`SerialTransport`]s through the `serialport` crate.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SerialOpener;

    impl TransportOpener for SerialOpener {
        fn open(&self, settings: &SerialSettings) -> Result<Box<dyn super::Transport>> {
            settings.validate()?;

            let port = serialport::new(&settings.port, settings.baud_rate)
                .data_bits(data_bits(settings.data_bits))
                .stop_bits(stop_bits(settings.stop_bits))
                .parity(parity(settings.parity))
                .flow_control(flow_control(settings.flow_control))
                .timeout(settings.timeout)
                .open()
                .map_err(|e| classify(&settings.port, e))?;

            info!(
                "Opened serial port {} at {} baud ({:?}, {:?} parity, {:?} stop bits)",
                settings.port,
                settings.baud_rate,
                settings.data_bits,
                settings.parity,
                settings.stop_bits
            );

            Ok(Box::new(SerialTransport {
                port: Some(port),
                name: settings.port.clone(),
            }))
        }
    }

    /// Sort an open failure into one of the three diagnosable causes.
    fn classify(port: &str, error: serialport::Error) -> TransportError {
        use crate::error::PortFault;

        let description = error.description.to_ascii_lowercase();
        let fault = match error.kind() {
            serialport::ErrorKind::NoDevice => Some(PortFault::NotFound),
            serialport::ErrorKind::Io(ErrorKind::NotFound) => Some(PortFault::NotFound),
            serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                // Windows reports a port held elsewhere as "access denied"
                if cfg!(windows) {
                    Some(PortFault::AlreadyClaimed)
                } else {
                    Some(PortFault::PermissionDenied)
                }
            }
            serialport::ErrorKind::Io(ErrorKind::AddrInUse) => Some(PortFault::AlreadyClaimed),
            _ if description.contains("busy") || description.contains("in use") => {
                Some(PortFault::AlreadyClaimed)
            }
            _ => None,
        };

        match fault {
            Some(fault) => TransportError::unavailable(port, fault),
            None => TransportError::Io(error.into()),
        }
    }

    fn data_bits(bits: DataBits) -> serialport::DataBits {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }

    fn stop_bits(bits: StopBits) -> serialport::StopBits {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }

    fn parity(parity: Parity) -> serialport::Parity {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    fn flow_control(flow: FlowControl) -> serialport::FlowControl {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }

}
