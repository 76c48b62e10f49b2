//! Port table mapping names to emulators or open failures.

use crate::error::{PortFault, TransportError};
use crate::mock::instrument::MockInstrumentHandle;
use crate::transport::{Result, Transport, TransportOpener};
use benchline_core::SerialSettings;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
enum PortEntry {
    Instrument(MockInstrumentHandle),
    Fault(PortFault),
}

/// [`TransportOpener`] backed by emulators.
///
/// Ports that were never registered fail with [`PortFault::NotFound`], like
/// a missing device node would.
///
/// # Examples
///
/// ```
/// use benchline_core::SerialSettings;
/// use benchline_hardware::error::{PortFault, TransportError};
/// use benchline_hardware::mock::{MockInstrumentHandle, MockOpener};
/// use benchline_hardware::transport::TransportOpener;
///
/// let analyzer = MockInstrumentHandle::new();
/// let opener = MockOpener::new()
///     .with_instrument("COM3", analyzer.clone())
///     .with_fault("COM4", PortFault::AlreadyClaimed);
///
/// assert!(opener.open(&SerialSettings::new("COM3")).is_ok());
/// assert!(matches!(
///     opener.open(&SerialSettings::new("COM4")),
///     Err(TransportError::Unavailable { fault: PortFault::AlreadyClaimed, .. })
/// ));
/// ```
#[derive(Debug, Default)]
pub struct MockOpener {
    ports: Mutex<HashMap<String, PortEntry>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_instrument(self, port: impl Into<String>, handle: MockInstrumentHandle) -> Self {
        self.insert(port, PortEntry::Instrument(handle));
        self
    }

    #[must_use]
    pub fn with_fault(self, port: impl Into<String>, fault: PortFault) -> Self {
        self.insert(port, PortEntry::Fault(fault));
        self
    }

    /// Make `port` fail from now on, e.g. to emulate an unplugged cable.
    pub fn set_fault(&self, port: impl Into<String>, fault: PortFault) {
        self.insert(port, PortEntry::Fault(fault));
    }

    fn insert(&self, port: impl Into<String>, entry: PortEntry) {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port.into(), entry);
    }
}

impl TransportOpener for MockOpener {
    fn open(&self, settings: &SerialSettings) -> Result<Box<dyn Transport>> {
        settings.validate()?;

        let entry = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&settings.port)
            .cloned();

        match entry {
            Some(PortEntry::Instrument(handle)) => Ok(Box::new(
                handle
                    .connect(settings.port.as_str())
                    .with_read_timeout(settings.timeout),
            )),
            Some(PortEntry::Fault(fault)) => {
                Err(TransportError::unavailable(&settings.port, fault))
            }
            None => Err(TransportError::unavailable(&settings.port, PortFault::NotFound)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unknown_port_not_found() {
        let err = MockOpener::new()
            .open(&SerialSettings::new("/dev/ttyUSB7"))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Unavailable {
                fault: PortFault::NotFound,
                ref port,
            } if port == "/dev/ttyUSB7"
        ));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let opener = MockOpener::new().with_instrument("COM1", MockInstrumentHandle::new());
        let settings = SerialSettings::new("COM1").with_baud_rate(0);
        assert!(matches!(opener.open(&settings), Err(TransportError::Settings(_))));
    }

    #[test]
    fn test_open_uses_settings_timeout() {
        let handle = MockInstrumentHandle::new();
        let opener = MockOpener::new().with_instrument("COM1", handle.clone());
        let settings = SerialSettings::new("COM1").with_timeout(Duration::from_millis(1));

        let mut transport = opener.open(&settings).unwrap();
        assert_eq!(transport.name(), "COM1");
        assert_eq!(handle.open_handles(), 1);

        let mut buf = [0u8; 8];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_set_fault_after_registration() {
        let opener = MockOpener::new().with_instrument("COM1", MockInstrumentHandle::new());
        opener.set_fault("COM1", PortFault::PermissionDenied);
        assert!(matches!(
            opener.open(&SerialSettings::new("COM1")),
            Err(TransportError::Unavailable { fault: PortFault::PermissionDenied, .. })
        ));
    }
}
