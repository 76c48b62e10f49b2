use crate::{
    Result,
    constants::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, MAX_DEVICE_ID_LEN},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity of one instrument on the station (e.g. `"wt310-1"`).
///
/// Non-empty printable ASCII without whitespace, at most
/// [`MAX_DEVICE_ID_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device id with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the id is empty, too long, or
    /// contains whitespace or non-ASCII characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_DEVICE_ID_LEN {
            return Err(Error::InvalidDeviceId(format!(
                "Device id must be 1-{MAX_DEVICE_ID_LEN} chars, got {}",
                id.len()
            )));
        }
        if !id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(Error::InvalidDeviceId(format!(
                "Device id must be printable ASCII without spaces: {id:?}"
            )));
        }
        Ok(DeviceId(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DeviceId::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Parity checking mode of a serial link.
///
/// Mark and space parity are not offered by the OS serial binding and are
/// rejected when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl std::str::FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(Parity::None),
            "O" | "ODD" => Ok(Parity::Odd),
            "E" | "EVEN" => Ok(Parity::Even),
            other => Err(Error::InvalidSerialSetting(format!(
                "Unsupported parity: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(Error::InvalidSerialSetting(format!(
                "Stop bits must be 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(Error::InvalidSerialSetting(format!(
                "Data bits must be 5-8, got {other}"
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial configuration of one instrument.
///
/// # Examples
///
/// ```
/// use benchline_core::{Parity, SerialSettings};
/// use std::time::Duration;
///
/// let settings = SerialSettings::new("/dev/ttyUSB0")
///     .with_baud_rate(19200)
///     .with_parity(Parity::Even)
///     .with_timeout(Duration::from_millis(500));
/// assert_eq!(settings.baud_rate, 19200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub data_bits: DataBits,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub flow_control: FlowControl,
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)
}

impl SerialSettings {
    /// Settings for `port` with the analyzer's factory defaults (9600 8N1, no flow control).
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
            flow_control: FlowControl::default(),
            timeout: default_read_timeout(),
        }
    }

    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    #[must_use]
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the settings before handing them to the OS.
    ///
    /// # Errors
    /// Returns `Error::InvalidSerialSetting` for an empty port name, a zero
    /// baud rate or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(Error::InvalidSerialSetting("Port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(Error::InvalidSerialSetting("Baud rate must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidSerialSetting("Timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Measurement element of the power analyzer.
///
/// Serialized as the selector the instrument expects: `"1"`, `"2"`, `"3"`
/// or `"SIGMA"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Element {
    Channel(u8),
    Sigma,
}

impl Element {
    pub const MAX_CHANNEL: u8 = 3;

    /// Default element for the phase at `index`: phase 0 reads channel 1 and so
    /// on. Phases beyond the last channel read the summed (sigma) element.
    #[must_use]
    pub fn for_phase_index(index: usize) -> Self {
        match u8::try_from(index + 1) {
            Ok(channel) if channel <= Self::MAX_CHANNEL => Element::Channel(channel),
            _ => Element::Sigma,
        }
    }

    /// Selector text used in `:NUMERIC:NORMAL:ITEM1 P,<selector>`.
    #[must_use]
    pub fn selector(&self) -> String {
        match self {
            Element::Channel(n) => n.to_string(),
            Element::Sigma => "SIGMA".to_string(),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.selector())
    }
}

impl std::str::FromStr for Element {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("SIGMA") {
            return Ok(Element::Sigma);
        }
        match s.parse::<u8>() {
            Ok(n) if (1..=Self::MAX_CHANNEL).contains(&n) => Ok(Element::Channel(n)),
            _ => Err(Error::InvalidElement(s.to_string())),
        }
    }
}

impl TryFrom<String> for Element {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Element> for String {
    fn from(element: Element) -> Self {
        element.selector()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_device_id_valid() {
        let id = DeviceId::new("wt310-1").unwrap();
        assert_eq!(id.as_str(), "wt310-1");
        assert_eq!(id.to_string(), "wt310-1");
    }

    #[rstest]
    #[case("")]
    #[case("has space")]
    #[case("wt310\u{e9}")]
    fn test_device_id_invalid(#[case] raw: &str) {
        assert!(DeviceId::new(raw).is_err());
    }

    #[test]
    fn test_device_id_too_long() {
        let raw = "x".repeat(MAX_DEVICE_ID_LEN + 1);
        assert!(matches!(DeviceId::new(raw), Err(Error::InvalidDeviceId(_))));
    }

    #[test]
    fn test_device_id_serde_rejects_invalid() {
        let result: std::result::Result<DeviceId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[rstest]
    #[case("N", Parity::None)]
    #[case("none", Parity::None)]
    #[case("O", Parity::Odd)]
    #[case("even", Parity::Even)]
    fn test_parity_from_str(#[case] raw: &str, #[case] expected: Parity) {
        assert_eq!(raw.parse::<Parity>().unwrap(), expected);
    }

    #[rstest]
    #[case("M")]
    #[case("space")]
    fn test_parity_mark_space_rejected(#[case] raw: &str) {
        assert!(raw.parse::<Parity>().is_err());
    }

    #[test]
    fn test_stop_and_data_bits_bounds() {
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(3).is_err());
        assert_eq!(DataBits::try_from(7).unwrap(), DataBits::Seven);
        assert!(DataBits::try_from(9).is_err());
    }

    #[test]
    fn test_serial_settings_defaults() {
        let settings = SerialSettings::new("COM3");
        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.flow_control, FlowControl::None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_serial_settings_validate() {
        assert!(SerialSettings::new("  ").validate().is_err());
        assert!(SerialSettings::new("COM3").with_baud_rate(0).validate().is_err());
        assert!(
            SerialSettings::new("COM3")
                .with_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_serial_settings_deserialize_with_defaults() {
        let json =
            r#"{"port": "/dev/ttyUSB0", "parity": "even", "stop_bits": 2, "timeout": "250ms"}"#;
        let settings: SerialSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.timeout, Duration::from_millis(250));
    }

    #[rstest]
    #[case(0, Element::Channel(1))]
    #[case(1, Element::Channel(2))]
    #[case(2, Element::Channel(3))]
    #[case(3, Element::Sigma)]
    fn test_element_for_phase_index(#[case] index: usize, #[case] expected: Element) {
        assert_eq!(Element::for_phase_index(index), expected);
    }

    #[test]
    fn test_element_parse_and_display() {
        assert_eq!("sigma".parse::<Element>().unwrap(), Element::Sigma);
        assert_eq!("2".parse::<Element>().unwrap(), Element::Channel(2));
        assert!("4".parse::<Element>().is_err());
        assert!("0".parse::<Element>().is_err());
        assert_eq!(Element::Channel(3).to_string(), "3");
        assert_eq!(Element::Sigma.to_string(), "SIGMA");
    }
}
