//! Parsing of instrument replies.
//!
//! Numeric replies are comma-separated scientific notation
//! (`+1.234560E+02,+5.0E+00`). The instrument reports "no data", overrange
//! and similar conditions as `NAN` or `INF` tokens, which are valid
//! outcomes and map to `None` rather than to an error.

use crate::{Result, error::ResponseError};
use serde::{Deserialize, Serialize};

/// Parse the first field of a numeric reply.
///
/// # Errors
/// Returns `ResponseError::Empty` for a blank reply and
/// `ResponseError::NotNumeric` when the first field is not a number.
///
/// # Examples
///
/// ```
/// use benchline_protocol::parse_numeric;
///
/// assert_eq!(parse_numeric("+1.234560E+02").unwrap(), Some(123.456));
/// assert_eq!(parse_numeric("-NAN,1.0").unwrap(), None);
/// assert!(parse_numeric("ERR").is_err());
/// ```
pub fn parse_numeric(text: &str) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ResponseError::Empty);
    }

    let first = text.split(',').next().unwrap_or_default().trim();
    let unsigned = first.trim_start_matches(['+', '-']);
    if unsigned.eq_ignore_ascii_case("NAN") || unsigned.eq_ignore_ascii_case("INF") {
        return Ok(None);
    }

    match first.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        // "infinity" and friends parse but carry no measurement either
        Ok(_) => Ok(None),
        Err(_) => Err(ResponseError::not_numeric(first)),
    }
}

/// Parse an integer status register reply (e.g. `:STATUS:EESR?`).
///
/// # Errors
/// Returns `ResponseError::MalformedRegister` if the reply is not an
/// unsigned integer.
pub fn parse_register(text: &str) -> Result<u32> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ResponseError::Empty);
    }
    text.trim_start_matches('+')
        .parse::<u32>()
        .map_err(|_| ResponseError::malformed_register(text))
}

/// Fields of an `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
}

impl Identity {
    /// # Errors
    /// Returns `ResponseError::MalformedIdentity` when fewer than four
    /// comma-separated fields are present.
    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.trim().splitn(4, ',').map(str::trim).collect();
        match fields.as_slice() {
            [manufacturer, model, serial_number, firmware_version] => Ok(Self {
                manufacturer: (*manufacturer).to_string(),
                model: (*model).to_string(),
                serial_number: (*serial_number).to_string(),
                firmware_version: (*firmware_version).to_string(),
            }),
            _ => Err(ResponseError::malformed_identity(text.trim())),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (s/n {}, fw {})",
            self.manufacturer, self.model, self.serial_number, self.firmware_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("+1.234560E+02", 123.456)]
    #[case("1.5", 1.5)]
    #[case("  -2.5E-01,+9.9E+00  ", -0.25)]
    #[case("0", 0.0)]
    fn test_parse_numeric_values(#[case] text: &str, #[case] expected: f64) {
        let value = parse_numeric(text).unwrap().unwrap();
        assert!((value - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case("NAN")]
    #[case("+NAN")]
    #[case("-NAN")]
    #[case("nan")]
    #[case("INF")]
    #[case("+INF")]
    #[case("-INF,1.0")]
    #[case("infinity")]
    fn test_parse_numeric_no_data(#[case] text: &str) {
        assert_eq!(parse_numeric(text).unwrap(), None);
    }

    #[test]
    fn test_parse_numeric_errors() {
        assert_eq!(parse_numeric("   "), Err(ResponseError::Empty));
        assert_eq!(parse_numeric("ERROR"), Err(ResponseError::not_numeric("ERROR")));
        assert_eq!(parse_numeric(",1.0"), Err(ResponseError::not_numeric("")));
    }

    #[rstest]
    #[case("0", 0)]
    #[case("+1", 1)]
    #[case("257\r", 257)]
    fn test_parse_register(#[case] text: &str, #[case] expected: u32) {
        assert_eq!(parse_register(text).unwrap(), expected);
    }

    #[test]
    fn test_parse_register_rejects_garbage() {
        assert!(matches!(
            parse_register("-1"),
            Err(ResponseError::MalformedRegister { .. })
        ));
        assert_eq!(parse_register(""), Err(ResponseError::Empty));
    }

    #[test]
    fn test_identity_parse() {
        let id = Identity::parse("YOKOGAWA,WT310E,C2QM12345,F1.03\n").unwrap();
        assert_eq!(id.manufacturer, "YOKOGAWA");
        assert_eq!(id.model, "WT310E");
        assert_eq!(id.serial_number, "C2QM12345");
        assert_eq!(id.firmware_version, "F1.03");
        assert_eq!(id.to_string(), "YOKOGAWA WT310E (s/n C2QM12345, fw F1.03)");
    }

    #[test]
    fn test_identity_parse_too_few_fields() {
        assert!(matches!(
            Identity::parse("YOKOGAWA,WT310E"),
            Err(ResponseError::MalformedIdentity { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_scientific_notation_parses(value in -1.0e6f64..1.0e6) {
            let text = format!("{value:+.6E}");
            let parsed = parse_numeric(&text).unwrap().unwrap();
            prop_assert!((parsed - value).abs() <= value.abs() * 1e-5 + 1e-9);
        }

        #[test]
        fn prop_never_panics(text in ".*") {
            let _ = parse_numeric(&text);
            let _ = parse_register(&text);
            let _ = Identity::parse(&text);
        }
    }
}
