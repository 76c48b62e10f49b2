//! Description of one request/response exchange.
//!
//! An [`Exchange`] carries everything the driver needs to perform a single
//! command round trip: the outbound text, the line terminator, an optional
//! pattern the reply must match, a time budget and a retry budget. It is
//! built per call and dropped afterwards.

use crate::commands::{Command, OPC_SUFFIX};
use benchline_core::constants::{
    DEFAULT_EXCHANGE_TIMEOUT_MS, DEFAULT_RETRY_BUDGET, DEFAULT_TERMINATOR,
};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static OPC_DONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?1$").expect("Invalid operation-complete regex"));

#[derive(Debug, Clone)]
pub struct Exchange {
    command: String,
    terminator: String,
    expect: Option<Regex>,
    timeout: Duration,
    retries: u32,
}

impl Exchange {
    /// Exchange for a query command whose reply is parsed by the caller.
    pub fn query(command: &Command) -> Self {
        Self::raw(command.to_scpi())
    }

    /// Exchange for a write-only command, confirmed with `*OPC?`.
    ///
    /// The reply must be `1`; anything else is an unexpected response.
    pub fn confirmed(command: &Command) -> Self {
        Self::raw(format!("{}{OPC_SUFFIX}", command.to_scpi())).with_expect(OPC_DONE.clone())
    }

    /// Exchange for arbitrary command text.
    pub fn raw(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            terminator: DEFAULT_TERMINATOR.to_string(),
            expect: None,
            timeout: Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS),
            retries: DEFAULT_RETRY_BUDGET,
        }
    }

    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    #[must_use]
    pub fn with_expect(mut self, pattern: Regex) -> Self {
        self.expect = Some(pattern);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of attempts; clamped to at least one.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Bytes written to the transport.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.command.len() + self.terminator.len());
        bytes.extend_from_slice(self.command.as_bytes());
        bytes.extend_from_slice(self.terminator.as_bytes());
        bytes
    }

    /// Whether `response` satisfies the expected pattern, if any.
    pub fn accepts(&self, response: &str) -> bool {
        self.expect
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(response))
    }

    /// Pattern text for diagnostics.
    pub fn expected_pattern(&self) -> Option<&str> {
        self.expect.as_ref().map(Regex::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchline_core::Element;

    #[test]
    fn test_query_defaults() {
        let exchange = Exchange::query(&Command::QueryValue);
        assert_eq!(exchange.command(), ":NUMERIC:NORMAL:VALUE?");
        assert_eq!(exchange.terminator(), "\n");
        assert_eq!(exchange.retries(), DEFAULT_RETRY_BUDGET);
        assert!(exchange.accepts("anything"));
        assert_eq!(exchange.wire_bytes(), b":NUMERIC:NORMAL:VALUE?\n".to_vec());
    }

    #[test]
    fn test_confirmed_appends_opc() {
        let exchange = Exchange::confirmed(&Command::SetActivePowerItem(Element::Channel(1)));
        assert_eq!(exchange.command(), ":NUMERIC:NORMAL:ITEM1 P,1;*OPC?");
        assert!(exchange.accepts("1"));
        assert!(exchange.accepts("+1"));
        assert!(!exchange.accepts("0"));
        assert!(!exchange.accepts("10"));
        assert_eq!(exchange.expected_pattern(), Some(r"^\+?1$"));
    }

    #[test]
    fn test_builders() {
        let exchange = Exchange::raw("*IDN?")
            .with_terminator("\r\n")
            .with_timeout(Duration::from_millis(100))
            .with_retries(0);
        assert_eq!(exchange.wire_bytes(), b"*IDN?\r\n".to_vec());
        assert_eq!(exchange.timeout(), Duration::from_millis(100));
        assert_eq!(exchange.retries(), 1);
    }
}
