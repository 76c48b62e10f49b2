//! Power analyzer driver.
//!
//! [`InstrumentDriver`] turns the command set from `benchline-protocol` into
//! request/response exchanges over a borrowed [`Transport`]. It is fully
//! synchronous and is meant to run on a worker thread; see
//! [`ConnectionManager`](crate::manager::ConnectionManager) for the async side.
//!
//! # Retry policy
//!
//! Each exchange is attempted up to `retries` times with a fixed `backoff`
//! between attempts, but only when the instrument stays silent. Transport
//! failures and replies that arrive but do not match are returned at once.
//!
//! ```text
//! clear input ─> write ─> read line ──┬─ line ───> check pattern ─> Ok
//!      ^                              └─ timeout ─> backoff ─┐
//!      └─────────────────────── attempt < retries ───────────┘
//! ```

use crate::error::DriverError;
use crate::sink::{Direction, ExchangeRecord, ExchangeSink};
use crate::transport::Transport;
use benchline_core::DeviceId;
use benchline_core::Element;
use benchline_core::constants::{
    DEFAULT_EXCHANGE_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_RETRY_BUDGET,
    DEFAULT_TERMINATOR, DEFAULT_WAIT_TIMEOUT_MS,
};
use benchline_protocol::{
    Command, Exchange, Identity, LineBuffer, ResponseFormat, parse_numeric, parse_register,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

const READ_CHUNK: usize = 256;

/// Tunables of the driver, shared by every device of a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub format: ResponseFormat,
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub exchange_timeout: Duration,
    /// Bound for one "wait for data ready" exchange.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    pub terminator: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            format: ResponseFormat::Ascii,
            retries: DEFAULT_RETRY_BUDGET,
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            exchange_timeout: Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS),
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            terminator: DEFAULT_TERMINATOR.to_string(),
        }
    }
}

impl DriverSettings {
    #[must_use]
    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

/// Driver bound to one open transport for the duration of a call.
pub struct InstrumentDriver<'a> {
    transport: &'a mut dyn Transport,
    device: &'a DeviceId,
    settings: &'a DriverSettings,
    sink: &'a dyn ExchangeSink,
    lines: LineBuffer,
}

impl<'a> InstrumentDriver<'a> {
    pub fn new(
        transport: &'a mut dyn Transport,
        device: &'a DeviceId,
        settings: &'a DriverSettings,
        sink: &'a dyn ExchangeSink,
    ) -> Self {
        Self {
            transport,
            device,
            settings,
            sink,
            lines: LineBuffer::new(),
        }
    }

    pub fn device(&self) -> &DeviceId {
        self.device
    }

    /// Apply the driver settings to a fresh exchange.
    fn prepare(&self, exchange: Exchange) -> Exchange {
        exchange
            .with_terminator(self.settings.terminator.as_str())
            .with_timeout(self.settings.exchange_timeout)
            .with_retries(self.settings.retries)
    }

    fn ensure_ascii(&self) -> Result<()> {
        match self.settings.format {
            ResponseFormat::Ascii => Ok(()),
            format => Err(DriverError::UnsupportedFormat { format }),
        }
    }

    /// Perform one exchange and return the reply line, trimmed.
    ///
    /// # Errors
    /// - `DriverError::Protocol` if every attempt stayed silent.
    /// - `DriverError::UnexpectedResponse` if the reply misses the pattern.
    /// - `DriverError::Transport` on any I/O failure.
    pub fn exchange(&mut self, exchange: &Exchange) -> Result<String> {
        let command = exchange.command();
        let wire = exchange.wire_bytes();
        let attempts = exchange.retries();

        for attempt in 1..=attempts {
            self.transport.clear_input()?;
            self.lines.clear();
            self.transport.write_all(&wire)?;
            self.sink
                .record(ExchangeRecord::new(self.device, Direction::Out, command));

            if let Some(line) = self.read_line(command, exchange.timeout())? {
                self.sink
                    .record(ExchangeRecord::new(self.device, Direction::In, line.as_str()));

                if !exchange.accepts(&line) {
                    return Err(DriverError::UnexpectedResponse {
                        command: command.to_string(),
                        response: line,
                        expected: exchange.expected_pattern().unwrap_or_default().to_string(),
                    });
                }
                return Ok(line);
            }

            warn!(
                "Empty response from {} to '{}' (attempt {}/{})",
                self.device, command, attempt, attempts
            );
            if attempt < attempts {
                std::thread::sleep(self.settings.backoff);
            }
        }

        Err(DriverError::protocol(
            command,
            format!("no response after {attempts} attempts"),
        ))
    }

    /// Read until one non-blank line arrives or `timeout` elapses.
    fn read_line(&mut self, command: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            while let Some(line) = self.lines.next_line() {
                let line = line.trim();
                if !line.is_empty() {
                    return Ok(Some(line.to_string()));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let n = self.transport.read(&mut chunk)?;
            if n > 0 {
                self.lines
                    .feed(&chunk[..n])
                    .map_err(|e| DriverError::parse(command, e))?;
            }
        }
    }

    /// Select active power of `element` as the single output item.
    ///
    /// Every setup command is confirmed with `*OPC?`.
    ///
    /// # Errors
    /// `DriverError::UnsupportedFormat` for the FLOAT format, otherwise
    /// whatever the first failing exchange returned.
    pub fn configure(&mut self, element: Element) -> Result<()> {
        self.ensure_ascii()?;

        for command in Command::setup_sequence(element, self.settings.format) {
            let exchange = self.prepare(Exchange::confirmed(&command));
            self.exchange(&exchange)?;
        }

        info!(
            "Configured {} for active power on element {} ({})",
            self.device, element, self.settings.format
        );
        Ok(())
    }

    /// Query the current value of the first output item.
    ///
    /// `Ok(None)` means the instrument reported no data (NaN/Inf).
    pub fn read_value(&mut self) -> Result<Option<f64>> {
        self.ensure_ascii()?;

        let exchange = self.prepare(Exchange::query(&Command::QueryValue));
        let line = self.exchange(&exchange)?;
        let value = parse_numeric(&line).map_err(|e| DriverError::parse(exchange.command(), e))?;

        if value.is_none() {
            debug!("{} reported no data: {:?}", self.device, line);
        }
        Ok(value)
    }

    /// Latch data-updated events and start from a clean register.
    pub fn arm_data_ready(&mut self) -> Result<u32> {
        let exchange = self.prepare(Exchange::confirmed(&Command::SetUpdateFilter));
        self.exchange(&exchange)?;
        self.clear_event_register()
    }

    /// Read (and thereby clear) the extended event register.
    pub fn clear_event_register(&mut self) -> Result<u32> {
        let exchange = self.prepare(Exchange::query(&Command::QueryEventRegister));
        let line = self.exchange(&exchange)?;
        parse_register(&line).map_err(|e| DriverError::parse(exchange.command(), e))
    }

    /// Block until the instrument flags fresh data or `wait_timeout` passes.
    ///
    /// `Ok(true)` means the update arrived in time. When it does not, the
    /// instrument is still blocked in `:COMMUNICATE:WAIT` and its `*OPC?`
    /// confirmation is owed; it is drained for up to `exchange_timeout` so
    /// that the next query reads its own reply. `Ok(false)` means the update
    /// arrived late and the link is back in sync.
    ///
    /// # Errors
    /// `DriverError::Protocol` if the confirmation never arrives. The link
    /// is out of sync and the connection should be dropped.
    pub fn wait_data_ready(&mut self) -> Result<bool> {
        let exchange = Exchange::confirmed(&Command::WaitForUpdate)
            .with_terminator(self.settings.terminator.as_str())
            .with_timeout(self.settings.wait_timeout)
            .with_retries(1);

        match self.exchange(&exchange) {
            Ok(_) => Ok(true),
            Err(DriverError::Protocol { .. }) => {
                debug!(
                    "{}: no data update within {:?}, draining late confirmation",
                    self.device, self.settings.wait_timeout
                );
                self.drain_confirmation(&exchange)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Consume the reply to an exchange that already timed out, without
    /// clearing input or sending anything.
    fn drain_confirmation(&mut self, exchange: &Exchange) -> Result<()> {
        let command = exchange.command();
        let Some(line) = self.read_line(command, self.settings.exchange_timeout)? else {
            warn!("{} still blocked in '{}'", self.device, command);
            return Err(DriverError::protocol(
                command,
                "no confirmation after timeout; link out of sync",
            ));
        };

        self.sink
            .record(ExchangeRecord::new(self.device, Direction::In, line.as_str()));
        if !exchange.accepts(&line) {
            return Err(DriverError::UnexpectedResponse {
                command: command.to_string(),
                response: line,
                expected: exchange.expected_pattern().unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }

    pub fn identify(&mut self) -> Result<Identity> {
        let exchange = self.prepare(Exchange::query(&Command::Identify));
        let line = self.exchange(&exchange)?;
        Identity::parse(&line).map_err(|e| DriverError::parse(exchange.command(), e))
    }
}
