//! In-memory emulator of the power analyzer.
//!
//! [`MockInstrument`] implements [`Transport`] and answers the subset of the
//! command set the driver uses. Tests (and the station runner's emulation
//! mode) steer it through a [`MockInstrumentHandle`]: scripted readings,
//! silence, I/O failures and data-update latency.

use crate::error::TransportError;
use crate::transport::{Result, Transport};
use benchline_core::Element;
use benchline_core::constants::DEFAULT_READ_TIMEOUT_MS;
use benchline_protocol::ResponseFormat;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

/// What the emulator answers to the next value query.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// A measured value, rendered like the instrument does (`+1.23456E+02`).
    Value(f64),
    /// `NAN`: no data for the selected item.
    NoData,
    /// `INF`: input over range.
    Overrange,
    /// Verbatim reply text.
    Raw(String),
    /// No reply at all.
    Silent,
}

#[derive(Debug)]
struct EmulatorState {
    readings: VecDeque<Reading>,
    fallback: Reading,
    identity: String,
    commands: Vec<String>,
    silent: bool,
    io_failure: bool,
    update_latency: Option<Duration>,
    event_register: u32,
    element: Option<Element>,
    format: ResponseFormat,
    remote: bool,
    open_handles: usize,
}

impl Default for EmulatorState {
    fn default() -> Self {
        Self {
            readings: VecDeque::new(),
            fallback: Reading::Value(0.5),
            identity: "YOKOGAWA,WT310E,EMULATED,F1.03".to_string(),
            commands: Vec::new(),
            silent: false,
            io_failure: false,
            update_latency: Some(Duration::from_millis(10)),
            event_register: 0,
            element: None,
            format: ResponseFormat::Ascii,
            remote: false,
            open_handles: 0,
        }
    }
}

/// Outcome of one command inside a line.
enum Step {
    Reply(Option<String>),
    /// Block until data updates; `None` never updates.
    Wait(Option<Duration>),
}

/// A connection stuck in `:COMMUNICATE:WAIT`.
#[derive(Debug, Clone, Copy)]
enum Blocked {
    Until(Instant),
    Forever,
}

impl EmulatorState {
    fn process(&mut self, command: &str) -> Step {
        let upper = command.trim().to_ascii_uppercase();

        if upper == ":COMMUNICATE:WAIT 1" {
            return Step::Wait(self.update_latency);
        }

        let reply = match upper.as_str() {
            ":COMMUNICATE:REMOTE ON" => {
                self.remote = true;
                None
            }
            ":NUMERIC:FORMAT ASCII" => {
                self.format = ResponseFormat::Ascii;
                None
            }
            ":NUMERIC:FORMAT FLOAT" => {
                self.format = ResponseFormat::Float;
                None
            }
            ":NUMERIC:NORMAL:CLEAR ALL" => {
                self.element = None;
                None
            }
            ":NUMERIC:NORMAL:VALUE?" => self.next_reading(),
            ":STATUS:FILTER1 FALL" => None,
            ":STATUS:EESR?" => Some(std::mem::take(&mut self.event_register).to_string()),
            "*IDN?" => Some(self.identity.clone()),
            "*OPC?" => Some("1".to_string()),
            other => {
                if let Some(selector) = other.strip_prefix(":NUMERIC:NORMAL:ITEM1 P,") {
                    self.element = selector.parse().ok();
                } else if !other.starts_with(":NUMERIC:NORMAL:NUMBER ") {
                    trace!("Emulator ignoring unknown command {:?}", other);
                }
                None
            }
        };
        Step::Reply(reply)
    }

    fn next_reading(&mut self) -> Option<String> {
        let reading = self
            .readings
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reading {
            Reading::Value(v) => Some(format_scientific(v)),
            Reading::NoData => Some("NAN".to_string()),
            Reading::Overrange => Some("INF".to_string()),
            Reading::Raw(text) => Some(text),
            Reading::Silent => None,
        }
    }
}

/// Render `value` the way the analyzer does: `+1.23456E+02`.
fn format_scientific(value: f64) -> String {
    let sign = if value.is_sign_negative() { '-' } else { '+' };
    let text = format!("{:.5E}", value.abs());
    match text.split_once('E') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let exp_sign = if exponent < 0 { '-' } else { '+' };
            format!("{sign}{mantissa}E{exp_sign}{:02}", exponent.abs())
        }
        None => format!("{sign}{text}"),
    }
}

/// Emulated instrument connection.
///
/// Lines are executed in arrival order. A `:COMMUNICATE:WAIT` holds back the
/// rest of its line, and every line after it, until the data update; the
/// write itself returns at once, like on a serial port.
#[derive(Debug)]
pub struct MockInstrument {
    state: Arc<Mutex<EmulatorState>>,
    /// Commands not yet executed, one queue per received line.
    input: VecDeque<VecDeque<String>>,
    /// Replies of the line being executed.
    replies: Vec<String>,
    blocked: Option<Blocked>,
    output: VecDeque<u8>,
    read_timeout: Duration,
    open: bool,
    name: String,
}

impl MockInstrument {
    /// Create an emulator and the handle that steers it.
    ///
    /// # Examples
    ///
    /// ```
    /// use benchline_hardware::mock::{MockInstrument, Reading};
    /// use benchline_hardware::transport::Transport;
    ///
    /// let (mut transport, handle) = MockInstrument::new();
    /// handle.push_reading(Reading::Value(12.5));
    ///
    /// transport.write_all(b":NUMERIC:NORMAL:VALUE?\n").unwrap();
    /// let mut buf = [0u8; 64];
    /// let n = transport.read(&mut buf).unwrap();
    /// assert_eq!(&buf[..n], b"+1.25000E+01\n");
    /// ```
    pub fn new() -> (Self, MockInstrumentHandle) {
        Self::with_name("EMULATOR")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, MockInstrumentHandle) {
        let handle = MockInstrumentHandle::new();
        let instrument = handle.connect(name);
        (instrument, handle)
    }

    /// How long a read waits for data before returning empty.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn receive_line(&mut self, line: &str) {
        let mut state = self.state();
        state.commands.push(line.to_string());
        if state.silent {
            return;
        }
        drop(state);

        let commands = line
            .split(';')
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .collect();
        self.input.push_back(commands);
    }

    /// Execute queued commands until the input is empty or a wait blocks.
    fn execute(&mut self) {
        loop {
            match self.blocked {
                Some(Blocked::Until(at)) if Instant::now() >= at => {
                    self.blocked = None;
                    self.state().event_register |= 1;
                }
                Some(_) => return,
                None => {}
            }

            let Some(line) = self.input.front_mut() else {
                return;
            };
            let Some(command) = line.pop_front() else {
                self.input.pop_front();
                // Replies to queries sharing one line come back as one line
                if !self.replies.is_empty() {
                    let replies = std::mem::take(&mut self.replies);
                    self.output.extend(replies.join(";").as_bytes());
                    self.output.push_back(b'\n');
                }
                continue;
            };

            let step = self.state().process(&command);
            match step {
                Step::Reply(Some(reply)) => self.replies.push(reply),
                Step::Reply(None) => {}
                Step::Wait(Some(latency)) => {
                    self.blocked = Some(Blocked::Until(Instant::now() + latency));
                }
                Step::Wait(None) => self.blocked = Some(Blocked::Forever),
            }
        }
    }

    /// How long a read may sleep before the next data update is due.
    fn idle_wait(&self) -> Duration {
        match self.blocked {
            Some(Blocked::Until(at)) => self
                .read_timeout
                .min(at.saturating_duration_since(Instant::now())),
            _ => self.read_timeout,
        }
    }
}

impl Transport for MockInstrument {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.state().io_failure {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "emulated I/O failure",
            )));
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        for line in text.split('\n') {
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                self.receive_line(line);
            }
        }
        self.execute();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        self.execute();
        if self.output.is_empty() {
            std::thread::sleep(self.idle_wait());
            self.execute();
            if self.output.is_empty() {
                return Ok(0);
            }
        }

        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.execute();
        self.output.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.state();
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Steers a [`MockInstrument`]; cheap to clone and shared across tasks.
#[derive(Debug, Clone, Default)]
pub struct MockInstrumentHandle {
    state: Arc<Mutex<EmulatorState>>,
}

impl MockInstrumentHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection to this emulator.
    pub fn connect(&self, name: impl Into<String>) -> MockInstrument {
        self.state().open_handles += 1;
        MockInstrument {
            state: Arc::clone(&self.state),
            input: VecDeque::new(),
            replies: Vec::new(),
            blocked: None,
            output: VecDeque::new(),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            open: true,
            name: name.into(),
        }
    }

    /// Queue the reply to a future value query.
    pub fn push_reading(&self, reading: Reading) {
        self.state().readings.push_back(reading);
    }

    pub fn push_values(&self, values: impl IntoIterator<Item = f64>) {
        self.state()
            .readings
            .extend(values.into_iter().map(Reading::Value));
    }

    /// Reply used once the queue is empty.
    pub fn set_fallback(&self, reading: Reading) {
        self.state().fallback = reading;
    }

    /// Ignore every command.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Fail every write with an I/O error.
    pub fn set_io_failure(&self, failing: bool) {
        self.state().io_failure = failing;
    }

    /// Delay before a data update is flagged; `None` never flags one.
    pub fn set_update_latency(&self, latency: Option<Duration>) {
        self.state().update_latency = latency;
    }

    pub fn set_identity(&self, identity: impl Into<String>) {
        self.state().identity = identity.into();
    }

    /// Every line received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn pending_readings(&self) -> usize {
        self.state().readings.len()
    }

    pub fn element(&self) -> Option<Element> {
        self.state().element
    }

    pub fn format(&self) -> ResponseFormat {
        self.state().format
    }

    pub fn is_remote(&self) -> bool {
        self.state().remote
    }

    /// Connections opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }
}
