//! Audit trail of serial exchanges.
//!
//! Every line written to or read from an instrument is handed to an
//! [`ExchangeSink`]. The records are for troubleshooting only; nothing in
//! the control flow reads them back.

use benchline_core::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Out => write!(f, "OUT"),
            Self::In => write!(f, "IN"),
        }
    }
}

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub device: DeviceId,
    pub direction: Direction,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ExchangeRecord {
    pub fn new(device: &DeviceId, direction: Direction, text: impl Into<String>) -> Self {
        Self {
            device: device.clone(),
            direction,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

pub trait ExchangeSink: Send + Sync {
    fn record(&self, record: ExchangeRecord);
}

/// Emits each record as a `tracing` event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ExchangeSink for TracingSink {
    fn record(&self, record: ExchangeRecord) {
        debug!(
            device = %record.device,
            direction = %record.direction,
            text = %record.text,
            at = %record.at.to_rfc3339(),
            "serial exchange"
        );
    }
}

/// Keeps records in memory; useful in tests and diagnostics screens.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ExchangeRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExchangeRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Texts of the outbound records, in order.
    pub fn sent(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.direction == Direction::Out)
            .map(|r| r.text)
            .collect()
    }
}

impl ExchangeSink for MemorySink {
    fn record(&self, record: ExchangeRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_order() {
        let device = DeviceId::new("wt310").unwrap();
        let sink = MemorySink::new();
        sink.record(ExchangeRecord::new(&device, Direction::Out, "*IDN?"));
        sink.record(ExchangeRecord::new(&device, Direction::In, "YOKOGAWA,WT310E,X,F1"));
        sink.record(ExchangeRecord::new(&device, Direction::Out, "*OPC?"));

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].direction, Direction::In);
        assert_eq!(sink.sent(), vec!["*IDN?", "*OPC?"]);
    }

    #[test]
    fn test_record_serialization() {
        let device = DeviceId::new("wt310").unwrap();
        let record = ExchangeRecord::new(&device, Direction::Out, ":STATUS:EESR?");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["direction"], "out");
        assert_eq!(json["device"], "wt310");
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Out.to_string(), "OUT");
        assert_eq!(Direction::In.to_string(), "IN");
    }
}
