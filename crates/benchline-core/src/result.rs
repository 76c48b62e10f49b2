//! Samples, per-phase aggregates and the session record.

use crate::{DeviceId, PhaseSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One timestamped reading.
///
/// `value` is `None` when the instrument reported no data (NaN/Inf) for this
/// tick. It is kept in the series and skipped by aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub elapsed_seconds: f64,
    pub value: Option<f64>,
}

impl Sample {
    #[must_use]
    pub fn new(elapsed_seconds: f64, value: Option<f64>) -> Self {
        Self {
            elapsed_seconds,
            value,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }
}

/// Aggregate of one finished phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub samples: Vec<Sample>,
    pub valid_count: usize,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Population standard deviation of the valid samples.
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
    pub pass: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl PhaseResult {
    /// Aggregate `samples` against the limits of `spec`.
    ///
    /// Only samples carrying a value contribute to the statistics. With no
    /// valid sample every statistic is 0 and the phase fails.
    #[must_use]
    pub fn from_samples(
        spec: &PhaseSpec,
        samples: Vec<Sample>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let values: Vec<f64> = samples.iter().filter_map(|s| s.value).collect();
        let valid_count = values.len();

        let (min, avg, max, std_dev) = if values.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let n = valid_count as f64;
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n;
            (min, avg, max, variance.sqrt())
        };

        let pass = valid_count > 0 && values.iter().all(|&v| spec.within_limits(v));

        Self {
            name: spec.name.clone(),
            samples,
            valid_count,
            min,
            avg,
            max,
            std_dev,
            lower: spec.lower,
            upper: spec.upper,
            pass,
            started_at,
            ended_at,
        }
    }
}

/// Identity of one inspection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Error,
    Aborted,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Error => write!(f, "error"),
            SessionOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Finished inspection session, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub barcode: String,
    pub model_id: String,
    pub device: DeviceId,
    pub phases: Vec<PhaseResult>,
    pub overall_pass: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: SessionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Session under construction, owned by the sequencer while phases run.
#[derive(Debug, Clone)]
pub struct SessionDraft {
    id: SessionId,
    barcode: String,
    model_id: String,
    device: DeviceId,
    started_at: DateTime<Utc>,
    phases: Vec<PhaseResult>,
}

impl SessionDraft {
    pub fn new(
        id: SessionId,
        barcode: impl Into<String>,
        model_id: impl Into<String>,
        device: DeviceId,
    ) -> Self {
        Self {
            id,
            barcode: barcode.into(),
            model_id: model_id.into(),
            device,
            started_at: Utc::now(),
            phases: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn barcode(&self) -> &str {
        &self.barcode
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn phases(&self) -> &[PhaseResult] {
        &self.phases
    }

    pub fn push_phase(&mut self, result: PhaseResult) {
        self.phases.push(result);
    }

    /// Seal the draft with a terminal outcome.
    ///
    /// Overall pass is the AND of every phase pass, and only a completed
    /// session with at least one phase can pass.
    #[must_use]
    pub fn finish(self, outcome: SessionOutcome, error: Option<String>) -> Session {
        let overall_pass = outcome == SessionOutcome::Completed
            && !self.phases.is_empty()
            && self.phases.iter().all(|p| p.pass);

        Session {
            id: self.id,
            barcode: self.barcode,
            model_id: self.model_id,
            device: self.device,
            phases: self.phases,
            overall_pass,
            started_at: self.started_at,
            ended_at: Utc::now(),
            outcome,
            error,
        }
    }
}
