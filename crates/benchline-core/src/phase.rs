//! Phase specification: one timed measurement segment of an inspection model.

use crate::{Element, Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How samples are acquired during a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    /// Read the value at a fixed wall-clock cadence.
    #[default]
    Poll,
    /// Wait for the instrument to signal fresh data before each read.
    EventSync,
}

impl fmt::Display for CollectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CollectionMethod::Poll => write!(f, "poll"),
            CollectionMethod::EventSync => write!(f, "event_sync"),
        }
    }
}

/// Read-only description of one phase, supplied by the model catalog.
///
/// # Examples
///
/// ```
/// use benchline_core::{CollectionMethod, PhaseSpec};
/// use std::time::Duration;
///
/// let spec = PhaseSpec::new("P1", Duration::from_secs(5), 0.05, 1.0)
///     .with_interval(Duration::from_millis(250))
///     .with_wait(Duration::from_secs(2))
///     .with_method(CollectionMethod::EventSync);
/// assert!(spec.validate().is_ok());
/// assert!(spec.within_limits(0.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default, with = "humantime_serde")]
    pub wait: Duration,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub method: CollectionMethod,
    pub lower: f64,
    pub upper: f64,
    /// Element to measure; when absent the phase position picks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Element>,
}

fn default_interval() -> Duration {
    Duration::from_millis(500)
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, duration: Duration, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            duration,
            wait: Duration::ZERO,
            interval: default_interval(),
            method: CollectionMethod::default(),
            lower,
            upper,
            element: None,
        }
    }

    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: CollectionMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_element(mut self, element: Element) -> Self {
        self.element = Some(element);
        self
    }

    /// Element measured when this phase sits at position `index` of its model.
    #[must_use]
    pub fn element_for(&self, index: usize) -> Element {
        self.element.unwrap_or_else(|| Element::for_phase_index(index))
    }

    /// Inclusive limit check.
    #[must_use]
    pub fn within_limits(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// # Errors
    /// Returns `Error::InvalidPhase` for an empty name, zero duration or zero
    /// polling interval, and `Error::InvalidLimits` when the limits are not
    /// finite or are inverted.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidPhase {
                phase: self.name.clone(),
                reason: "name is empty".into(),
            });
        }
        if self.duration.is_zero() {
            return Err(Error::InvalidPhase {
                phase: self.name.clone(),
                reason: "duration must be > 0".into(),
            });
        }
        if self.method == CollectionMethod::Poll && self.interval.is_zero() {
            return Err(Error::InvalidPhase {
                phase: self.name.clone(),
                reason: "polling interval must be > 0".into(),
            });
        }
        if !self.lower.is_finite() || !self.upper.is_finite() || self.lower > self.upper {
            return Err(Error::InvalidLimits {
                phase: self.name.clone(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }
}
