//! Session event stream.
//!
//! The orchestrator publishes one ordered stream of [`Event`]s per station.
//! Push adapters (server-sent events, sockets, the station runner) drain it
//! through an [`EventSubscriber`] without knowing anything about the
//! orchestrator.
//!
//! The queue is bounded. A full queue makes the publisher wait instead of
//! dropping events, so a slow consumer slows the session down rather than
//! losing part of its record.

use benchline_core::{Element, PhaseResult, PhaseSpec, Sample, Session, SessionId};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One published record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Cause attached to a `session_error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instrument setup for a phase failed
    Configuration,
    /// Sample collection failed
    Device,
    /// The finished session could not be persisted
    Storage,
    /// The sequencer itself refused a step
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Device => write!(f, "device"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted {
        session_id: SessionId,
        barcode: String,
        model_id: String,
        device: String,
        phase_count: usize,
    },
    PhaseStarted {
        session_id: SessionId,
        index: usize,
        element: Element,
        spec: PhaseSpec,
    },
    Sample {
        session_id: SessionId,
        index: usize,
        phase: String,
        sample: Sample,
    },
    PhaseWaiting {
        session_id: SessionId,
        from_phase: String,
        to_phase: String,
        #[serde(with = "humantime_serde")]
        wait: Duration,
    },
    PhaseComplete {
        session_id: SessionId,
        index: usize,
        result: PhaseResult,
    },
    SessionComplete {
        session: Session,
    },
    SessionError {
        session_id: SessionId,
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
        message: String,
    },
    SessionAborted {
        session_id: SessionId,
        completed_phases: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
}

impl EventKind {
    /// Wire name of the event, as used in the `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::SessionStarted { .. } => "session_started",
            EventKind::PhaseStarted { .. } => "phase_started",
            EventKind::Sample { .. } => "sample",
            EventKind::PhaseWaiting { .. } => "phase_waiting",
            EventKind::PhaseComplete { .. } => "phase_complete",
            EventKind::SessionComplete { .. } => "session_complete",
            EventKind::SessionError { .. } => "session_error",
            EventKind::SessionAborted { .. } => "session_aborted",
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            EventKind::SessionComplete { session } => session.id,
            EventKind::SessionStarted { session_id, .. }
            | EventKind::PhaseStarted { session_id, .. }
            | EventKind::Sample { session_id, .. }
            | EventKind::PhaseWaiting { session_id, .. }
            | EventKind::PhaseComplete { session_id, .. }
            | EventKind::SessionError { session_id, .. }
            | EventKind::SessionAborted { session_id, .. } => *session_id,
        }
    }
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Terminal events close a session; `session_error` with kind
    /// `storage` follows an earlier terminal event and is not one itself.
    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            EventKind::SessionComplete { .. } | EventKind::SessionAborted { .. } => true,
            EventKind::SessionError { kind, .. } => *kind != ErrorKind::Storage,
            _ => false,
        }
    }

    /// Render as a server-sent-events frame.
    ///
    /// ```
    /// use benchline_core::SessionId;
    /// use benchline_sequencer::events::{Event, EventKind};
    ///
    /// let event = Event::new(EventKind::SessionAborted {
    ///     session_id: SessionId::new(),
    ///     completed_phases: 1,
    ///     phase: None,
    /// });
    /// let frame = event.to_sse().unwrap();
    /// assert!(frame.starts_with("event: session_aborted\ndata: {"));
    /// assert!(frame.ends_with("\n\n"));
    /// ```
    pub fn to_sse(&self) -> serde_json::Result<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.event_type(), data))
    }
}

/// Create a bounded event queue.
pub fn event_channel(capacity: usize) -> (EventPublisher, EventSubscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventPublisher { tx }, EventSubscriber { rx })
}

/// Producer half; clones share the queue.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Event>,
}

impl EventPublisher {
    /// Queue an event, waiting while the queue is full.
    ///
    /// Returns `false` if the subscriber is gone; the session keeps running.
    pub async fn publish(&self, kind: EventKind) -> bool {
        let event = Event::new(kind);
        let event_type = event.event_type();
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!("Dropping {} event: no subscriber", event_type);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventSubscriber {
    rx: mpsc::Receiver<Event>,
}

impl EventSubscriber {
    /// Next event; `None` once every publisher is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Adapt into a `Stream` for push adapters.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }
}
