//! Sequential phase orchestrator.
//!
//! [`Orchestrator`] accepts one session at a time, runs its phases in order
//! on a spawned task and reports progress on the event stream.
//!
//! ```text
//! start_session ──► claim slot ──► resolve device + model ──► spawn
//!                     │ busy → SessionBusy
//!                     ▼
//!   for each phase: Preparing(i) ─configure─► Measuring(i) ─collect─►
//!                   phase_complete ─► Waiting(i) ─sleep(wait)─► Preparing(i+1)
//!                     ▼
//!   Completed | Error | Aborted ─► terminal event ─► store ─► Idle
//! ```
//!
//! The busy check is an in-memory slot, so a second request is rejected at
//! once even while the first session is blocked on instrument I/O.
//!
//! # Examples
//!
//! ```no_run
//! use benchline_sequencer::{Orchestrator, SequencerConfig};
//! use benchline_sequencer::collaborators::{InMemoryCatalog, MemoryStore};
//! use benchline_hardware::{ConnectionManager, ManagerConfig};
//! use benchline_hardware::mock::MockOpener;
//! use std::sync::Arc;
//!
//! # async fn demo() -> benchline_sequencer::Result<()> {
//! let manager = ConnectionManager::new(ManagerConfig::default(), Arc::new(MockOpener::new()));
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let (orchestrator, mut events) = Orchestrator::new(
//!     manager,
//!     catalog.clone(),
//!     catalog,
//!     Arc::new(MemoryStore::new()),
//!     SequencerConfig::default(),
//! );
//!
//! orchestrator.start_session("SN-0001", "PSU-200").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.event_type());
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::collaborators::{DeviceRegistry, ModelCatalog, SessionStore};
use crate::collector::collect;
use crate::config::SequencerConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{ErrorKind, EventKind, EventPublisher, EventSubscriber, event_channel};
use crate::state_machine::{SequenceState, StateMachine};
use benchline_core::{
    DeviceId, PhaseResult, PhaseSpec, Sample, SessionDraft, SessionId, SessionOutcome,
};
use benchline_hardware::{ConnectionManager, Instrument};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Point-in-time view of the station.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusSnapshot {
    pub state: SequenceState,
    pub session_id: Option<SessionId>,
    pub barcode: Option<String>,
    pub model_id: Option<String>,
    /// Name of the phase being prepared, measured or waited after.
    pub phase: Option<String>,
    pub phase_count: usize,
    /// Seconds since the session started; 0 when idle.
    pub elapsed_seconds: f64,
    pub last_sample: Option<Sample>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct Progress {
    snapshot: StatusSnapshot,
    started: Option<Instant>,
}

/// Everything a running session needs, resolved before it starts.
struct SessionPlan {
    id: SessionId,
    barcode: String,
    model_id: String,
    device: DeviceId,
    phases: Vec<PhaseSpec>,
    cancel: CancellationToken,
}

/// How a session left the phase loop.
enum Ending {
    Completed,
    Aborted {
        phase: Option<String>,
    },
    Failed {
        kind: ErrorKind,
        phase: Option<String>,
        message: String,
    },
}

impl From<OrchestratorError> for Ending {
    fn from(err: OrchestratorError) -> Self {
        Ending::Failed {
            kind: ErrorKind::Internal,
            phase: None,
            message: err.to_string(),
        }
    }
}

struct Inner {
    manager: ConnectionManager,
    catalog: Arc<dyn ModelCatalog>,
    registry: Arc<dyn DeviceRegistry>,
    store: Arc<dyn SessionStore>,
    events: EventPublisher,
    config: SequencerConfig,
    /// Abort handle of the session holding the station.
    active: Mutex<Option<CancellationToken>>,
    progress: watch::Sender<Progress>,
}

/// Holds the station slot; releasing it on drop, unwinding included.
///
/// A rejected request drops it in `start_session`. An accepted one moves it
/// into the session task, which drops it once the session is stored.
struct Claim {
    inner: Arc<Inner>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Runs measurement sessions against one station. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("state", &self.inner.progress.borrow().snapshot.state)
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator and the subscriber for its event stream.
    ///
    /// The subscriber must be drained: publishing waits while the queue is
    /// full.
    pub fn new(
        manager: ConnectionManager,
        catalog: Arc<dyn ModelCatalog>,
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn SessionStore>,
        config: SequencerConfig,
    ) -> (Self, EventSubscriber) {
        let (events, subscriber) = event_channel(config.event_capacity);
        let (progress, _) = watch::channel(Progress::default());
        let orchestrator = Self {
            inner: Arc::new(Inner {
                manager,
                catalog,
                registry,
                store,
                events,
                config,
                active: Mutex::new(None),
                progress,
            }),
        };
        (orchestrator, subscriber)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    pub fn is_busy(&self) -> bool {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start a session for `barcode` using the phases of `model_id`.
    ///
    /// Returns as soon as the session is running; progress arrives on the
    /// event stream.
    ///
    /// # Errors
    /// - `SessionBusy` if a session is already running.
    /// - `DeviceNotConnected` if the measuring device is unknown or has no
    ///   open connection.
    /// - `ModelNotFound` / `InvalidModel` if the model cannot be run.
    ///
    /// A rejected request leaves the station untouched.
    pub async fn start_session(
        &self,
        barcode: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<SessionId> {
        let barcode = barcode.into();
        let model_id = model_id.into();

        let cancel = self.inner.claim()?;
        let claim = Claim {
            inner: Arc::clone(&self.inner),
        };

        let device = self.inner.resolve_device().await?;
        let phases = self.inner.resolve_model(&model_id).await?;

        let plan = SessionPlan {
            id: SessionId::new(),
            barcode,
            model_id,
            device,
            phases,
            cancel,
        };
        let session_id = plan.id;

        self.inner.progress.send_replace(Progress {
            snapshot: StatusSnapshot {
                state: SequenceState::Preparing(0),
                session_id: Some(plan.id),
                barcode: Some(plan.barcode.clone()),
                model_id: Some(plan.model_id.clone()),
                phase: plan.phases.first().map(|p| p.name.clone()),
                phase_count: plan.phases.len(),
                elapsed_seconds: 0.0,
                last_sample: None,
                started_at: Some(Utc::now()),
            },
            started: Some(Instant::now()),
        });

        info!(
            "Session {} started: barcode {}, model {}, {} phases on {}",
            plan.id,
            plan.barcode,
            plan.model_id,
            plan.phases.len(),
            plan.device
        );
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run(plan, claim));

        Ok(session_id)
    }

    /// Ask the running session to stop at its next checkpoint.
    ///
    /// # Errors
    /// `NoActiveSession` if the station is idle.
    pub fn abort_session(&self) -> Result<()> {
        let active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                info!("Abort requested");
                token.cancel();
                Ok(())
            }
            None => Err(OrchestratorError::NoActiveSession),
        }
    }

    pub fn current_status(&self) -> StatusSnapshot {
        let progress = self.inner.progress.borrow();
        let mut snapshot = progress.snapshot.clone();
        snapshot.elapsed_seconds = progress
            .started
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        snapshot
    }

    /// Resolve once no session is running.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.progress.subscribe();
        // The sender lives in `inner`, which `self` keeps alive
        let _ = rx
            .wait_for(|p| p.snapshot.state == SequenceState::Idle)
            .await;
    }
}

impl Inner {
    /// Take the station slot, or fail fast if it is held.
    fn claim(&self) -> Result<CancellationToken> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            debug!("Rejecting session request: station busy");
            return Err(OrchestratorError::SessionBusy);
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok(token)
    }

    fn release(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = None;
        self.progress.send_replace(Progress::default());
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        self.progress.send_modify(|p| f(&mut p.snapshot));
    }

    async fn resolve_device(&self) -> Result<DeviceId> {
        let role = self.config.device_role.as_str();
        let entry = self.registry.device_config(role).await.map_err(|e| {
            warn!("No device for role '{}': {}", role, e);
            OrchestratorError::DeviceNotConnected {
                device: role.to_string(),
            }
        })?;

        if !self.manager.is_connected(&entry.id) {
            warn!("Device {} ({}) is not connected", entry.id, role);
            return Err(OrchestratorError::DeviceNotConnected {
                device: entry.id.to_string(),
            });
        }
        Ok(entry.id)
    }

    async fn resolve_model(&self, model_id: &str) -> Result<Vec<PhaseSpec>> {
        let phases = self.catalog.phase_specs(model_id).await.map_err(|e| {
            if e.is_not_found() {
                OrchestratorError::ModelNotFound {
                    model_id: model_id.to_string(),
                }
            } else {
                OrchestratorError::InvalidModel {
                    model_id: model_id.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if phases.is_empty() {
            return Err(OrchestratorError::InvalidModel {
                model_id: model_id.to_string(),
                reason: "model has no phases".into(),
            });
        }
        for phase in &phases {
            phase
                .validate()
                .map_err(|e| OrchestratorError::InvalidModel {
                    model_id: model_id.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(phases)
    }

    async fn run(self: Arc<Self>, plan: SessionPlan, _slot: Claim) {
        let mut machine = StateMachine::new();
        let mut draft = SessionDraft::new(
            plan.id,
            plan.barcode.as_str(),
            plan.model_id.as_str(),
            plan.device.clone(),
        );

        self.events
            .publish(EventKind::SessionStarted {
                session_id: plan.id,
                barcode: plan.barcode.clone(),
                model_id: plan.model_id.clone(),
                device: plan.device.to_string(),
                phase_count: plan.phases.len(),
            })
            .await;

        let ending = match self.run_phases(&plan, &mut machine, &mut draft).await {
            Ok(()) => Ending::Completed,
            Err(ending) => ending,
        };
        self.finish(&plan, &mut machine, draft, ending).await;
    }

    /// Run every phase in order. `Err` carries an early ending.
    async fn run_phases(
        &self,
        plan: &SessionPlan,
        machine: &mut StateMachine,
        draft: &mut SessionDraft,
    ) -> std::result::Result<(), Ending> {
        let mut instrument = self.manager.instrument(&plan.device);
        let count = plan.phases.len();
        machine.begin(count)?;

        for (index, spec) in plan.phases.iter().enumerate() {
            if index > 0 {
                machine.transition_to(SequenceState::Preparing(index))?;
            }
            if plan.cancel.is_cancelled() {
                return Err(Ending::Aborted {
                    phase: Some(spec.name.clone()),
                });
            }
            self.update(|s| {
                s.state = SequenceState::Preparing(index);
                s.phase = Some(spec.name.clone());
            });

            let element = spec.element_for(index);
            self.events
                .publish(EventKind::PhaseStarted {
                    session_id: plan.id,
                    index,
                    element,
                    spec: spec.clone(),
                })
                .await;

            if let Err(source) = instrument.configure(element).await {
                let err = OrchestratorError::PhaseConfigFailed {
                    phase: spec.name.clone(),
                    source,
                };
                error!("Session {}: {}", plan.id, err);
                return Err(Ending::Failed {
                    kind: ErrorKind::Configuration,
                    phase: Some(spec.name.clone()),
                    message: err.to_string(),
                });
            }

            machine.transition_to(SequenceState::Measuring(index))?;
            self.update(|s| s.state = SequenceState::Measuring(index));
            debug!(
                "Session {}: measuring {} on element {} ({})",
                plan.id, spec.name, element, spec.method
            );

            let started_at = Utc::now();
            let mut samples = Vec::new();
            {
                let mut stream = std::pin::pin!(collect(spec, &mut instrument, &plan.cancel));
                while let Some(item) = stream.next().await {
                    let sample = match item {
                        Ok(sample) => sample,
                        Err(e) => {
                            error!("Session {}: phase {} failed: {}", plan.id, spec.name, e);
                            return Err(Ending::Failed {
                                kind: ErrorKind::Device,
                                phase: Some(spec.name.clone()),
                                message: e.to_string(),
                            });
                        }
                    };
                    samples.push(sample);
                    self.update(|s| s.last_sample = Some(sample));
                    self.events
                        .publish(EventKind::Sample {
                            session_id: plan.id,
                            index,
                            phase: spec.name.clone(),
                            sample,
                        })
                        .await;
                }
            }

            if plan.cancel.is_cancelled() {
                return Err(Ending::Aborted {
                    phase: Some(spec.name.clone()),
                });
            }

            let result = PhaseResult::from_samples(spec, samples, started_at, Utc::now());
            info!(
                "Session {}: phase {} {} ({} valid samples, avg {:.4}, limits [{}, {}])",
                plan.id,
                result.name,
                if result.pass { "PASS" } else { "FAIL" },
                result.valid_count,
                result.avg,
                result.lower,
                result.upper
            );
            draft.push_phase(result.clone());
            self.events
                .publish(EventKind::PhaseComplete {
                    session_id: plan.id,
                    index,
                    result,
                })
                .await;

            if index + 1 < count {
                machine.transition_to(SequenceState::Waiting(index))?;
                self.update(|s| s.state = SequenceState::Waiting(index));
                self.events
                    .publish(EventKind::PhaseWaiting {
                        session_id: plan.id,
                        from_phase: spec.name.clone(),
                        to_phase: plan.phases[index + 1].name.clone(),
                        wait: spec.wait,
                    })
                    .await;

                tokio::select! {
                    _ = plan.cancel.cancelled() => {
                        return Err(Ending::Aborted { phase: None });
                    }
                    _ = tokio::time::sleep(spec.wait) => {}
                }
            }
        }

        Ok(())
    }

    /// Publish the terminal event and persist the session.
    async fn finish(
        &self,
        plan: &SessionPlan,
        machine: &mut StateMachine,
        draft: SessionDraft,
        ending: Ending,
    ) {
        let (state, outcome, error_text) = match &ending {
            Ending::Completed => (SequenceState::Completed, SessionOutcome::Completed, None),
            Ending::Aborted { .. } => (SequenceState::Aborted, SessionOutcome::Aborted, None),
            Ending::Failed { message, .. } => (
                SequenceState::Error,
                SessionOutcome::Error,
                Some(message.clone()),
            ),
        };
        if let Err(e) = machine.transition_to(state) {
            warn!("Session {}: {}", plan.id, e);
        }
        self.update(|s| s.state = state);

        let session = draft.finish(outcome, error_text);
        let terminal = match ending {
            Ending::Completed => {
                info!(
                    "Session {} completed: {}",
                    session.id,
                    if session.overall_pass { "PASS" } else { "FAIL" }
                );
                EventKind::SessionComplete {
                    session: session.clone(),
                }
            }
            Ending::Aborted { phase } => {
                info!(
                    "Session {} aborted after {} phases",
                    session.id,
                    session.phases.len()
                );
                EventKind::SessionAborted {
                    session_id: session.id,
                    completed_phases: session.phases.len(),
                    phase,
                }
            }
            Ending::Failed {
                kind,
                phase,
                message,
            } => EventKind::SessionError {
                session_id: session.id,
                kind,
                phase,
                message,
            },
        };
        self.events.publish(terminal).await;

        if let Err(e) = self.store.save(&session).await {
            error!("Failed to store session {}: {}", session.id, e);
            self.events
                .publish(EventKind::SessionError {
                    session_id: session.id,
                    kind: ErrorKind::Storage,
                    phase: None,
                    message: e.to_string(),
                })
                .await;
        }

        if let Err(e) = machine.reset() {
            debug!("Session {}: {}", plan.id, e);
        }
    }
}
