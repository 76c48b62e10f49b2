//! End-to-end session tests against the emulated power analyzer.
//!
//! Every test runs the real connection manager, driver and orchestrator;
//! only the serial port is replaced by the in-memory emulator.

mod common;

use benchline_core::{CollectionMethod, Element, SessionOutcome};
use benchline_hardware::mock::Reading;
use benchline_hardware::{DriverSettings, PortFault};
use benchline_protocol::ResponseFormat;
use benchline_sequencer::{ErrorKind, EventKind, OrchestratorError, SequenceState};
use common::{Station, completed_indices, count, device_id, event_types, phase, serial_settings};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_phases_complete_in_order() {
    let mut station = Station::new().with_model(
        "PSU-200",
        vec![
            phase("P1", 80, 0.0, 1.0),
            phase("P2", 80, 0.0, 1.0),
            phase("P3", 80, 0.0, 1.0),
        ],
    );
    station.connect().await;

    let id = station
        .orchestrator
        .start_session("SN-0001", "PSU-200")
        .await
        .unwrap();
    let events = station.drain_session().await;

    let types = event_types(&events);
    assert_eq!(types.first(), Some(&"session_started"));
    assert_eq!(types.last(), Some(&"session_complete"));
    assert_eq!(count(&events, "session_complete"), 1);
    assert_eq!(count(&events, "phase_started"), 3);
    assert_eq!(count(&events, "phase_waiting"), 2);
    assert_eq!(completed_indices(&events), vec![0, 1, 2]);

    // Every event belongs to this session
    assert!(events.iter().all(|e| e.kind.session_id() == id));

    let stored = station.store.sessions();
    assert_eq!(stored.len(), 1);
    let session = &stored[0];
    assert_eq!(session.id, id);
    assert_eq!(session.outcome, SessionOutcome::Completed);
    assert_eq!(session.barcode, "SN-0001");
    assert!(session.overall_pass);
    assert_eq!(
        session.phases.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["P1", "P2", "P3"]
    );
    for result in &session.phases {
        assert!(result.valid_count > 0);
        let elapsed: Vec<f64> = result.samples.iter().map(|s| s.elapsed_seconds).collect();
        assert!(elapsed.windows(2).all(|w| w[0] <= w[1]));
        assert!(elapsed.iter().all(|&t| t <= 0.08 + 0.02));
        assert!(result.started_at <= result.ended_at);
    }

    // Phase 3 measured element 3
    assert_eq!(station.analyzer.element(), Some(Element::Channel(3)));
    assert!(station.analyzer.is_remote());
    assert_eq!(
        station.orchestrator.current_status().state,
        SequenceState::Idle
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_and_out_of_range_samples() {
    let mut station = Station::new().with_model("PSU-200", vec![phase("P1", 200, 0.05, 1.0)]);
    station.connect().await;
    station.analyzer.push_values([0.1]);
    station.analyzer.push_reading(Reading::NoData);
    station.analyzer.push_values([1.5]);
    station.analyzer.set_fallback(Reading::NoData);

    station
        .orchestrator
        .start_session("SN-0002", "PSU-200")
        .await
        .unwrap();
    let events = station.drain_session().await;

    let result = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::PhaseComplete { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();

    assert_eq!(result.valid_count, 2);
    assert_eq!(result.max, 1.5);
    assert_eq!(result.min, 0.1);
    assert!(!result.pass);
    assert!(result.samples.len() >= 3);
    assert_eq!(result.samples[1].value, None);

    let session = &station.store.sessions()[0];
    assert_eq!(session.outcome, SessionOutcome::Completed);
    assert!(!session.overall_pass);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_phase_without_data_fails() {
    let mut station = Station::new().with_model("PSU-200", vec![phase("P1", 60, -1.0, 1.0)]);
    station.connect().await;
    station.analyzer.set_fallback(Reading::Overrange);

    station
        .orchestrator
        .start_session("SN-0003", "PSU-200")
        .await
        .unwrap();
    station.drain_session().await;

    let phase = &station.store.sessions()[0].phases[0];
    assert_eq!(phase.valid_count, 0);
    assert_eq!((phase.min, phase.avg, phase.max), (0.0, 0.0, 0.0));
    assert!(!phase.pass);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_mid_phase() {
    let mut station = Station::new().with_model(
        "PSU-200",
        vec![
            phase("P1", 5_000, 0.0, 1.0),
            phase("P2", 5_000, 0.0, 1.0),
            phase("P3", 5_000, 0.0, 1.0),
        ],
    );
    station.connect().await;

    station
        .orchestrator
        .start_session("SN-0004", "PSU-200")
        .await
        .unwrap();
    station.until("sample").await;
    station.orchestrator.abort_session().unwrap();

    let events = station.drain_session().await;
    assert_eq!(count(&events, "session_aborted"), 1);
    assert_eq!(count(&events, "session_complete"), 0);
    match &events.last().unwrap().kind {
        EventKind::SessionAborted {
            completed_phases,
            phase,
            ..
        } => {
            assert_eq!(*completed_phases, 0);
            assert_eq!(phase.as_deref(), Some("P1"));
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    let session = &station.store.sessions()[0];
    assert_eq!(session.outcome, SessionOutcome::Aborted);
    assert!(session.phases.len() < 3);
    assert!(!session.overall_pass);
    assert!(!station.orchestrator.is_busy());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_during_wait() {
    let mut station = Station::new().with_model(
        "PSU-200",
        vec![
            phase("P1", 40, 0.0, 1.0).with_wait(Duration::from_secs(30)),
            phase("P2", 40, 0.0, 1.0),
        ],
    );
    station.connect().await;

    station
        .orchestrator
        .start_session("SN-0005", "PSU-200")
        .await
        .unwrap();
    station.until("phase_waiting").await;
    assert_eq!(
        station.orchestrator.current_status().state,
        SequenceState::Waiting(0)
    );
    station.orchestrator.abort_session().unwrap();

    let events = station.drain_session().await;
    assert_eq!(count(&events, "phase_started"), 0);
    let session = &station.store.sessions()[0];
    assert_eq!(session.outcome, SessionOutcome::Aborted);
    assert_eq!(session.phases.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_port_not_found_means_device_not_connected() {
    let station = Station::new().with_model("PSU-200", vec![phase("P1", 40, 0.0, 1.0)]);
    station.opener.set_fault(common::PORT, PortFault::NotFound);

    let err = station
        .orchestrator
        .manager()
        .connect(&device_id(), serial_settings())
        .await
        .unwrap_err();
    assert_eq!(err.port_fault(), Some(PortFault::NotFound));

    let err = station
        .orchestrator
        .start_session("SN-0006", "PSU-200")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DeviceNotConnected { .. }));
    assert!(station.orchestrator.manager().connected_devices().is_empty());
    assert!(station.store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_start_is_busy() {
    let mut station = Station::new().with_model("PSU-200", vec![phase("P1", 100, 0.0, 1.0)]);
    station.connect().await;

    let first = station
        .orchestrator
        .start_session("SN-0007", "PSU-200")
        .await
        .unwrap();
    let second = station
        .orchestrator
        .start_session("SN-0008", "PSU-200")
        .await
        .unwrap_err();
    assert!(matches!(second, OrchestratorError::SessionBusy));

    let events = station.drain_session().await;
    assert_eq!(count(&events, "session_complete"), 1);
    let stored = station.store.sessions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, first);

    // The station is free again once the first session is over
    station
        .orchestrator
        .start_session("SN-0008", "PSU-200")
        .await
        .unwrap();
    station.drain_session().await;
    assert_eq!(station.store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configuration_failure_halts_session() {
    let mut station = Station::new().with_model(
        "PSU-200",
        vec![phase("P1", 40, 0.0, 1.0), phase("P2", 40, 0.0, 1.0)],
    );
    station.connect().await;
    station.analyzer.set_silent(true);

    station
        .orchestrator
        .start_session("SN-0009", "PSU-200")
        .await
        .unwrap();
    let events = station.drain_session().await;

    assert_eq!(count(&events, "phase_started"), 1);
    assert_eq!(count(&events, "phase_complete"), 0);
    match &events.last().unwrap().kind {
        EventKind::SessionError {
            kind,
            phase,
            message,
            ..
        } => {
            assert_eq!(*kind, ErrorKind::Configuration);
            assert_eq!(phase.as_deref(), Some("P1"));
            assert!(message.contains("no response"));
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    let session = &station.store.sessions()[0];
    assert_eq!(session.outcome, SessionOutcome::Error);
    assert!(session.error.is_some());
    assert!(session.phases.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_failure_keeps_completed_phases() {
    let mut station = Station::new().with_model(
        "PSU-200",
        vec![
            phase("P1", 40, 0.0, 1.0),
            phase("P2", 5_000, 0.0, 1.0),
            phase("P3", 40, 0.0, 1.0),
        ],
    );
    station.connect().await;

    station
        .orchestrator
        .start_session("SN-0010", "PSU-200")
        .await
        .unwrap();
    station.until("phase_complete").await;
    station.until("sample").await;
    station.analyzer.set_io_failure(true);

    let events = station.drain_session().await;
    match &events.last().unwrap().kind {
        EventKind::SessionError { kind, phase, .. } => {
            assert_eq!(*kind, ErrorKind::Device);
            assert_eq!(phase.as_deref(), Some("P2"));
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }

    let session = &station.store.sessions()[0];
    assert_eq!(session.outcome, SessionOutcome::Error);
    assert_eq!(session.phases.len(), 1);
    assert!(!session.overall_pass);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_storage_failure_after_completion() {
    let mut station = Station::new().with_model("PSU-200", vec![phase("P1", 40, 0.0, 1.0)]);
    station.connect().await;
    station.store.set_failing(true);

    station
        .orchestrator
        .start_session("SN-0011", "PSU-200")
        .await
        .unwrap();
    let events = station.drain_session().await;

    let types = event_types(&events);
    let n = types.len();
    assert_eq!(&types[n - 2..], &["session_complete", "session_error"]);
    match &events[n - 1].kind {
        EventKind::SessionError { kind, .. } => assert_eq!(*kind, ErrorKind::Storage),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(station.store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_synchronized_phase() {
    let mut station = Station::new().with_model(
        "PSU-200",
        vec![phase("P1", 150, 0.0, 1.0).with_method(CollectionMethod::EventSync)],
    );
    station.connect().await;

    station
        .orchestrator
        .start_session("SN-0012", "PSU-200")
        .await
        .unwrap();
    station.drain_session().await;

    let session = &station.store.sessions()[0];
    assert!(session.phases[0].valid_count > 0);
    assert!(session.overall_pass);

    let commands = station.analyzer.commands();
    let filter = commands
        .iter()
        .position(|c| c == ":STATUS:FILTER1 FALL;*OPC?")
        .unwrap();
    let first_wait = commands
        .iter()
        .position(|c| c == ":COMMUNICATE:WAIT 1;*OPC?")
        .unwrap();
    assert!(filter < first_wait);
    assert_eq!(commands[filter + 1], ":STATUS:EESR?");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_float_format_is_refused() {
    let driver = DriverSettings::default().with_format(ResponseFormat::Float);
    let mut station =
        Station::with_driver(driver).with_model("PSU-200", vec![phase("P1", 40, 0.0, 1.0)]);
    station.connect().await;

    station
        .orchestrator
        .start_session("SN-0013", "PSU-200")
        .await
        .unwrap();
    let events = station.drain_session().await;

    match &events.last().unwrap().kind {
        EventKind::SessionError { kind, message, .. } => {
            assert_eq!(*kind, ErrorKind::Configuration);
            assert!(message.contains("FLOAT"));
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
    // Nothing reached the wire
    assert!(station.analyzer.commands().is_empty());
}
