//! Fault injection: aborted rows, timeouts, bind failures and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drain_events, floats, scan, settings};
use raster_daq::error::ScanError;
use raster_daq::hardware::{Fault, SimulatedBeamline};
use raster_daq::poll::CancelHandle;
use raster_daq::scan::{Axis, RowPhase, ScanEvent, ScanOrchestrator, ScanResolver};
use tokio_test::{assert_err, assert_ok};

#[tokio::test(start_paused = true)]
async fn test_write_failure_aborts_row_and_releases_channels() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    // Fourth velocity write is row 1's switch to sweep speed
    beamline
        .inject(Fault::WriteFails {
            channel: names.fast_motor_speed.clone(),
            nth: 4,
        })
        .await;
    let mut rx = orchestrator.subscribe();

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.row_context(), Some((1, RowPhase::SpeedSwitch)));
    match &err {
        ScanError::RowAborted { source, .. } => {
            assert!(matches!(**source, ScanError::Channel { operation: "write", .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Row 2 never started moving
    assert_eq!(
        beamline.writes_to(&names.slow_motor_position).await,
        floats(&[0.0, 0.5])
    );
    let events = drain_events(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ScanEvent::RowStarted { row_index: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(ScanEvent::Aborted {
            row_index: Some(1),
            phase: Some(RowPhase::SpeedSwitch),
            ..
        })
    ));

    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_motor_never_done_is_motion_timeout() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::NeverReady(names.slow_motor_done.clone()))
        .await;

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.row_context(), Some((0, RowPhase::SpeedSwitch)));
    match err {
        ScanError::RowAborted { source, .. } => match *source {
            ScanError::MotionTimeout { axis, channel, .. } => {
                assert_eq!(axis, Axis::Slow);
                assert_eq!(channel, names.slow_motor_done);
            }
            other => panic!("unexpected source: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_detector_stuck_acquiring_times_out_while_draining() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::NeverReady(names.detector_acquiring.clone()))
        .await;

    let err = orchestrator.run().await.unwrap_err();
    assert_eq!(err.row_context(), Some((0, RowPhase::Draining)));
    assert!(err.to_string().contains("Acquiring"));
}

#[tokio::test(start_paused = true)]
async fn test_fast_scan_stuck_busy_times_out_while_capturing() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::NeverReady(names.fast_scan_busy.clone()))
        .await;

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.row_context(), Some((0, RowPhase::Capturing)));
    match err {
        ScanError::RowAborted { source, .. } => match *source {
            ScanError::Timeout { channel, .. } => assert_eq!(channel, names.fast_scan_busy),
            other => panic!("unexpected source: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_initialization_failure_starts_no_row() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::WriteFails {
            channel: names.capture_save_mode.clone(),
            nth: 1,
        })
        .await;
    let mut rx = orchestrator.subscribe();

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, ScanError::Initialization { .. }));
    assert!(beamline.writes_to(&names.slow_motor_position).await.is_empty());
    assert!(!drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, ScanEvent::RowStarted { .. })));
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_bind_failure_releases_partial_binds() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::BindFails(names.detector_acquiring.clone()))
        .await;

    let err = orchestrator.run().await.unwrap_err();

    match err {
        ScanError::Resolution { channel, .. } => assert_eq!(channel, names.detector_acquiring),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(beamline.bind_count().await, 17);
    assert_eq!(beamline.open_handles().await, 0);
    assert!(beamline.writes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hung_bind_times_out() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::BindHangs(names.capture_file_name.clone()))
        .await;

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, ScanError::Resolution { .. }));
    assert!(err.to_string().contains("not connected within"));
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_scan_record_is_configuration_error() {
    let mut settings = settings();
    settings.simulation.rows = 0;
    let (beamline, orchestrator) = scan(settings);

    let err = assert_err!(orchestrator.run().await);

    assert!(matches!(err, ScanError::Configuration(_)));
    assert!(beamline.writes().await.is_empty());
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_release_failure_does_not_fail_scan() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::ReleaseFails(names.capture_file_number.clone()))
        .await;

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.rows_completed, 3);
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_release_failure_keeps_primary_error() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();
    beamline
        .inject(Fault::NeverReady(names.fast_motor_done.clone()))
        .await;
    beamline
        .inject(Fault::ReleaseFails(names.fast_motor_done.clone()))
        .await;

    let err = orchestrator.run().await.unwrap_err();
    match err {
        ScanError::RowAborted { phase, source, .. } => {
            assert_eq!(phase, RowPhase::Positioning);
            assert!(matches!(
                *source,
                ScanError::MotionTimeout {
                    axis: Axis::Fast,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_capture() {
    let settings = settings();
    let beamline = Arc::new(SimulatedBeamline::from_settings(&settings));
    let handle = CancelHandle::new();
    let orchestrator =
        ScanOrchestrator::new(beamline.clone(), settings).with_cancel(handle.token());
    let mut rx = orchestrator.subscribe();

    let canceller = async {
        while let Ok(event) = rx.recv().await {
            if event
                == (ScanEvent::PhaseEntered {
                    row_index: 1,
                    phase: RowPhase::Capturing,
                })
            {
                handle.cancel();
                break;
            }
        }
    };

    let (outcome, ()) = tokio::join!(orchestrator.run(), canceller);
    let err = outcome.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.row_context(), Some((1, RowPhase::Capturing)));
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start() {
    let settings = settings();
    let beamline = Arc::new(SimulatedBeamline::from_settings(&settings));
    let handle = CancelHandle::new();
    handle.cancel();
    let orchestrator =
        ScanOrchestrator::new(beamline.clone(), settings).with_cancel(handle.token());

    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, ScanError::Cancelled));
    assert!(beamline.writes().await.is_empty());
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_scan_still_releases_channels() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();

    // Cut the scan off part-way through the first row
    let outcome = tokio::time::timeout(Duration::from_millis(300), orchestrator.run()).await;
    assert!(outcome.is_err());
    assert!(!beamline.writes_to(&names.slow_motor_position).await.is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_resolver_is_repeatable() {
    let settings = settings();
    let beamline = Arc::new(SimulatedBeamline::from_settings(&settings));
    let resolver = ScanResolver::new(beamline.clone(), &settings);

    let (first, first_channels) = assert_ok!(resolver.resolve().await);
    let (second, second_channels) = assert_ok!(resolver.resolve().await);
    assert_eq!(first, second);
    assert_eq!(first.slow_target(2), 1.0);

    assert!(first_channels.release_all().await.is_empty());
    assert!(second_channels.release_all().await.is_empty());
    assert_eq!(beamline.open_handles().await, 0);
    assert!(beamline.writes().await.is_empty());
}
