//! End-to-end raster scans against the simulated beamline.

mod common;

use common::{drain_events, floats, scan, settings};
use raster_daq::channel::ChannelValue;
use raster_daq::hardware::Op;
use raster_daq::scan::{RowPhase, ScanEvent};

#[tokio::test(start_paused = true)]
async fn test_three_row_scan_writes_expected_sequence() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.rows_completed, 3);
    assert_eq!(report.config.row_count, 3);
    assert_eq!(report.config.col_count, 10);
    assert_eq!(report.plan.buffers_per_row, 1);

    // Slow axis visits each row target once, in order
    assert_eq!(
        beamline.writes_to(&names.slow_motor_position).await,
        floats(&[0.0, 0.5, 1.0])
    );

    // Fast velocity: approach speed then sweep speed, once per row
    assert_eq!(
        beamline.writes_to(&names.fast_motor_speed).await,
        floats(&[1.0, 0.15, 1.0, 0.15, 1.0, 0.15])
    );

    // One capture start from initialization plus one re-arm per row
    assert_eq!(beamline.writes_to(&names.capture_start).await.len(), 4);

    // Scan started and erases issued once per row
    assert_eq!(beamline.writes_to(&names.fast_scan_busy).await.len(), 3);
    assert_eq!(beamline.writes_to(&names.scaler_erase_start).await.len(), 3);
    assert_eq!(beamline.writes_to(&names.detector_erase_start).await.len(), 3);

    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_initialization_precedes_first_row() {
    let (beamline, orchestrator) = scan(settings());
    let names = beamline.names().clone();

    orchestrator.run().await.unwrap();

    assert_eq!(
        beamline.writes_to(&names.scaler_pixels).await,
        vec![ChannelValue::Int(10)]
    );
    assert_eq!(
        beamline.writes_to(&names.detector_pixels).await,
        vec![ChannelValue::Int(10)]
    );
    assert_eq!(
        beamline.writes_to(&names.capture_count).await,
        vec![ChannelValue::Int(1)]
    );
    assert_eq!(
        beamline.writes_to(&names.capture_save_mode).await,
        vec![ChannelValue::Int(2)]
    );
    assert_eq!(
        beamline.writes_to(&names.capture_file_name).await,
        vec![ChannelValue::Text("Scan11\0".to_string())]
    );
    assert_eq!(
        beamline.writes_to(&names.capture_file_number).await,
        vec![ChannelValue::Int(1)]
    );

    let writes = beamline.writes().await;
    let position = |channel: &str| writes.iter().position(|(name, _)| name == channel);
    let pixels = position(names.detector_pixels.as_str()).unwrap();
    let first_move = position(names.slow_motor_position.as_str()).unwrap();
    assert!(pixels < first_move);
}

#[tokio::test(start_paused = true)]
async fn test_every_row_walks_all_phases_in_order() {
    let (_beamline, orchestrator) = scan(settings());
    let mut rx = orchestrator.subscribe();

    orchestrator.run().await.unwrap();
    let events = drain_events(&mut rx);

    assert!(matches!(events.first(), Some(ScanEvent::Initialized { .. })));
    assert_eq!(
        events.last(),
        Some(&ScanEvent::Finished { rows_completed: 3 })
    );

    for row in 0..3 {
        let phases: Vec<RowPhase> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::PhaseEntered { row_index, phase } if *row_index == row => Some(*phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, RowPhase::SEQUENCE.to_vec(), "row {}", row);
    }

    // Row n completes before row n + 1 starts
    let order: Vec<(usize, bool)> = events
        .iter()
        .filter_map(|event| match event {
            ScanEvent::RowStarted { row_index, .. } => Some((*row_index, true)),
            ScanEvent::RowCompleted { row_index } => Some((*row_index, false)),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec![(0, true), (0, false), (1, true), (1, false), (2, true), (2, false)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_report_lists_one_capture_file_per_row() {
    let mut settings = settings();
    settings.scan.starting_file_index = 7;
    let (_beamline, orchestrator) = scan(settings);

    let report = orchestrator.run().await.unwrap();
    let numbers: Vec<u32> = report.capture_files.iter().map(|f| f.file_number).collect();
    assert_eq!(numbers, vec![7, 8, 9]);
    assert!(report
        .capture_files
        .iter()
        .all(|file| file.file_name == "Scan11"));
    assert!(report.finished_at >= report.started_at);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["rows_completed"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_single_row_scan() {
    let mut settings = settings();
    settings.simulation.rows = 1;
    settings.simulation.row_start = 2.25;
    let (beamline, orchestrator) = scan(settings);
    let names = beamline.names().clone();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.rows_completed, 1);
    assert_eq!(
        beamline.writes_to(&names.slow_motor_position).await,
        floats(&[2.25])
    );
    assert_eq!(beamline.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_capture_not_rearmed_when_disabled() {
    let mut settings = settings();
    settings.scan.rearm_capture_each_row = false;
    settings.scan.enable_capture_callbacks = false;
    let (beamline, orchestrator) = scan(settings);
    let names = beamline.names().clone();

    orchestrator.run().await.unwrap();
    assert_eq!(beamline.writes_to(&names.capture_start).await.len(), 1);
    assert!(beamline.writes_to(&names.capture_enable).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_buffers_per_row_rounds_up() {
    let mut settings = settings();
    settings.simulation.rows = 1;
    settings.simulation.cols = 250;
    let (beamline, orchestrator) = scan(settings);
    let names = beamline.names().clone();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.plan.buffers_per_row, 3);
    assert_eq!(
        beamline.writes_to(&names.capture_count).await,
        vec![ChannelValue::Int(3)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_bind_is_released() {
    let (beamline, orchestrator) = scan(settings());
    orchestrator.run().await.unwrap();

    let journal = beamline.journal().await;
    let binds = journal.iter().filter(|e| e.op == Op::Bind).count();
    let releases = journal.iter().filter(|e| e.op == Op::Release).count();
    assert_eq!(binds, 23);
    assert_eq!(releases, 23);
}
