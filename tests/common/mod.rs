//! Shared fixtures for scan integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use raster_daq::channel::ChannelValue;
use raster_daq::config::Settings;
use raster_daq::hardware::SimulatedBeamline;
use raster_daq::scan::{ScanEvent, ScanOrchestrator};
use tokio::sync::broadcast;

pub const SETTINGS: &str = r#"
    [beamline]
    fast_scan = "X15U1:test:scan1"
    slow_scan = "X15U1:test:scan2"
    fast_motor = "X15U1:EH:MAN1:X"
    slow_motor = "X15U1:EH:MAN7:Z"
    scaler_prefix = "X15USIS:"
    detector_prefix = "15UdxpXMAP:"

    [scan]
    fast_speed = 1.0
    slow_speed = 0.15
    capture_file_prefix = "Scan11"

    [timing]
    bind_timeout = "1s"
    motion_timeout = "2s"
    scan_timeout = "10s"
    drain_timeout = "2s"

    [simulation]
    rows = 3
    cols = 10
    row_start = 0.0
    row_step = 0.5
"#;

pub fn settings() -> Settings {
    Settings::from_toml_str(SETTINGS).unwrap()
}

/// Orchestrator over a fresh simulated beamline built from `settings`.
pub fn scan(settings: Settings) -> (Arc<SimulatedBeamline>, ScanOrchestrator) {
    let beamline = Arc::new(SimulatedBeamline::from_settings(&settings));
    let orchestrator = ScanOrchestrator::new(beamline.clone(), settings);
    (beamline, orchestrator)
}

/// Everything published so far.
pub fn drain_events(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn floats(values: &[f64]) -> Vec<ChannelValue> {
    values.iter().copied().map(ChannelValue::Float).collect()
}
