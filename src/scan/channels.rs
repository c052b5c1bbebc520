//! Channel naming and the bound handle table shared by every scan step.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::channel::Channel;
use crate::config::BeamlineConfig;
use crate::error::ScanError;

/// Fully qualified channel names for one beamline setup.
///
/// Built from the record and prefix identifiers using the usual field suffixes:
/// scan records expose `NPTS`, `P1SP`, `P1SI` and `EXSC`; motor records `VAL`,
/// `DMOV` and `VELO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelNames {
    /// Slow scan point count (`NPTS`)
    pub slow_points: String,
    /// Slow scan start position (`P1SP`)
    pub slow_start: String,
    /// Slow scan step (`P1SI`)
    pub slow_step: String,
    /// Fast scan point count (`NPTS`)
    pub fast_points: String,
    /// Fast scan start position (`P1SP`)
    pub fast_start: String,
    /// Fast scan step (`P1SI`)
    pub fast_step: String,
    /// Fast scan execute flag, busy while sweeping (`EXSC`)
    pub fast_scan_busy: String,
    /// Fast motor setpoint (`VAL`)
    pub fast_motor_position: String,
    /// Fast motor motion done (`DMOV`)
    pub fast_motor_done: String,
    /// Fast motor velocity (`VELO`)
    pub fast_motor_speed: String,
    /// Slow motor setpoint (`VAL`)
    pub slow_motor_position: String,
    /// Slow motor motion done (`DMOV`)
    pub slow_motor_done: String,
    /// Scaler channels to use (`NuseAll`)
    pub scaler_pixels: String,
    /// Scaler erase and start
    pub scaler_erase_start: String,
    /// Detector pixels per run
    pub detector_pixels: String,
    /// Detector erase and start
    pub detector_erase_start: String,
    /// Detector acquiring flag
    pub detector_acquiring: String,
    /// Capture plugin write mode
    pub capture_save_mode: String,
    /// Buffers per capture file
    pub capture_count: String,
    /// Capture plugin callbacks
    pub capture_enable: String,
    /// Capture start
    pub capture_start: String,
    /// Capture file name
    pub capture_file_name: String,
    /// Capture file number
    pub capture_file_number: String,
}

impl ChannelNames {
    /// Names for the records and prefixes in `beamline`.
    pub fn from_beamline(beamline: &BeamlineConfig) -> Self {
        let field = |record: &str, suffix: &str| format!("{}.{}", record, suffix);
        let scaler = |suffix: &str| format!("{}{}", beamline.scaler_prefix, suffix);
        let detector = |suffix: &str| format!("{}{}", beamline.detector_prefix, suffix);
        let plugin = |suffix: &str| {
            format!(
                "{}{}{}",
                beamline.detector_prefix, beamline.file_plugin, suffix
            )
        };

        Self {
            slow_points: field(&beamline.slow_scan, "NPTS"),
            slow_start: field(&beamline.slow_scan, "P1SP"),
            slow_step: field(&beamline.slow_scan, "P1SI"),
            fast_points: field(&beamline.fast_scan, "NPTS"),
            fast_start: field(&beamline.fast_scan, "P1SP"),
            fast_step: field(&beamline.fast_scan, "P1SI"),
            fast_scan_busy: field(&beamline.fast_scan, "EXSC"),
            fast_motor_position: field(&beamline.fast_motor, "VAL"),
            fast_motor_done: field(&beamline.fast_motor, "DMOV"),
            fast_motor_speed: field(&beamline.fast_motor, "VELO"),
            slow_motor_position: field(&beamline.slow_motor, "VAL"),
            slow_motor_done: field(&beamline.slow_motor, "DMOV"),
            scaler_pixels: scaler("NuseAll"),
            scaler_erase_start: scaler("EraseStart"),
            detector_pixels: detector("PixelsPerRun"),
            detector_erase_start: detector("EraseStart"),
            detector_acquiring: detector("Acquiring"),
            capture_save_mode: plugin("FileWriteMode"),
            capture_count: plugin("NumCapture"),
            capture_enable: plugin("EnableCallbacks"),
            capture_start: plugin("Capture"),
            capture_file_name: plugin("FileName"),
            capture_file_number: plugin("FileNumber"),
        }
    }

    /// Every name, in binding order.
    pub fn all(&self) -> [&str; 23] {
        [
            &self.slow_points,
            &self.slow_start,
            &self.slow_step,
            &self.fast_points,
            &self.fast_start,
            &self.fast_step,
            &self.fast_scan_busy,
            &self.fast_motor_position,
            &self.fast_motor_done,
            &self.fast_motor_speed,
            &self.slow_motor_position,
            &self.slow_motor_done,
            &self.scaler_pixels,
            &self.scaler_erase_start,
            &self.detector_pixels,
            &self.detector_erase_start,
            &self.detector_acquiring,
            &self.capture_save_mode,
            &self.capture_count,
            &self.capture_enable,
            &self.capture_start,
            &self.capture_file_name,
            &self.capture_file_number,
        ]
    }
}

/// Bound handles for one scan.
///
/// Passed by reference to every step. Only the row executor writes motor and
/// detector control channels, and rows never overlap, so no locking is needed.
#[derive(Debug, Clone)]
pub struct ScanChannels {
    /// Slow scan point count.
    pub slow_points: Channel,
    /// Slow scan start position.
    pub slow_start: Channel,
    /// Slow scan step.
    pub slow_step: Channel,
    /// Fast scan point count.
    pub fast_points: Channel,
    /// Fast scan start position.
    pub fast_start: Channel,
    /// Fast scan step.
    pub fast_step: Channel,
    /// Fast scan execute flag, busy while sweeping.
    pub fast_scan_busy: Channel,
    /// Fast motor setpoint.
    pub fast_motor_position: Channel,
    /// Fast motor motion done.
    pub fast_motor_done: Channel,
    /// Fast motor velocity.
    pub fast_motor_speed: Channel,
    /// Slow motor setpoint.
    pub slow_motor_position: Channel,
    /// Slow motor motion done.
    pub slow_motor_done: Channel,
    /// Scaler channels to use.
    pub scaler_pixels: Channel,
    /// Scaler erase and start.
    pub scaler_erase_start: Channel,
    /// Detector pixels per run.
    pub detector_pixels: Channel,
    /// Detector erase and start.
    pub detector_erase_start: Channel,
    /// Detector acquiring flag.
    pub detector_acquiring: Channel,
    /// Capture plugin write mode.
    pub capture_save_mode: Channel,
    /// Buffers per capture file.
    pub capture_count: Channel,
    /// Capture plugin callbacks.
    pub capture_enable: Channel,
    /// Capture start.
    pub capture_start: Channel,
    /// Capture file name.
    pub capture_file_name: Channel,
    /// Capture file number.
    pub capture_file_number: Channel,
}

impl ScanChannels {
    fn all(&self) -> [&Channel; 23] {
        [
            &self.slow_points,
            &self.slow_start,
            &self.slow_step,
            &self.fast_points,
            &self.fast_start,
            &self.fast_step,
            &self.fast_scan_busy,
            &self.fast_motor_position,
            &self.fast_motor_done,
            &self.fast_motor_speed,
            &self.slow_motor_position,
            &self.slow_motor_done,
            &self.scaler_pixels,
            &self.scaler_erase_start,
            &self.detector_pixels,
            &self.detector_erase_start,
            &self.detector_acquiring,
            &self.capture_save_mode,
            &self.capture_count,
            &self.capture_enable,
            &self.capture_start,
            &self.capture_file_name,
            &self.capture_file_number,
        ]
    }

    /// Release every handle, continuing past failures.
    ///
    /// Returns the failures so the caller can report them without letting them
    /// replace the error that ended the scan.
    pub async fn release_all(&self) -> Vec<ScanError> {
        release_each(self.all()).await
    }
}

/// RAII owner of a bound handle table.
///
/// [`ChannelLease::release`] releases every handle in place. If the lease is dropped
/// without that call, e.g. because the scan future was dropped by a `select!` or
/// `timeout`, the release is spawned onto the current runtime instead.
pub struct ChannelLease {
    channels: Arc<ScanChannels>,
    armed: bool,
}

impl ChannelLease {
    /// Take ownership of a resolved table.
    pub fn new(channels: ScanChannels) -> Self {
        Self {
            channels: Arc::new(channels),
            armed: true,
        }
    }

    /// Borrow the handles for the scan steps.
    pub fn channels(&self) -> &ScanChannels {
        &self.channels
    }

    /// Release every handle now. See [`ScanChannels::release_all`].
    pub async fn release(mut self) -> Vec<ScanError> {
        self.armed = false;
        self.channels.release_all().await
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Scan dropped before completion, releasing channels in background");
                let channels = Arc::clone(&self.channels);
                runtime.spawn(async move {
                    channels.release_all().await;
                });
            }
            Err(_) => warn!("Scan dropped outside a runtime, channels not released"),
        }
    }
}

pub(crate) async fn release_each<'a>(
    channels: impl IntoIterator<Item = &'a Channel>,
) -> Vec<ScanError> {
    let mut failures = Vec::new();
    for channel in channels {
        if let Err(err) = channel.release().await {
            warn!(channel = channel.name(), error = %err, "Failed to release channel");
            failures.push(err);
        }
    }
    failures
}
