//! Row Scan Executor.
//!
//! Drives one slow-axis row through a fixed sequence of phases:
//!
//! | Phase | Entry action | Leaves when |
//! |---|---|---|
//! | `Positioning` | re-arm capture, fast velocity = fast speed, fast axis to row start, slow axis to target | fast axis motion done |
//! | `SpeedSwitch` | fast velocity = slow speed | slow axis motion done |
//! | `Arming` | erase scaler, erase detector | erase settle delay elapsed |
//! | `Capturing` | start the fast scan | fast scan no longer busy |
//! | `Draining` | - | detector no longer acquiring |
//! | `Complete` | - | row settle delay elapsed |
//!
//! A phase is only left once the hardware has confirmed it. The fast-axis speed is
//! lowered while the slow axis is still settling, and the detector electronics
//! must see the settle delay after an erase before the sweep starts.
//!
//! Every wait is bounded and checks the cancel token between polls. Any failure
//! aborts the row with [`ScanError::RowAborted`], naming the row and phase.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, Instrument};

use crate::config::TimingConfig;
use crate::error::{ScanError, ScanResult};
use crate::poll::{pause, CancelToken};
use crate::scan::channels::ScanChannels;
use crate::scan::events::ScanEvent;
use crate::scan::plan::{Axis, ScanConfig};

/// Phase of a single row, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowPhase {
    /// Capture re-armed, both motors sent to the row start, fast motor settled.
    Positioning,
    /// Fast axis switched to sweep speed, slow motor settled.
    SpeedSwitch,
    /// Scaler and detector erased.
    Arming,
    /// Fast scan running.
    Capturing,
    /// Waiting for the detector to stop acquiring.
    Draining,
    /// Row settle delay.
    Complete,
}

impl RowPhase {
    /// All phases in the order a row visits them.
    pub const SEQUENCE: [RowPhase; 6] = [
        RowPhase::Positioning,
        RowPhase::SpeedSwitch,
        RowPhase::Arming,
        RowPhase::Capturing,
        RowPhase::Draining,
        RowPhase::Complete,
    ];

    /// Following phase, `None` after `Complete`.
    pub fn next(self) -> Option<RowPhase> {
        match self {
            RowPhase::Positioning => Some(RowPhase::SpeedSwitch),
            RowPhase::SpeedSwitch => Some(RowPhase::Arming),
            RowPhase::Arming => Some(RowPhase::Capturing),
            RowPhase::Capturing => Some(RowPhase::Draining),
            RowPhase::Draining => Some(RowPhase::Complete),
            RowPhase::Complete => None,
        }
    }
}

impl fmt::Display for RowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowPhase::Positioning => "Positioning",
            RowPhase::SpeedSwitch => "SpeedSwitch",
            RowPhase::Arming => "Arming",
            RowPhase::Capturing => "Capturing",
            RowPhase::Draining => "Draining",
            RowPhase::Complete => "Complete",
        };
        f.write_str(name)
    }
}

/// Whether capture-start is issued again at the beginning of each row.
///
/// The initializer already starts capture once. Re-issuing it per row matches the
/// established procedure; `InitializerOnly` skips the per-row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureRearm {
    /// Write capture-start at the start of every row.
    EveryRow,
    /// Rely on the initializer's single capture-start.
    InitializerOnly,
}

impl CaptureRearm {
    /// Map `scan.rearm_capture_each_row`.
    pub fn from_flag(rearm_each_row: bool) -> Self {
        if rearm_each_row {
            CaptureRearm::EveryRow
        } else {
            CaptureRearm::InitializerOnly
        }
    }
}

/// Transient state of the row being executed. Never outlives the row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowState {
    /// Row being executed.
    pub row_index: usize,
    /// Slow-axis position for the row.
    pub target_slow_position: f64,
    /// Current phase.
    pub phase: RowPhase,
}

impl RowState {
    fn new(row_index: usize, target_slow_position: f64) -> Self {
        Self {
            row_index,
            target_slow_position,
            phase: RowPhase::Positioning,
        }
    }
}

/// Executes rows against a bound handle table.
pub struct RowScanExecutor<'a> {
    channels: &'a ScanChannels,
    config: &'a ScanConfig,
    timing: TimingConfig,
    rearm: CaptureRearm,
    cancel: CancelToken,
    events: Option<broadcast::Sender<ScanEvent>>,
}

impl<'a> RowScanExecutor<'a> {
    /// Executor without an event sink.
    pub fn new(
        channels: &'a ScanChannels,
        config: &'a ScanConfig,
        timing: TimingConfig,
        rearm: CaptureRearm,
        cancel: CancelToken,
    ) -> Self {
        Self {
            channels,
            config,
            timing,
            rearm,
            cancel,
            events: None,
        }
    }

    /// Publish phase milestones on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<ScanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }

    /// Run one row to `Complete`.
    ///
    /// Returns the final row state. On failure the error carries the row index and
    /// the phase that was in progress.
    pub async fn run_row(&self, row_index: usize) -> ScanResult<RowState> {
        let mut state = RowState::new(row_index, self.config.slow_target(row_index));
        let span = info_span!("row", row = row_index);

        async move {
            info!(slow_target = state.target_slow_position, "Slow axis target");
            self.emit(ScanEvent::RowStarted {
                row_index,
                slow_target: state.target_slow_position,
            });

            loop {
                debug!(phase = %state.phase, "Entering phase");
                self.emit(ScanEvent::PhaseEntered {
                    row_index,
                    phase: state.phase,
                });

                if let Err(source) = self.run_phase(&state).await {
                    return Err(ScanError::RowAborted {
                        row_index,
                        phase: state.phase,
                        source: Box::new(source),
                    });
                }

                match state.phase.next() {
                    Some(next) => state.phase = next,
                    None => break,
                }
            }

            info!(rows_done = row_index + 1, "Row complete");
            self.emit(ScanEvent::RowCompleted { row_index });
            Ok(state)
        }
        .instrument(span)
        .await
    }

    async fn run_phase(&self, state: &RowState) -> ScanResult<()> {
        self.cancel.check()?;
        match state.phase {
            RowPhase::Positioning => self.position(state).await,
            RowPhase::SpeedSwitch => self.switch_speed().await,
            RowPhase::Arming => self.erase_detector().await,
            RowPhase::Capturing => self.capture().await,
            RowPhase::Draining => self.drain().await,
            RowPhase::Complete => pause(self.timing.row_settle, &self.cancel).await,
        }
    }

    /// Issue capture-start for the row, unless re-arming is disabled.
    pub async fn arm_capture_for_row(&self, row_index: usize) -> ScanResult<()> {
        match self.rearm {
            CaptureRearm::EveryRow => {
                debug!(row = row_index, "Re-arming capture");
                self.channels.capture_start.put(1i64).await
            }
            CaptureRearm::InitializerOnly => Ok(()),
        }
    }

    async fn position(&self, state: &RowState) -> ScanResult<()> {
        let ch = self.channels;
        self.arm_capture_for_row(state.row_index).await?;
        ch.fast_motor_speed.put(self.config.fast_speed).await?;
        ch.fast_motor_position.put(self.config.col_start).await?;
        ch.slow_motor_position
            .put(state.target_slow_position)
            .await?;
        pause(self.timing.move_command_delay, &self.cancel).await?;

        ch.fast_motor_done
            .wait_for_flag(true, self.timing.motion_policy(), &self.cancel)
            .await
            .map_err(|err| as_motion_timeout(err, Axis::Fast))
    }

    async fn switch_speed(&self) -> ScanResult<()> {
        let ch = self.channels;
        ch.fast_motor_speed.put(self.config.slow_speed).await?;
        ch.slow_motor_done
            .wait_for_flag(true, self.timing.motion_policy(), &self.cancel)
            .await
            .map_err(|err| as_motion_timeout(err, Axis::Slow))
    }

    async fn erase_detector(&self) -> ScanResult<()> {
        let ch = self.channels;
        info!("Erase scaler");
        ch.scaler_erase_start.put(1i64).await?;
        info!("Erase detector");
        ch.detector_erase_start.put(1i64).await?;
        pause(self.timing.erase_settle, &self.cancel).await
    }

    async fn capture(&self) -> ScanResult<()> {
        let ch = self.channels;
        info!("Start fast scan");
        ch.fast_scan_busy.put(1i64).await?;
        ch.fast_scan_busy
            .wait_for_flag(false, self.timing.scan_policy(), &self.cancel)
            .await
    }

    async fn drain(&self) -> ScanResult<()> {
        self.channels
            .detector_acquiring
            .wait_for_flag(false, self.timing.drain_policy(), &self.cancel)
            .await
    }
}

fn as_motion_timeout(err: ScanError, axis: Axis) -> ScanError {
    match err {
        ScanError::Timeout { channel, waited } => ScanError::MotionTimeout {
            axis,
            channel,
            waited,
        },
        other => other,
    }
}
