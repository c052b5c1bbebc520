//! Progress events published while a scan runs.

use serde::Serialize;

use crate::scan::plan::{DetectorBufferingPlan, ScanConfig};
use crate::scan::row::RowPhase;

/// Milestone of a running scan, broadcast to any subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    /// Detector buffering configured, first row about to start.
    Initialized {
        /// Geometry read from the scan records.
        config: ScanConfig,
        /// Buffering written to the detector.
        plan: DetectorBufferingPlan,
    },
    /// A row began positioning.
    RowStarted {
        /// Row being executed.
        row_index: usize,
        /// Slow-axis position for the row.
        slow_target: f64,
    },
    /// A row entered a new phase.
    PhaseEntered {
        /// Row being executed.
        row_index: usize,
        /// Phase just entered.
        phase: RowPhase,
    },
    /// A row finished and its settle delay elapsed.
    RowCompleted {
        /// Row that finished.
        row_index: usize,
    },
    /// Every row completed.
    Finished {
        /// Rows completed.
        rows_completed: usize,
    },
    /// The scan stopped early. Row and phase are set if a row was in progress.
    Aborted {
        /// Row in progress, if any.
        row_index: Option<usize>,
        /// Phase in progress, if any.
        phase: Option<RowPhase>,
        /// Rendered error.
        reason: String,
    },
}
