//! Scan geometry and detector buffering derived before the first row.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Motion axis of the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Sweeps continuously across a row while the detector accumulates.
    Fast,
    /// Steps once per row and settles before the sweep.
    Slow,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Fast => f.write_str("Fast"),
            Axis::Slow => f.write_str("Slow"),
        }
    }
}

/// Capture plugin save mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum FileWriteMode {
    /// One frame per file.
    Single = 0,
    /// Buffer frames in memory, write them all at the end.
    Capture = 1,
    /// Stream multiple frames per file as they arrive.
    Stream = 2,
}

impl FileWriteMode {
    /// Integer written to the plugin.
    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Static scan parameters, resolved once and immutable for the rest of the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of slow-axis steps.
    pub row_count: usize,
    /// Number of pixels per fast sweep.
    pub col_count: usize,
    /// Fast-axis velocity while moving to the row start.
    pub fast_speed: f64,
    /// Fast-axis velocity for the settle period and the sweep itself.
    pub slow_speed: f64,
    /// Slow-axis position of row 0.
    pub row_start: f64,
    /// Slow-axis step between rows.
    pub row_step: f64,
    /// Fast-axis sweep start.
    pub col_start: f64,
    /// Fast-axis step between pixels.
    pub col_step: f64,
    /// Base name for capture files, without terminator.
    pub capture_file_prefix: String,
}

impl ScanConfig {
    /// Check the invariants every later step relies on.
    pub fn validate(&self) -> ScanResult<()> {
        if self.row_count < 1 {
            return Err(ScanError::Configuration(
                "row count must be at least 1".to_string(),
            ));
        }
        if self.col_count < 1 {
            return Err(ScanError::Configuration(
                "column count must be at least 1".to_string(),
            ));
        }
        for (name, speed) in [("fast_speed", self.fast_speed), ("slow_speed", self.slow_speed)] {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(ScanError::Configuration(format!(
                    "{} must be a positive number, got {}",
                    name, speed
                )));
            }
        }
        for (name, value) in [
            ("row_start", self.row_start),
            ("row_step", self.row_step),
            ("col_start", self.col_start),
            ("col_step", self.col_step),
        ] {
            if !value.is_finite() {
                return Err(ScanError::Configuration(format!(
                    "{} is not finite: {}",
                    name, value
                )));
            }
        }
        if self.capture_file_prefix.is_empty() {
            return Err(ScanError::Configuration(
                "capture file prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Slow-axis target for a row.
    pub fn slow_target(&self, row_index: usize) -> f64 {
        self.row_start + self.row_step * row_index as f64
    }
}

/// How the detector splits one row into capture buffers.
///
/// Computed once at initialization and never changed mid-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorBufferingPlan {
    /// Capture buffers written to each file.
    pub buffers_per_row: usize,
    /// File number of row 0.
    pub starting_file_index: u32,
}

impl DetectorBufferingPlan {
    /// `ceil((col_count + 1) / frames_per_buffer)` buffers per row.
    pub fn new(col_count: usize, frames_per_buffer: usize, starting_file_index: u32) -> Self {
        let frames_per_buffer = frames_per_buffer.max(1);
        Self {
            buffers_per_row: (col_count + 1).div_ceil(frames_per_buffer),
            starting_file_index,
        }
    }

    /// File number the storage collaborator uses for a row's capture.
    pub fn file_number(&self, row_index: usize) -> u32 {
        self.starting_file_index + row_index as u32
    }
}
