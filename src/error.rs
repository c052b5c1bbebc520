//! Custom error types for the scan coordinator.
//!
//! This module defines the primary error type, `ScanError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place for every failure a raster
//! scan can hit, from configuration problems to a motor that never reports done.
//!
//! ## Error Hierarchy
//!
//! - **`Resolution`**: a named channel could not be bound (unknown name, or the bind
//!   did not complete within the configured timeout).
//! - **`Channel`**: a bound channel's read, write or release failed, e.g. the
//!   server disconnected.
//! - **`Timeout`** / **`MotionTimeout`**: a wait-until-true poll never saw its
//!   predicate become true. Motion waits report which axis hung.
//! - **`Cancelled`**: the operator requested cancellation between poll iterations.
//! - **`Initialization`** / **`RowAborted`**: wrap one of the above with the scan step
//!   that was in progress, so the final message names the row and phase.
//!
//! None of these are recovered locally. They propagate to the orchestrator, which
//! releases every channel and reports.

use std::time::Duration;

use thiserror::Error;

use crate::scan::{Axis, RowPhase};

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Every failure a scan can report.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A named channel could not be bound.
    #[error("Failed to bind channel '{channel}': {reason}")]
    Resolution {
        /// Name passed to `bind`.
        channel: String,
        /// What the access layer reported.
        reason: String,
    },

    /// A read, write or release on a bound channel failed.
    #[error("Channel '{channel}' {operation} failed: {reason}")]
    Channel {
        /// Channel name.
        channel: String,
        /// `read`, `write` or `release`.
        operation: &'static str,
        /// What the access layer reported.
        reason: String,
    },

    /// A bounded wait gave up.
    #[error("Timed out after {waited:?} waiting on '{channel}'")]
    Timeout {
        /// What was being waited on.
        channel: String,
        /// Time spent waiting.
        waited: Duration,
    },

    /// A motor never reported motion done.
    #[error("{axis} axis did not report motion done on '{channel}' within {waited:?}")]
    MotionTimeout {
        /// Axis that hung.
        axis: Axis,
        /// Its motion-done channel.
        channel: String,
        /// Time spent waiting.
        waited: Duration,
    },

    /// Cancellation was requested.
    #[error("Scan cancelled")]
    Cancelled,

    /// Settings or scan records failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Settings could not be loaded or parsed.
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    /// The pre-scan initializer failed.
    #[error("Pre-scan initialization failed: {source}")]
    Initialization {
        /// Underlying failure.
        #[source]
        source: Box<ScanError>,
    },

    /// A row failed part-way.
    #[error("Row {row_index} aborted during {phase}: {source}")]
    RowAborted {
        /// Row that was running.
        row_index: usize,
        /// Phase that was in progress.
        phase: RowPhase,
        /// Underlying failure.
        #[source]
        source: Box<ScanError>,
    },

    /// A capture buffer or decoder output had the wrong shape.
    #[error("Buffer decode error: {0}")]
    Decode(String),
}

impl ScanError {
    /// Error for a failed read/write/release on a bound channel.
    pub fn channel(
        channel: impl Into<String>,
        operation: &'static str,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Channel {
            channel: channel.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Error for a channel that could not be bound.
    pub fn resolution(channel: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Resolution {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }

    /// True if this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Initialization { source } | Self::RowAborted { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Row index and phase, if the error happened inside a row.
    pub fn row_context(&self) -> Option<(usize, RowPhase)> {
        match self {
            Self::RowAborted {
                row_index, phase, ..
            } => Some((*row_index, *phase)),
            _ => None,
        }
    }
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}
