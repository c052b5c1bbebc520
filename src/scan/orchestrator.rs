//! Scan Orchestrator.
//!
//! Resolves channels, initializes the detector once, then runs rows `0..row_count`
//! strictly in order. Row `n + 1` never starts before row `n` is complete. Every
//! channel is released on the way out, whether the scan finished or aborted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn, Instrument};

use crate::channel::ChannelAccess;
use crate::config::Settings;
use crate::error::{ScanError, ScanResult};
use crate::poll::CancelToken;
use crate::scan::channels::{ChannelLease, ScanChannels};
use crate::scan::events::ScanEvent;
use crate::scan::init::PreScanInitializer;
use crate::scan::plan::{DetectorBufferingPlan, ScanConfig};
use crate::scan::resolver::ScanResolver;
use crate::scan::row::{CaptureRearm, RowScanExecutor};

const EVENT_CAPACITY: usize = 1024;

/// Capture file the storage collaborator wrote for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFile {
    /// Row the file belongs to.
    pub row_index: usize,
    /// `starting_file_index + row_index`
    pub file_number: u32,
    /// Configured prefix, without terminator.
    pub file_name: String,
}

/// Outcome of a completed scan, handed to whoever decodes the capture files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    /// Always `config.row_count` on success.
    pub rows_completed: usize,
    /// Resolved geometry.
    pub config: ScanConfig,
    /// Buffering written at initialization.
    pub plan: DetectorBufferingPlan,
    /// One entry per row, in row order.
    pub capture_files: Vec<CaptureFile>,
    /// When resolution began.
    pub started_at: DateTime<Utc>,
    /// When the last row completed.
    pub finished_at: DateTime<Utc>,
}

/// Runs one scan end to end: resolve, initialize, rows, release.
pub struct ScanOrchestrator {
    access: Arc<dyn ChannelAccess>,
    settings: Settings,
    cancel: CancelToken,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanOrchestrator {
    /// Orchestrator over `access` with no cancellation hooked up.
    pub fn new(access: Arc<dyn ChannelAccess>, settings: Settings) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            access,
            settings,
            cancel: CancelToken::never(),
            events,
        }
    }

    /// Observe `cancel` between poll iterations and delays.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Receive progress events from subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }

    /// Run the whole raster.
    ///
    /// Channels are released before this returns. If the future is dropped
    /// mid-scan, release continues as a background task on the same runtime.
    pub async fn run(&self) -> ScanResult<ScanReport> {
        let span = info_span!(
            "raster_scan",
            file_prefix = %self.settings.scan.capture_file_prefix
        );

        async {
            let started_at = Utc::now();
            let resolver = ScanResolver::new(Arc::clone(&self.access), &self.settings);

            let outcome = match resolver.resolve().await {
                Ok((config, channels)) => {
                    let lease = ChannelLease::new(channels);
                    let outcome = self.run_resolved(&config, lease.channels(), started_at).await;
                    let failures = lease.release().await;
                    if !failures.is_empty() {
                        warn!(count = failures.len(), "Some channels failed to release");
                    }
                    outcome
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(report) => {
                    info!(rows = report.rows_completed, "Scan finished");
                    self.emit(ScanEvent::Finished {
                        rows_completed: report.rows_completed,
                    });
                    Ok(report)
                }
                Err(err) => {
                    let context = err.row_context();
                    error!(
                        row = ?context.map(|(row, _)| row),
                        phase = ?context.map(|(_, phase)| phase),
                        error = %err,
                        "Scan aborted"
                    );
                    self.emit(ScanEvent::Aborted {
                        row_index: context.map(|(row, _)| row),
                        phase: context.map(|(_, phase)| phase),
                        reason: err.to_string(),
                    });
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_resolved(
        &self,
        config: &ScanConfig,
        channels: &ScanChannels,
        started_at: DateTime<Utc>,
    ) -> ScanResult<ScanReport> {
        let scan = &self.settings.scan;
        let plan = DetectorBufferingPlan::new(
            config.col_count,
            scan.frames_per_buffer,
            scan.starting_file_index,
        );

        self.cancel.check()?;
        PreScanInitializer::new(channels, scan.enable_capture_callbacks)
            .run(config, &plan)
            .await
            .map_err(|source| ScanError::Initialization {
                source: Box::new(source),
            })?;
        self.emit(ScanEvent::Initialized {
            config: config.clone(),
            plan,
        });

        let executor = RowScanExecutor::new(
            channels,
            config,
            self.settings.timing,
            CaptureRearm::from_flag(scan.rearm_capture_each_row),
            self.cancel.clone(),
        )
        .with_events(self.events.clone());

        let mut capture_files = Vec::with_capacity(config.row_count);
        for row_index in 0..config.row_count {
            self.cancel.check()?;
            executor.run_row(row_index).await?;
            capture_files.push(CaptureFile {
                row_index,
                file_number: plan.file_number(row_index),
                file_name: config.capture_file_prefix.clone(),
            });
        }

        Ok(ScanReport {
            rows_completed: capture_files.len(),
            config: config.clone(),
            plan,
            capture_files,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
