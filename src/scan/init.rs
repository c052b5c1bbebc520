//! Pre-Scan Initializer.
//!
//! Puts the detector's capture plugin into streaming mode and sets the per-row
//! pixel totals, once, before the first row. Safe to repeat only before any
//! capture has begun.

use tracing::info;

use crate::error::ScanResult;
use crate::scan::channels::ScanChannels;
use crate::scan::plan::{DetectorBufferingPlan, FileWriteMode, ScanConfig};

/// The storage collaborator expects file names as NUL-terminated strings.
pub const FILE_NAME_TERMINATOR: char = '\0';

/// Writes detector buffering and capture setup once, before the first row.
pub struct PreScanInitializer<'a> {
    channels: &'a ScanChannels,
    enable_callbacks: bool,
}

impl<'a> PreScanInitializer<'a> {
    /// Initializer over bound handles. `enable_callbacks` controls the callbacks write.
    pub fn new(channels: &'a ScanChannels, enable_callbacks: bool) -> Self {
        Self {
            channels,
            enable_callbacks,
        }
    }

    /// Configure capture buffering, start streaming, and set pixel counts.
    ///
    /// Any failed write is returned as-is; there is no partial-initialization
    /// recovery.
    pub async fn run(&self, config: &ScanConfig, plan: &DetectorBufferingPlan) -> ScanResult<()> {
        let ch = self.channels;
        info!(
            buffers_per_row = plan.buffers_per_row,
            file_prefix = %config.capture_file_prefix,
            "Configuring detector capture"
        );

        ch.capture_count.put(plan.buffers_per_row).await?;
        ch.capture_file_number
            .put(i64::from(plan.starting_file_index))
            .await?;
        ch.capture_file_name
            .put(terminated_file_name(&config.capture_file_prefix))
            .await?;
        ch.capture_save_mode
            .put(FileWriteMode::Stream.code())
            .await?;
        if self.enable_callbacks {
            ch.capture_enable.put(1i64).await?;
        }
        ch.capture_start.put(1i64).await?;

        ch.scaler_pixels.put(config.col_count).await?;
        ch.detector_pixels.put(config.col_count).await?;

        info!(pixels_per_row = config.col_count, "Detector ready for first row");
        Ok(())
    }
}

fn terminated_file_name(prefix: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + 1);
    name.push_str(prefix);
    name.push(FILE_NAME_TERMINATOR);
    name
}
