//! Scan Configuration Resolver.
//!
//! Binds every channel the scan needs and reads the raster geometry from the scan
//! records. Binding is all-or-nothing: if any channel fails to bind within the
//! timeout, the handles bound so far are released before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{Channel, ChannelAccess};
use crate::config::{ScanSettings, Settings};
use crate::error::{ScanError, ScanResult};
use crate::scan::channels::{release_each, ChannelNames, ScanChannels};
use crate::scan::plan::ScanConfig;

/// Binds one channel at a time and remembers what it bound for rollback.
struct Binder {
    access: Arc<dyn ChannelAccess>,
    timeout: Duration,
    bound: Vec<Channel>,
}

impl Binder {
    async fn bind(&mut self, name: &str) -> ScanResult<Channel> {
        let id = match tokio::time::timeout(self.timeout, self.access.bind(name)).await {
            Ok(Ok(id)) => id,
            Ok(Err(err @ ScanError::Resolution { .. })) => return Err(err),
            Ok(Err(other)) => return Err(ScanError::resolution(name, other)),
            Err(_) => {
                return Err(ScanError::resolution(
                    name,
                    format!("not connected within {:?}", self.timeout),
                ))
            }
        };

        debug!(channel = name, ?id, "Bound channel");
        let channel = Channel::new(name, id, Arc::clone(&self.access));
        self.bound.push(channel.clone());
        Ok(channel)
    }

    async fn bind_all(&mut self, names: &ChannelNames) -> ScanResult<ScanChannels> {
        Ok(ScanChannels {
            slow_points: self.bind(&names.slow_points).await?,
            slow_start: self.bind(&names.slow_start).await?,
            slow_step: self.bind(&names.slow_step).await?,
            fast_points: self.bind(&names.fast_points).await?,
            fast_start: self.bind(&names.fast_start).await?,
            fast_step: self.bind(&names.fast_step).await?,
            fast_scan_busy: self.bind(&names.fast_scan_busy).await?,
            fast_motor_position: self.bind(&names.fast_motor_position).await?,
            fast_motor_done: self.bind(&names.fast_motor_done).await?,
            fast_motor_speed: self.bind(&names.fast_motor_speed).await?,
            slow_motor_position: self.bind(&names.slow_motor_position).await?,
            slow_motor_done: self.bind(&names.slow_motor_done).await?,
            scaler_pixels: self.bind(&names.scaler_pixels).await?,
            scaler_erase_start: self.bind(&names.scaler_erase_start).await?,
            detector_pixels: self.bind(&names.detector_pixels).await?,
            detector_erase_start: self.bind(&names.detector_erase_start).await?,
            detector_acquiring: self.bind(&names.detector_acquiring).await?,
            capture_save_mode: self.bind(&names.capture_save_mode).await?,
            capture_count: self.bind(&names.capture_count).await?,
            capture_enable: self.bind(&names.capture_enable).await?,
            capture_start: self.bind(&names.capture_start).await?,
            capture_file_name: self.bind(&names.capture_file_name).await?,
            capture_file_number: self.bind(&names.capture_file_number).await?,
        })
    }
}

/// Produces a [`ScanConfig`] and the bound [`ScanChannels`] from symbolic identifiers.
pub struct ScanResolver {
    access: Arc<dyn ChannelAccess>,
    names: ChannelNames,
    scan: ScanSettings,
    bind_timeout: Duration,
}

impl ScanResolver {
    /// Resolver for the beamline and scan sections of `settings`.
    pub fn new(access: Arc<dyn ChannelAccess>, settings: &Settings) -> Self {
        Self {
            access,
            names: ChannelNames::from_beamline(&settings.beamline),
            scan: settings.scan.clone(),
            bind_timeout: settings.timing.bind_timeout,
        }
    }

    /// Bind all channels and read the scan geometry.
    ///
    /// On any failure nothing stays bound.
    pub async fn resolve(&self) -> ScanResult<(ScanConfig, ScanChannels)> {
        let channels = self.bind_channels().await?;
        match self.read_config(&channels).await {
            Ok(config) => {
                info!(
                    rows = config.row_count,
                    cols = config.col_count,
                    row_start = config.row_start,
                    row_step = config.row_step,
                    "Resolved scan configuration"
                );
                Ok((config, channels))
            }
            Err(err) => {
                channels.release_all().await;
                Err(err)
            }
        }
    }

    /// Bind every channel named by the beamline configuration.
    pub async fn bind_channels(&self) -> ScanResult<ScanChannels> {
        let mut binder = Binder {
            access: Arc::clone(&self.access),
            timeout: self.bind_timeout,
            bound: Vec::new(),
        };

        match binder.bind_all(&self.names).await {
            Ok(channels) => Ok(channels),
            Err(err) => {
                release_each(&binder.bound).await;
                Err(err)
            }
        }
    }

    /// Read row/column geometry from the scan records.
    pub async fn read_config(&self, channels: &ScanChannels) -> ScanResult<ScanConfig> {
        let config = ScanConfig {
            row_count: read_count(&channels.slow_points).await?,
            col_count: read_count(&channels.fast_points).await?,
            fast_speed: self.scan.fast_speed,
            slow_speed: self.scan.slow_speed,
            row_start: channels.slow_start.get_f64().await?,
            row_step: channels.slow_step.get_f64().await?,
            col_start: channels.fast_start.get_f64().await?,
            col_step: channels.fast_step.get_f64().await?,
            capture_file_prefix: self.scan.capture_file_prefix.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

async fn read_count(channel: &Channel) -> ScanResult<usize> {
    let points = channel.get_i64().await?;
    usize::try_from(points).map_err(|_| {
        ScanError::Configuration(format!(
            "{} reports a negative point count: {}",
            channel.name(),
            points
        ))
    })
}
