//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (default `config/scan.toml`)
//! 2. environment variables prefixed with `RASTERDAQ_`, nested keys separated by `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! RASTERDAQ_APPLICATION__LOG_LEVEL=debug
//! RASTERDAQ_SCAN__FAST_SPEED=2.0
//! RASTERDAQ_TIMING__MOTION_TIMEOUT="5m"
//! ```
//!
//! Scan geometry (row/column counts, starts and steps) is not configured here: it
//! lives in the scan records and is read by the resolver at the start of each scan.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::poll::PollPolicy;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RASTERDAQ_";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Name and logging.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Symbolic identifiers of the scan records, motors and detector.
    pub beamline: BeamlineConfig,
    /// Speeds, file naming and detector buffering.
    pub scan: ScanSettings,
    /// Poll intervals, timeouts and settle delays.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Seed values for the simulated beamline driven by the binary.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name used in logs.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format (pretty, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Record and prefix names the channel names are built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamlineConfig {
    /// Scan record driving the fast axis (e.g. "X15U1:test:scan1")
    pub fast_scan: String,
    /// Scan record stepping the slow axis
    pub slow_scan: String,
    /// Fast-axis motor record
    pub fast_motor: String,
    /// Slow-axis motor record
    pub slow_motor: String,
    /// Multichannel scaler prefix (e.g. "X15USIS:")
    pub scaler_prefix: String,
    /// Mapping detector prefix (e.g. "15UdxpXMAP:")
    pub detector_prefix: String,
    /// Capture file plugin, relative to the detector prefix
    #[serde(default = "default_file_plugin")]
    pub file_plugin: String,
}

/// Operator-chosen scan parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Fast-axis velocity while moving to the row start
    pub fast_speed: f64,
    /// Fast-axis velocity for the sweep itself
    pub slow_speed: f64,
    /// Capture file name written during initialization
    pub capture_file_prefix: String,
    /// Pixels the detector packs into one capture buffer
    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: usize,
    /// Issue capture-start at the beginning of every row, not only once
    #[serde(default = "default_true")]
    pub rearm_capture_each_row: bool,
    /// Enable callbacks on the capture plugin during initialization
    #[serde(default = "default_true")]
    pub enable_capture_callbacks: bool,
    /// File number of row 0
    #[serde(default = "default_starting_file_index")]
    pub starting_file_index: u32,
}

/// Poll intervals, bounds and fixed settle delays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Bound on each channel bind
    #[serde(with = "humantime_serde", default = "default_bind_timeout")]
    pub bind_timeout: Duration,
    /// Motion-done poll interval
    #[serde(with = "humantime_serde", default = "default_motion_poll")]
    pub motion_poll: Duration,
    /// Bound on each motion-done wait
    #[serde(with = "humantime_serde", default = "default_motion_timeout")]
    pub motion_timeout: Duration,
    /// Fast scan busy poll interval
    #[serde(with = "humantime_serde", default = "default_scan_poll")]
    pub scan_poll: Duration,
    /// Bound on one fast sweep
    #[serde(with = "humantime_serde", default = "default_scan_timeout")]
    pub scan_timeout: Duration,
    /// Detector acquiring poll interval
    #[serde(with = "humantime_serde", default = "default_drain_poll")]
    pub drain_poll: Duration,
    /// Bound on the detector drain
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
    /// Delay between commanding both motors and the first motion-done read
    #[serde(with = "humantime_serde", default = "default_move_command_delay")]
    pub move_command_delay: Duration,
    /// Settle time after erasing scaler and detector
    #[serde(with = "humantime_serde", default = "default_erase_settle")]
    pub erase_settle: Duration,
    /// Settle time after a row completes
    #[serde(with = "humantime_serde", default = "default_row_settle")]
    pub row_settle: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bind_timeout: default_bind_timeout(),
            motion_poll: default_motion_poll(),
            motion_timeout: default_motion_timeout(),
            scan_poll: default_scan_poll(),
            scan_timeout: default_scan_timeout(),
            drain_poll: default_drain_poll(),
            drain_timeout: default_drain_timeout(),
            move_command_delay: default_move_command_delay(),
            erase_settle: default_erase_settle(),
            row_settle: default_row_settle(),
        }
    }
}

impl TimingConfig {
    /// Policy for motion-done waits.
    pub fn motion_policy(&self) -> PollPolicy {
        PollPolicy::new(self.motion_poll, self.motion_timeout)
    }

    /// Policy for the fast sweep.
    pub fn scan_policy(&self) -> PollPolicy {
        PollPolicy::new(self.scan_poll, self.scan_timeout)
    }

    /// Policy for the detector drain.
    pub fn drain_policy(&self) -> PollPolicy {
        PollPolicy::new(self.drain_poll, self.drain_timeout)
    }
}

/// Starting state of the simulated beamline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Slow-scan point count
    #[serde(default = "default_sim_rows")]
    pub rows: usize,
    /// Fast-scan point count
    #[serde(default = "default_sim_cols")]
    pub cols: usize,
    /// Slow scan's first position
    #[serde(default)]
    pub row_start: f64,
    /// Slow scan step
    #[serde(default = "default_sim_step")]
    pub row_step: f64,
    /// Fast scan's first position
    #[serde(default)]
    pub col_start: f64,
    /// Fast scan step
    #[serde(default = "default_sim_step")]
    pub col_step: f64,
    /// Motion-done reads that report "moving" after a move command
    #[serde(default = "default_sim_motion_polls")]
    pub motion_polls: u32,
    /// Busy reads that report "scanning" after the fast scan starts
    #[serde(default = "default_sim_scan_polls")]
    pub scan_polls: u32,
    /// Acquiring reads that report "busy" after the fast scan ends
    #[serde(default = "default_sim_drain_polls")]
    pub drain_polls: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rows: default_sim_rows(),
            cols: default_sim_cols(),
            row_start: 0.0,
            row_step: default_sim_step(),
            col_start: 0.0,
            col_step: default_sim_step(),
            motion_polls: default_sim_motion_polls(),
            scan_polls: default_sim_scan_polls(),
            drain_polls: default_sim_drain_polls(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "raster_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_file_plugin() -> String {
    "netCDF1:".to_string()
}

fn default_frames_per_buffer() -> usize {
    124
}

fn default_true() -> bool {
    true
}

fn default_starting_file_index() -> u32 {
    1
}

fn default_bind_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_motion_poll() -> Duration {
    Duration::from_millis(10)
}

fn default_motion_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_scan_poll() -> Duration {
    Duration::from_millis(100)
}

fn default_scan_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_drain_poll() -> Duration {
    Duration::from_millis(10)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_move_command_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_erase_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_row_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_sim_rows() -> usize {
    3
}

fn default_sim_cols() -> usize {
    10
}

fn default_sim_step() -> f64 {
    0.5
}

fn default_sim_motion_polls() -> u32 {
    3
}

fn default_sim_scan_polls() -> u32 {
    5
}

fn default_sim_drain_polls() -> u32 {
    2
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] plus environment overrides.
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file, then apply `RASTERDAQ_` overrides and validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text without consulting the environment.
    pub fn from_toml_str(toml: &str) -> ScanResult<Self> {
        let settings: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and format are known
    /// - Every beamline identifier is non-empty
    /// - Speeds are positive, capture prefix is non-empty, buffer size is non-zero
    /// - Poll intervals are non-zero and no timeout is shorter than its interval
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let beamline = &self.beamline;
        for (key, value) in [
            ("fast_scan", &beamline.fast_scan),
            ("slow_scan", &beamline.slow_scan),
            ("fast_motor", &beamline.fast_motor),
            ("slow_motor", &beamline.slow_motor),
            ("scaler_prefix", &beamline.scaler_prefix),
            ("detector_prefix", &beamline.detector_prefix),
            ("file_plugin", &beamline.file_plugin),
        ] {
            if value.trim().is_empty() {
                return Err(ScanError::Configuration(format!(
                    "beamline.{} cannot be empty",
                    key
                )));
            }
        }

        for (key, speed) in [
            ("fast_speed", self.scan.fast_speed),
            ("slow_speed", self.scan.slow_speed),
        ] {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(ScanError::Configuration(format!(
                    "scan.{} must be positive, got {}",
                    key, speed
                )));
            }
        }

        if self.scan.capture_file_prefix.is_empty() {
            return Err(ScanError::Configuration(
                "scan.capture_file_prefix cannot be empty".to_string(),
            ));
        }

        if self.scan.frames_per_buffer == 0 {
            return Err(ScanError::Configuration(
                "scan.frames_per_buffer must be at least 1".to_string(),
            ));
        }

        let timing = &self.timing;
        for (key, policy) in [
            ("motion", timing.motion_policy()),
            ("scan", timing.scan_policy()),
            ("drain", timing.drain_policy()),
        ] {
            if policy.interval.is_zero() {
                return Err(ScanError::Configuration(format!(
                    "timing.{}_poll must be non-zero",
                    key
                )));
            }
            if policy.timeout < policy.interval {
                return Err(ScanError::Configuration(format!(
                    "timing.{}_timeout ({:?}) is shorter than timing.{}_poll ({:?})",
                    key, policy.timeout, key, policy.interval
                )));
            }
        }

        if timing.bind_timeout.is_zero() {
            return Err(ScanError::Configuration(
                "timing.bind_timeout must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
