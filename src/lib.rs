//! Core library for the raster_daq scanner.
//!
//! Coordinates a two-axis raster scan on a mapping beamline: a slow axis is stepped
//! row by row while a fast axis sweeps each row, and a multichannel mapping
//! detector streams one capture file per row.
//!
//! Hardware is reached only through the [`channel::ChannelAccess`] trait. The
//! binary drives [`hardware::SimulatedBeamline`]; a control-system binding supplies
//! its own implementation.

pub mod channel;
pub mod config;
pub mod decoder;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod poll;
pub mod scan;
