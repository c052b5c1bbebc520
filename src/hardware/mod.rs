//! Hardware backends for the channel-access contract.
//!
//! The production channel-access layer lives outside this crate and plugs in through
//! [`crate::channel::ChannelAccess`]. This module carries the simulated beamline used
//! by the test suite and by the binary's dry runs.

pub mod mock;

pub use mock::{Fault, JournalEntry, Op, SimulatedBeamline};
