//! Mock Hardware Implementations
//!
//! Provides a simulated beamline for testing without a control system.
//! All waiting uses async-safe operations (tokio::time), never std::thread::sleep.
//!
//! # Simulated behaviour
//!
//! - Writing a motor `VAL` clears its `DMOV` flag for `motion_polls` reads
//! - Writing `1` to the fast scan `EXSC` keeps it busy for `scan_polls` reads and
//!   holds the detector `Acquiring` flag for `drain_polls` reads
//! - Every other channel is a plain stored value
//!
//! Every bind, read, write and release is appended to a journal so tests can
//! assert on exact ordering. Faults (failed binds, failed writes, hung flags) can
//! be injected per channel name.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::channel::{ChannelAccess, ChannelId, ChannelValue};
use crate::config::{Settings, SimulationConfig};
use crate::error::{ScanError, ScanResult};
use crate::scan::ChannelNames;

/// Kind of journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Name bound.
    Bind,
    /// Value read.
    Read,
    /// Value written.
    Write,
    /// Handle released.
    Release,
}

/// One journaled channel operation.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// What happened.
    pub op: Op,
    /// Channel name.
    pub channel: String,
    /// Value read or written; `None` for bind and release.
    pub value: Option<ChannelValue>,
}

/// Injectable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Bind of this channel fails immediately.
    BindFails(String),
    /// Bind of this channel never completes.
    BindHangs(String),
    /// The `nth` write (1-based) to this channel fails.
    WriteFails {
        /// Channel name.
        channel: String,
        /// Which write fails, counting from 1.
        nth: usize,
    },
    /// The `nth` read (1-based) of this channel fails.
    ReadFails {
        /// Channel name.
        channel: String,
        /// Which read fails, counting from 1.
        nth: usize,
    },
    /// Release of this channel fails.
    ReleaseFails(String),
    /// This readiness flag never reaches its ready state.
    NeverReady(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    MotionDone,
    ScanBusy,
    Acquiring,
}

struct BeamlineState {
    values: HashMap<String, ChannelValue>,
    flags: HashMap<String, Flag>,
    /// Reads left before a flag reaches its ready state.
    countdowns: HashMap<String, u32>,
    ids: HashMap<ChannelId, String>,
    connected: HashSet<ChannelId>,
    next_id: u64,
    journal: Vec<JournalEntry>,
    faults: Vec<Fault>,
    write_counts: HashMap<String, usize>,
    read_counts: HashMap<String, usize>,
}

/// In-memory [`ChannelAccess`] that behaves like the mapping beamline.
pub struct SimulatedBeamline {
    names: ChannelNames,
    behaviour: SimulationConfig,
    state: Mutex<BeamlineState>,
}

impl SimulatedBeamline {
    /// Create a beamline whose scan records describe `behaviour`'s raster.
    pub fn new(names: ChannelNames, behaviour: SimulationConfig) -> Self {
        let mut values = HashMap::new();
        let mut set = |name: &str, value: ChannelValue| {
            values.insert(name.to_string(), value);
        };

        set(&names.slow_points, behaviour.rows.into());
        set(&names.slow_start, behaviour.row_start.into());
        set(&names.slow_step, behaviour.row_step.into());
        set(&names.fast_points, behaviour.cols.into());
        set(&names.fast_start, behaviour.col_start.into());
        set(&names.fast_step, behaviour.col_step.into());
        set(&names.fast_scan_busy, ChannelValue::Int(0));
        set(&names.fast_motor_position, ChannelValue::Float(0.0));
        set(&names.fast_motor_done, ChannelValue::Int(1));
        set(&names.fast_motor_speed, ChannelValue::Float(1.0));
        set(&names.slow_motor_position, ChannelValue::Float(0.0));
        set(&names.slow_motor_done, ChannelValue::Int(1));
        set(&names.scaler_pixels, ChannelValue::Int(0));
        set(&names.scaler_erase_start, ChannelValue::Int(0));
        set(&names.detector_pixels, ChannelValue::Int(0));
        set(&names.detector_erase_start, ChannelValue::Int(0));
        set(&names.detector_acquiring, ChannelValue::Int(0));
        set(&names.capture_save_mode, ChannelValue::Int(0));
        set(&names.capture_count, ChannelValue::Int(0));
        set(&names.capture_enable, ChannelValue::Int(0));
        set(&names.capture_start, ChannelValue::Int(0));
        set(&names.capture_file_name, ChannelValue::Text(String::new()));
        set(&names.capture_file_number, ChannelValue::Int(0));

        let flags = HashMap::from([
            (names.fast_motor_done.clone(), Flag::MotionDone),
            (names.slow_motor_done.clone(), Flag::MotionDone),
            (names.fast_scan_busy.clone(), Flag::ScanBusy),
            (names.detector_acquiring.clone(), Flag::Acquiring),
        ]);

        Self {
            names,
            behaviour,
            state: Mutex::new(BeamlineState {
                values,
                flags,
                countdowns: HashMap::new(),
                ids: HashMap::new(),
                connected: HashSet::new(),
                next_id: 1,
                journal: Vec::new(),
                faults: Vec::new(),
                write_counts: HashMap::new(),
                read_counts: HashMap::new(),
            }),
        }
    }

    /// Beamline named after `settings.beamline`, seeded from `settings.simulation`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            ChannelNames::from_beamline(&settings.beamline),
            settings.simulation.clone(),
        )
    }

    /// Names the beamline was seeded with.
    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    /// Arm a fault. Faults stay armed for the rest of the run.
    pub async fn inject(&self, fault: Fault) {
        self.state.lock().await.faults.push(fault);
    }

    /// Overwrite a stored value without journaling it.
    pub async fn set_value(&self, channel: &str, value: impl Into<ChannelValue>) {
        self.state
            .lock()
            .await
            .values
            .insert(channel.to_string(), value.into());
    }

    /// Current stored value.
    pub async fn value(&self, channel: &str) -> Option<ChannelValue> {
        self.state.lock().await.values.get(channel).cloned()
    }

    /// Every operation so far, in order.
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    /// Every write, in order, as `(channel, value)`.
    pub async fn writes(&self) -> Vec<(String, ChannelValue)> {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|entry| entry.op == Op::Write)
            .filter_map(|entry| entry.value.clone().map(|v| (entry.channel.clone(), v)))
            .collect()
    }

    /// Values written to one channel, in order.
    pub async fn writes_to(&self, channel: &str) -> Vec<ChannelValue> {
        self.writes()
            .await
            .into_iter()
            .filter(|(name, _)| name == channel)
            .map(|(_, value)| value)
            .collect()
    }

    /// Number of handles bound and not yet released.
    pub async fn open_handles(&self) -> usize {
        self.state.lock().await.connected.len()
    }

    /// Number of binds ever issued.
    pub async fn bind_count(&self) -> usize {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|entry| entry.op == Op::Bind)
            .count()
    }

    fn record(state: &mut BeamlineState, op: Op, channel: &str, value: Option<ChannelValue>) {
        state.journal.push(JournalEntry {
            op,
            channel: channel.to_string(),
            value,
        });
    }

    fn connected_name(state: &BeamlineState, id: ChannelId, operation: &'static str) -> ScanResult<String> {
        let name = state
            .ids
            .get(&id)
            .cloned()
            .ok_or_else(|| ScanError::channel(format!("{:?}", id), operation, "unknown handle"))?;
        if !state.connected.contains(&id) {
            return Err(ScanError::channel(name, operation, "not connected"));
        }
        Ok(name)
    }

    fn nth_fails(state: &mut BeamlineState, name: &str, op: Op) -> bool {
        let counts = match op {
            Op::Write => &mut state.write_counts,
            _ => &mut state.read_counts,
        };
        let count = counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        let count = *count;

        state.faults.iter().any(|fault| match (fault, op) {
            (Fault::WriteFails { channel, nth }, Op::Write) => channel == name && *nth == count,
            (Fault::ReadFails { channel, nth }, Op::Read) => channel == name && *nth == count,
            _ => false,
        })
    }

    /// Next value of a readiness flag, advancing its countdown.
    fn read_flag(&self, state: &mut BeamlineState, name: &str, flag: Flag) -> ChannelValue {
        let never_ready = state
            .faults
            .iter()
            .any(|fault| matches!(fault, Fault::NeverReady(n) if n == name));
        let (ready, pending) = match flag {
            Flag::MotionDone => (1, 0),
            Flag::ScanBusy | Flag::Acquiring => (0, 1),
        };

        let remaining = state.countdowns.get(name).copied().unwrap_or(0);
        let value = if never_ready {
            pending
        } else if remaining > 0 {
            state.countdowns.insert(name.to_string(), remaining - 1);
            pending
        } else {
            ready
        };

        let value = ChannelValue::Int(value);
        state.values.insert(name.to_string(), value.clone());
        value
    }

    /// Side effects of a write on the simulated hardware.
    fn apply_write(&self, state: &mut BeamlineState, name: &str, value: &ChannelValue) {
        let names = &self.names;
        if name == names.fast_motor_position {
            state
                .countdowns
                .insert(names.fast_motor_done.clone(), self.behaviour.motion_polls);
            state
                .values
                .insert(names.fast_motor_done.clone(), ChannelValue::Int(0));
        } else if name == names.slow_motor_position {
            state
                .countdowns
                .insert(names.slow_motor_done.clone(), self.behaviour.motion_polls);
            state
                .values
                .insert(names.slow_motor_done.clone(), ChannelValue::Int(0));
        } else if name == names.fast_scan_busy && value.as_bool() == Some(true) {
            state
                .countdowns
                .insert(names.fast_scan_busy.clone(), self.behaviour.scan_polls);
            state
                .countdowns
                .insert(names.detector_acquiring.clone(), self.behaviour.drain_polls);
            state
                .values
                .insert(names.detector_acquiring.clone(), ChannelValue::Int(1));
        }
    }
}

#[async_trait]
impl ChannelAccess for SimulatedBeamline {
    async fn bind(&self, name: &str) -> ScanResult<ChannelId> {
        let hangs = {
            let mut state = self.state.lock().await;
            Self::record(&mut state, Op::Bind, name, None);

            if state
                .faults
                .iter()
                .any(|fault| matches!(fault, Fault::BindFails(n) if n == name))
            {
                return Err(ScanError::resolution(name, "simulated bind failure"));
            }
            if !state.values.contains_key(name) {
                return Err(ScanError::resolution(name, "no such channel"));
            }

            let hangs = state
                .faults
                .iter()
                .any(|fault| matches!(fault, Fault::BindHangs(n) if n == name));
            if !hangs {
                let id = ChannelId(state.next_id);
                state.next_id += 1;
                state.ids.insert(id, name.to_string());
                state.connected.insert(id);
                debug!(channel = name, ?id, "SimulatedBeamline: bound");
                return Ok(id);
            }
            hangs
        };

        debug_assert!(hangs);
        std::future::pending::<ScanResult<ChannelId>>().await
    }

    async fn read(&self, id: ChannelId) -> ScanResult<ChannelValue> {
        let mut state = self.state.lock().await;
        let name = Self::connected_name(&state, id, "read")?;

        if Self::nth_fails(&mut state, &name, Op::Read) {
            return Err(ScanError::channel(name, "read", "simulated disconnect"));
        }

        let value = match state.flags.get(&name).copied() {
            Some(flag) => self.read_flag(&mut state, &name, flag),
            None => state
                .values
                .get(&name)
                .cloned()
                .ok_or_else(|| ScanError::channel(name.clone(), "read", "no value"))?,
        };

        Self::record(&mut state, Op::Read, &name, Some(value.clone()));
        Ok(value)
    }

    async fn write(&self, id: ChannelId, value: ChannelValue) -> ScanResult<()> {
        let mut state = self.state.lock().await;
        let name = Self::connected_name(&state, id, "write")?;

        if Self::nth_fails(&mut state, &name, Op::Write) {
            return Err(ScanError::channel(name, "write", "simulated disconnect"));
        }

        debug!(channel = %name, %value, "SimulatedBeamline: write");
        self.apply_write(&mut state, &name, &value);
        if !state.flags.contains_key(&name) {
            state.values.insert(name.clone(), value.clone());
        }
        Self::record(&mut state, Op::Write, &name, Some(value));
        Ok(())
    }

    async fn release(&self, id: ChannelId) -> ScanResult<()> {
        let mut state = self.state.lock().await;
        let name = match state.ids.get(&id) {
            Some(name) => name.clone(),
            None => return Ok(()),
        };
        if !state.connected.remove(&id) {
            return Ok(());
        }
        Self::record(&mut state, Op::Release, &name, None);

        if state
            .faults
            .iter()
            .any(|fault| matches!(fault, Fault::ReleaseFails(n) if n == &name))
        {
            return Err(ScanError::channel(name, "release", "simulated failure"));
        }
        Ok(())
    }
}
