//! Channel handles: named, typed read/write endpoints to control-system values.
//!
//! The channel-access layer itself is an external collaborator. This module only
//! fixes the narrow contract the scan core consumes ([`ChannelAccess`]) and wraps a
//! bound endpoint in a cheap, cloneable [`Channel`] handle that carries its name for
//! error reporting.
//!
//! Every access can fail: a handle that was bound successfully may be disconnected
//! by the time it is read.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ScanResult;
use crate::poll::{poll_until, CancelToken, PollPolicy};

/// Opaque identifier handed out by a [`ChannelAccess`] implementation on bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// Value carried by a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// Integer or enum value.
    Int(i64),
    /// Double value.
    Float(f64),
    /// String or character-array value.
    Text(String),
}

impl ChannelValue {
    /// Numeric view of the value. Text is parsed if it looks like a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ChannelValue::Int(v) => Some(*v as f64),
            ChannelValue::Float(v) => Some(*v),
            ChannelValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Integer view of the value. Floats are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ChannelValue::Int(v) => Some(*v),
            ChannelValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            ChannelValue::Float(_) => None,
            ChannelValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Flag view: any non-zero number is true.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_f64().map(|v| v != 0.0)
    }

    /// Text view, only for text values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChannelValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelValue::Int(v) => write!(f, "{}", v),
            ChannelValue::Float(v) => write!(f, "{}", v),
            ChannelValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for ChannelValue {
    fn from(v: i64) -> Self {
        ChannelValue::Int(v)
    }
}

impl From<usize> for ChannelValue {
    fn from(v: usize) -> Self {
        ChannelValue::Int(v as i64)
    }
}

impl From<f64> for ChannelValue {
    fn from(v: f64) -> Self {
        ChannelValue::Float(v)
    }
}

impl From<bool> for ChannelValue {
    fn from(v: bool) -> Self {
        ChannelValue::Int(i64::from(v))
    }
}

impl From<String> for ChannelValue {
    fn from(v: String) -> Self {
        ChannelValue::Text(v)
    }
}

impl From<&str> for ChannelValue {
    fn from(v: &str) -> Self {
        ChannelValue::Text(v.to_string())
    }
}

/// Contract of the external channel-access layer.
///
/// Implementations map bind failures to `ScanError::Resolution` and read/write
/// failures to `ScanError::Channel`. Timeouts on bind are applied by the caller.
#[async_trait]
pub trait ChannelAccess: Send + Sync {
    /// Connect to the named endpoint.
    async fn bind(&self, name: &str) -> ScanResult<ChannelId>;

    /// Read the current value.
    async fn read(&self, id: ChannelId) -> ScanResult<ChannelValue>;

    /// Write a value and wait for the server to accept it.
    async fn write(&self, id: ChannelId, value: ChannelValue) -> ScanResult<()>;

    /// Drop the connection. Releasing an already released id is not an error.
    async fn release(&self, id: ChannelId) -> ScanResult<()>;
}

/// A bound channel.
///
/// Cloning is cheap: the access layer is shared behind an `Arc` and the handle
/// does not own the connection's lifecycle. Call [`Channel::release`] (normally via
/// the owning handle table) to disconnect.
#[derive(Clone)]
pub struct Channel {
    name: Arc<str>,
    id: ChannelId,
    access: Arc<dyn ChannelAccess>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Channel {
    /// Wrap an id previously returned by `access.bind(name)`.
    pub fn new(name: impl Into<Arc<str>>, id: ChannelId, access: Arc<dyn ChannelAccess>) -> Self {
        Self {
            name: name.into(),
            id,
            access,
        }
    }

    /// Name the channel was bound under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id from the access layer.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Read the current value.
    pub async fn get(&self) -> ScanResult<ChannelValue> {
        let value = self.access.read(self.id).await?;
        trace!(channel = %self.name, %value, "get");
        Ok(value)
    }

    /// Read as a float. Non-numeric values are a channel error.
    pub async fn get_f64(&self) -> ScanResult<f64> {
        let value = self.get().await?;
        value.as_f64().ok_or_else(|| {
            crate::error::ScanError::channel(
                self.name.as_ref(),
                "read",
                format!("expected a number, got {}", value),
            )
        })
    }

    /// Read as an integer.
    pub async fn get_i64(&self) -> ScanResult<i64> {
        let value = self.get().await?;
        value.as_i64().ok_or_else(|| {
            crate::error::ScanError::channel(
                self.name.as_ref(),
                "read",
                format!("expected an integer, got {}", value),
            )
        })
    }

    /// Read as a flag: any non-zero value is true.
    pub async fn get_bool(&self) -> ScanResult<bool> {
        let value = self.get().await?;
        value.as_bool().ok_or_else(|| {
            crate::error::ScanError::channel(
                self.name.as_ref(),
                "read",
                format!("expected a flag, got {}", value),
            )
        })
    }

    /// Write a value.
    pub async fn put(&self, value: impl Into<ChannelValue>) -> ScanResult<()> {
        let value = value.into();
        trace!(channel = %self.name, %value, "put");
        self.access.write(self.id, value).await
    }

    /// Poll the flag until it equals `expected`.
    ///
    /// Fails with `ScanError::Timeout` once `policy.timeout` has elapsed and with
    /// `ScanError::Cancelled` if the token fires first.
    pub async fn wait_for_flag(
        &self,
        expected: bool,
        policy: PollPolicy,
        cancel: &CancelToken,
    ) -> ScanResult<()> {
        poll_until(&self.name, policy, cancel, move || async move {
            Ok(self.get_bool().await? == expected)
        })
        .await
    }

    /// Poll the value until `predicate` holds.
    pub async fn wait_until<P>(
        &self,
        predicate: P,
        policy: PollPolicy,
        cancel: &CancelToken,
    ) -> ScanResult<()>
    where
        P: Fn(&ChannelValue) -> bool + Send + Sync,
    {
        let predicate = &predicate;
        poll_until(&self.name, policy, cancel, move || async move {
            let value = self.get().await?;
            Ok(predicate(&value))
        })
        .await
    }

    /// Release the handle. The clone must not be used afterwards.
    pub async fn release(&self) -> ScanResult<()> {
        self.access.release(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(ChannelValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(ChannelValue::Float(2.0).as_i64(), Some(2));
        assert_eq!(ChannelValue::Float(2.5).as_i64(), None);
        assert_eq!(ChannelValue::Text(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(ChannelValue::Text("motor".into()).as_f64(), None);
    }

    #[test]
    fn test_flag_view() {
        assert_eq!(ChannelValue::Int(1).as_bool(), Some(true));
        assert_eq!(ChannelValue::Float(0.0).as_bool(), Some(false));
        assert_eq!(ChannelValue::from(true), ChannelValue::Int(1));
    }

    #[test]
    fn test_text_view_only_for_text() {
        assert_eq!(ChannelValue::from("Scan11").as_text(), Some("Scan11"));
        assert_eq!(ChannelValue::Int(0).as_text(), None);
    }

    /// Access layer whose reads never come back.
    struct HangingRead;

    #[async_trait]
    impl ChannelAccess for HangingRead {
        async fn bind(&self, _name: &str) -> ScanResult<ChannelId> {
            Ok(ChannelId(1))
        }

        async fn read(&self, _id: ChannelId) -> ScanResult<ChannelValue> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(ChannelValue::Int(1))
        }

        async fn write(&self, _id: ChannelId, _value: ChannelValue) -> ScanResult<()> {
            Ok(())
        }

        async fn release(&self, _id: ChannelId) -> ScanResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_wait_bounded_when_read_hangs() {
        use std::time::Duration;
        use tokio::time::Instant;

        let done = Channel::new("m1.DMOV", ChannelId(1), Arc::new(HangingRead));
        let policy = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(1));
        let started = Instant::now();

        let err = done
            .wait_for_flag(true, policy, &CancelToken::never())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            crate::error::ScanError::Timeout { ref channel, .. } if channel == "m1.DMOV"
        ));
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    mod against_simulation {
        use super::*;
        use std::time::Duration;

        use crate::config::{BeamlineConfig, SimulationConfig};
        use crate::error::ScanError;
        use crate::hardware::SimulatedBeamline;
        use crate::scan::ChannelNames;

        const POLICY: PollPolicy =
            PollPolicy::new(Duration::from_millis(10), Duration::from_millis(200));

        fn beamline() -> Arc<SimulatedBeamline> {
            let names = ChannelNames::from_beamline(&BeamlineConfig {
                fast_scan: "sim:scan1".into(),
                slow_scan: "sim:scan2".into(),
                fast_motor: "sim:m1".into(),
                slow_motor: "sim:m2".into(),
                scaler_prefix: "sim:SIS:".into(),
                detector_prefix: "sim:XMAP:".into(),
                file_plugin: "netCDF1:".into(),
            });
            Arc::new(SimulatedBeamline::new(names, SimulationConfig::default()))
        }

        async fn bind(access: &Arc<SimulatedBeamline>, name: &str) -> Channel {
            let id = access.bind(name).await.unwrap();
            Channel::new(name, id, access.clone())
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_until_sees_motion_done() {
            let sim = beamline();
            let position = bind(&sim, "sim:m1.VAL").await;
            let done = bind(&sim, "sim:m1.DMOV").await;

            position.put(4.5).await.unwrap();
            done.wait_until(
                |value| value.as_i64() == Some(1),
                POLICY,
                &CancelToken::never(),
            )
            .await
            .unwrap();
            assert_eq!(position.get_f64().await.unwrap(), 4.5);
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_until_times_out_with_channel_name() {
            let sim = beamline();
            let points = bind(&sim, "sim:scan2.NPTS").await;

            let err = points
                .wait_until(|value| value.as_i64() == Some(99), POLICY, &CancelToken::never())
                .await
                .unwrap_err();
            assert!(matches!(err, ScanError::Timeout { ref channel, .. } if channel == "sim:scan2.NPTS"));
        }

        #[tokio::test]
        async fn test_flag_read_of_text_channel_fails() {
            let sim = beamline();
            let name = bind(&sim, "sim:XMAP:netCDF1:FileName").await;
            name.put("Scan11").await.unwrap();

            let err = name.get_bool().await.unwrap_err();
            assert!(matches!(err, ScanError::Channel { operation: "read", .. }));
            name.release().await.unwrap();
            assert_eq!(sim.open_handles().await, 0);
        }
    }
}
