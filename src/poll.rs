//! Bounded polling and cooperative cancellation.
//!
//! Hardware readiness is observed by reading a flag until it changes, there is no
//! callback path. [`poll_until`] turns that into a bounded wait: a fixed interval
//! between reads, a maximum duration, a typed timeout error, and a cancellation
//! check between iterations. [`pause`] is the cancellable fixed delay used for
//! settle times.
//!
//! All sleeps go through `tokio::time`, so tests can run them on paused time.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep, timeout_at, Instant};

use crate::error::{ScanError, ScanResult};

/// Interval and upper bound for a wait-until-true loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between consecutive reads.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Give up once this much time has passed since the first read.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl PollPolicy {
    /// Policy reading every `interval` for at most `timeout`.
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// A handle that has not been cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Token to hand to the code that should observe cancellation.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation. Takes effect at the next poll iteration or delay.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(ScanError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> ScanResult<()> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Never resolves if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sleep for `duration` unless cancellation is requested first.
pub async fn pause(duration: Duration, cancel: &CancelToken) -> ScanResult<()> {
    cancel.check()?;
    tokio::select! {
        _ = sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
    }
}

/// Evaluate `check` every `policy.interval` until it returns `true`.
///
/// The first evaluation happens immediately. A single evaluation that outlives the
/// deadline fails with `ScanError::Timeout`, and cancellation interrupts it. Errors
/// from `check` propagate unchanged. `label` names the wait in the timeout error.
pub async fn poll_until<F, Fut>(
    label: &str,
    policy: PollPolicy,
    cancel: &CancelToken,
    mut check: F,
) -> ScanResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScanResult<bool>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;

    let timed_out = || ScanError::Timeout {
        channel: label.to_string(),
        waited: Instant::now().duration_since(started),
    };

    loop {
        cancel.check()?;
        let ready = tokio::select! {
            outcome = timeout_at(deadline, check()) => outcome.map_err(|_| timed_out())??,
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        };
        if ready {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out());
        }

        pause(policy.interval.min(deadline - now), cancel).await?;
    }
}
