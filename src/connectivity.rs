//! Background connectivity monitor.
//!
//! While the upstream is believed to be down, a single background task
//! probes it every `interval` until a probe succeeds. The monitor is
//! observable as a [`ConnectivityState`]:
//!
//! ```text
//!            start()                 probe ok
//! Unverified ───────▶ Probing ─────────────────▶ Verified
//!     ▲                │  ▲                          │
//!     │    stop()      │  └── probe failed, wait ─┘  │
//!     └────────────────┘                             │
//!     └──────────── invalidate() ───────────────────┘
//! ```
//!
//! At most one probe loop exists at a time. Stopping aborts the task, so a
//! pending wait ends immediately instead of running out its interval.
//!
//! The verified flag is only written while holding the loop slot, so a
//! loop that finishes can never clear a restart requested by
//! [`ConnectivityMonitor::invalidate`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Observable connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Last known state is "down" and nothing is probing.
    Unverified,
    /// A probe loop is running.
    Probing,
    /// The last probe or generation succeeded.
    Verified,
}

struct ProbeLoop {
    epoch: u64,
    handle: JoinHandle<()>,
}

/// Tracks whether the upstream is reachable and owns the probe loop.
pub struct ConnectivityMonitor {
    verified: AtomicBool,
    active: Mutex<Option<ProbeLoop>>,
    next_epoch: AtomicU64,
    interval: Mutex<Duration>,
}

impl ConnectivityMonitor {
    /// Create an unverified monitor that waits `interval` between probes.
    pub fn new(interval: Duration) -> Self {
        Self {
            verified: AtomicBool::new(false),
            active: Mutex::new(None),
            next_epoch: AtomicU64::new(0),
            interval: Mutex::new(interval),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ProbeLoop>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        if self.is_verified() {
            ConnectivityState::Verified
        } else if self.is_probing() {
            ConnectivityState::Probing
        } else {
            ConnectivityState::Unverified
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    /// Whether a probe loop is currently running.
    pub fn is_probing(&self) -> bool {
        self.active()
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    /// Change the wait between probes. Applies from the next wait.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock().unwrap_or_else(|e| e.into_inner()) = interval;
    }

    fn interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a successful upstream interaction and stop probing.
    pub fn mark_verified(&self) {
        let mut active = self.active();
        self.verified.store(true, Ordering::Release);
        if let Some(probe_loop) = active.take() {
            probe_loop.handle.abort();
        }
    }

    /// Forget the verified state and start probing with `probe`.
    pub fn invalidate<F, Fut>(self: &Arc<Self>, probe: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut active = self.active();
        self.verified.store(false, Ordering::Release);
        self.start_locked(&mut active, probe);
    }

    /// Start the probe loop unless one is already running.
    ///
    /// Requires a tokio runtime; outside one the call is logged and ignored.
    pub fn start<F, Fut>(self: &Arc<Self>, probe: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut active = self.active();
        self.start_locked(&mut active, probe);
    }

    fn start_locked<F, Fut>(self: &Arc<Self>, active: &mut Option<ProbeLoop>, probe: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if active.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, connectivity probing not started");
            return;
        };

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let monitor = Arc::downgrade(self);
        let handle = runtime.spawn(probe_loop(monitor, epoch, probe));
        *active = Some(ProbeLoop { epoch, handle });
    }

    /// Cancel the probe loop, if any.
    pub fn stop(&self) {
        if let Some(probe_loop) = self.active().take() {
            probe_loop.handle.abort();
        }
    }

    /// End the loop with `epoch` if the monitor is already verified.
    fn finish_if_verified(&self, epoch: u64) -> bool {
        let mut active = self.active();
        if !self.is_verified() {
            return false;
        }
        if active.as_ref().is_some_and(|l| l.epoch == epoch) {
            *active = None;
        }
        true
    }

    /// Record a successful probe by the loop with `epoch`.
    ///
    /// A superseded loop changes nothing.
    fn probe_succeeded(&self, epoch: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|l| l.epoch == epoch) {
            self.verified.store(true, Ordering::Release);
            *active = None;
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .finish()
    }
}

async fn probe_loop<F, Fut>(monitor: Weak<ConnectivityMonitor>, epoch: u64, probe: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        let interval = {
            let Some(monitor) = monitor.upgrade() else {
                return;
            };
            if monitor.finish_if_verified(epoch) {
                return;
            }
            monitor.interval()
        };

        info!("verifying upstream connection");
        if probe().await {
            if let Some(monitor) = monitor.upgrade() {
                monitor.probe_succeeded(epoch);
            }
            info!("upstream connection verified");
            return;
        }

        warn!(
            retry_in_ms = interval.as_millis() as u64,
            "upstream connection failed, will retry"
        );
        tokio::time::sleep(interval).await;
    }
}
