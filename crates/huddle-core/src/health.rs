use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HealthConfig;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Detects silent connection death: a socket that stopped delivering
/// messages without reporting a protocol-level failure.
///
/// The socket receive path calls [`ack`](HealthMonitor::ack) for every
/// inbound message. A periodic loop compares the last-ack timestamp against
/// the liveness threshold; while the silence persists, the liveness-lost
/// callback fires on every check. Otherwise the on-interval callback fires,
/// which the connection controller uses for opportunistic keep-alives.
pub struct HealthMonitor {
    interval: Duration,
    threshold: Duration,
    epoch: Instant,
    /// Milliseconds since `epoch` of the most recent ack, monotone via fetch_max.
    last_ack_ms: Arc<AtomicU64>,
    on_interval: Arc<RwLock<Option<Callback>>>,
    on_liveness_lost: Arc<RwLock<Option<Callback>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.check_interval_ms),
            threshold: Duration::from_millis(config.liveness_threshold_ms),
            epoch: Instant::now(),
            last_ack_ms: Arc::new(AtomicU64::new(0)),
            on_interval: Arc::new(RwLock::new(None)),
            on_liveness_lost: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Record "now" as the last time the connection proved alive.
    ///
    /// Lock-free; safe to call from the socket receive path.
    pub fn ack(&self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_ack_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    pub fn on_interval<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_interval.write().unwrap() = Some(Arc::new(callback));
    }

    pub fn on_liveness_lost<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_liveness_lost.write().unwrap() = Some(Arc::new(callback));
    }

    /// Start the periodic check loop. Calling while already running is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        // Treat (re)start as proof of life so a stale timestamp from a
        // previous connection cannot trip the threshold immediately.
        self.ack();

        let interval = self.interval;
        let threshold = self.threshold;
        let epoch = self.epoch;
        let last_ack_ms = self.last_ack_ms.clone();
        let on_interval = self.on_interval.clone();
        let on_liveness_lost = self.on_liveness_lost.clone();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately; skip it so the first real
            // check happens one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let last = Duration::from_millis(last_ack_ms.load(Ordering::Relaxed));
                let silence = epoch.elapsed().saturating_sub(last);
                if silence > threshold {
                    tracing::warn!("no ack for {silence:?}, declaring connection dead");
                    let cb = on_liveness_lost.read().unwrap().clone();
                    if let Some(cb) = cb {
                        cb();
                    }
                } else {
                    let cb = on_interval.read().unwrap().clone();
                    if let Some(cb) = cb {
                        cb();
                    }
                }
            }
        }));
        tracing::debug!("health monitor started (interval {:?})", self.interval);
    }

    /// Cancel the check loop. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            tracing::debug!("health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
