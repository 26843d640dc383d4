//! Adaptive per-request timeouts.
//!
//! Every outbound request registers a deadline and a timeout action. One
//! dispatch loop wakes at the nearest deadline and fires the action.
//! Completions feed the observed latency into an EWMA and nudge the shared
//! timeout down; expiries nudge it up. The timeout always stays within
//! `[minimum, maximum]`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use serac_ids::{Id, NodeId};
use serac_utils::timer::Clock;

/// EWMA smoothing factor for latency observations.
const LATENCY_ALPHA: f64 = 0.1;

/// Timeout tuning.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Starting timeout.
    pub initial: Duration,
    /// Lower bound.
    pub minimum: Duration,
    /// Upper bound.
    pub maximum: Duration,
    /// Added to the timeout when a request expires.
    pub increase: Duration,
    /// Subtracted from the timeout when a request completes.
    pub decrease: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            minimum: Duration::from_millis(500),
            maximum: Duration::from_secs(30),
            increase: Duration::from_millis(500),
            decrease: Duration::from_millis(250),
        }
    }
}

/// Identifies one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Chain the request belongs to.
    pub chain_id: Id,
    /// Peer the request was sent to.
    pub node: NodeId,
    /// Request id chosen by the engine.
    pub request_id: u32,
}

struct Entry {
    deadline: DateTime<Utc>,
    registered: DateTime<Utc>,
    on_timeout: Box<dyn FnOnce() + Send>,
}

struct Inner {
    config: TimeoutConfig,
    timeout: Duration,
    latency_ewma: Option<f64>,
    pending: HashMap<RequestKey, Entry>,
}

/// Shared timeout manager; one instance serves every chain.
pub struct TimeoutManager {
    clock: Clock,
    notify: Notify,
    inner: Mutex<Inner>,
}

impl TimeoutManager {
    /// Creates a manager.
    pub fn new(config: TimeoutConfig, clock: Clock) -> Self {
        let timeout = config.initial.clamp(config.minimum, config.maximum);
        Self {
            clock,
            notify: Notify::new(),
            inner: Mutex::new(Inner {
                config,
                timeout,
                latency_ewma: None,
                pending: HashMap::new(),
            }),
        }
    }

    /// The timeout that will be applied to the next request.
    pub fn current_timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    /// The smoothed observed latency, if any response has arrived yet.
    pub fn average_latency(&self) -> Option<Duration> {
        self.inner
            .lock()
            .latency_ewma
            .map(Duration::from_secs_f64)
    }

    /// The number of outstanding requests.
    pub fn num_pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Registers an outstanding request; `on_timeout` fires if no matching
    /// [`TimeoutManager::remove`] arrives before the deadline.
    pub fn register(&self, key: RequestKey, on_timeout: Box<dyn FnOnce() + Send>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let deadline = now
            + chrono::Duration::from_std(inner.timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        trace!(?key, %deadline, "registered request timeout");
        inner.pending.insert(
            key,
            Entry {
                deadline,
                registered: now,
                on_timeout,
            },
        );
        drop(inner);
        self.notify.notify_one();
    }

    /// Completes a request, sampling its latency. Returns the latency, or
    /// `None` if the request already expired or was never registered.
    pub fn remove(&self, key: &RequestKey) -> Option<Duration> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let entry = inner.pending.remove(key)?;
        let latency = (now - entry.registered).to_std().unwrap_or_default();

        let sample = latency.as_secs_f64();
        inner.latency_ewma = Some(match inner.latency_ewma {
            Some(ewma) => ewma * (1.0 - LATENCY_ALPHA) + sample * LATENCY_ALPHA,
            None => sample,
        });

        inner.timeout = inner
            .timeout
            .saturating_sub(inner.config.decrease)
            .max(inner.config.minimum);
        Some(latency)
    }

    /// Cancels a request without firing or sampling it.
    pub fn cancel(&self, key: &RequestKey) {
        self.inner.lock().pending.remove(key);
    }

    /// Cancels everything; used at shutdown.
    pub fn cancel_all(&self) {
        self.inner.lock().pending.clear();
        self.notify.notify_one();
    }

    /// Fires every expired request, returning how many fired.
    pub fn fire_expired(&self) -> usize {
        let now = self.clock.now();
        let mut fired = Vec::new();
        {
            let mut inner = self.inner.lock();
            let due: Vec<RequestKey> = inner
                .pending
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(k, _)| *k)
                .collect();
            for key in due {
                if let Some(entry) = inner.pending.remove(&key) {
                    debug!(?key, "request timed out");
                    inner.timeout = inner
                        .timeout
                        .saturating_add(inner.config.increase)
                        .min(inner.config.maximum);
                    fired.push(entry.on_timeout);
                }
            }
        }
        let count = fired.len();
        // Actions run outside the lock; they typically re-enter the router.
        for action in fired {
            action();
        }
        count
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .pending
            .values()
            .map(|e| e.deadline)
            .min()
    }

    /// Dispatch loop: sleeps until the nearest deadline, fires expiries,
    /// and re-arms whenever a new request registers. Run as a background
    /// task; aborting the task stops dispatch.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.next_deadline() {
                None => self.notify.notified().await,
                Some(deadline) => {
                    let now = self.clock.now();
                    if deadline <= now {
                        self.fire_expired();
                        continue;
                    }
                    let wait = (deadline - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {
                            self.fire_expired();
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::node_of;

    fn key(request_id: u32) -> RequestKey {
        RequestKey {
            chain_id: Id::from_bytes([1; 32]),
            node: node_of(1),
            request_id,
        }
    }

    fn config() -> TimeoutConfig {
        TimeoutConfig {
            initial: Duration::from_secs(2),
            minimum: Duration::from_secs(1),
            maximum: Duration::from_secs(4),
            increase: Duration::from_millis(500),
            decrease: Duration::from_millis(500),
        }
    }

    fn frozen_clock() -> Clock {
        let clock = Clock::default();
        clock.set(Utc::now());
        clock
    }

    #[test]
    fn completion_shrinks_timeout_to_minimum() {
        let clock = frozen_clock();
        let mgr = TimeoutManager::new(config(), clock.clone());

        for i in 0..5 {
            mgr.register(key(i), Box::new(|| {}));
            clock.advance(Duration::from_millis(100));
            assert!(mgr.remove(&key(i)).is_some());
        }
        assert_eq!(mgr.current_timeout(), Duration::from_secs(1));
        assert!(mgr.average_latency().is_some());
    }

    #[test]
    fn expiry_grows_timeout_to_maximum() {
        let clock = frozen_clock();
        let mgr = TimeoutManager::new(config(), clock.clone());
        let fired = Arc::new(Mutex::new(0));

        for i in 0..6 {
            let fired = fired.clone();
            mgr.register(key(i), Box::new(move || *fired.lock() += 1));
            clock.advance(Duration::from_secs(5));
            assert_eq!(mgr.fire_expired(), 1);
        }
        assert_eq!(*fired.lock(), 6);
        assert_eq!(mgr.current_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn removed_request_does_not_fire() {
        let clock = frozen_clock();
        let mgr = TimeoutManager::new(config(), clock.clone());
        let fired = Arc::new(Mutex::new(false));

        let flag = fired.clone();
        mgr.register(key(0), Box::new(move || *flag.lock() = true));
        mgr.remove(&key(0));

        clock.advance(Duration::from_secs(60));
        assert_eq!(mgr.fire_expired(), 0);
        assert!(!*fired.lock());
    }

    #[test]
    fn cancel_discards_without_sampling() {
        let clock = frozen_clock();
        let mgr = TimeoutManager::new(config(), clock.clone());
        mgr.register(key(0), Box::new(|| {}));
        mgr.cancel(&key(0));
        assert_eq!(mgr.num_pending(), 0);
        assert!(mgr.average_latency().is_none());
        // Late response for a cancelled request is a no-op.
        assert!(mgr.remove(&key(0)).is_none());
    }

    #[tokio::test]
    async fn dispatch_loop_fires_deadlines() {
        let mgr = Arc::new(TimeoutManager::new(
            TimeoutConfig {
                initial: Duration::from_millis(20),
                minimum: Duration::from_millis(10),
                maximum: Duration::from_millis(100),
                increase: Duration::from_millis(10),
                decrease: Duration::from_millis(10),
            },
            Clock::default(),
        ));
        let task = tokio::spawn(mgr.clone().run());

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        mgr.register(
            key(0),
            Box::new(move || {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }),
        );

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("timeout action never fired")
            .unwrap();
        task.abort();
    }
}
