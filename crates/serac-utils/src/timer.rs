//! Injectable clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A clock that normally reads the system time but can be frozen in tests.
///
/// Components that need to observe time (benchlist expiry, request
/// deadlines) take a `Clock` at construction; production code passes
/// `Clock::default()` and tests pin the time with [`Clock::set`].
///
/// Clones share the same frozen state.
///
/// # Examples
///
/// ```
/// use serac_utils::timer::Clock;
/// use std::time::Duration;
///
/// let clock = Clock::default();
/// let t0 = clock.now();
/// clock.set(t0);
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now(), t0 + chrono::Duration::seconds(5));
/// ```
#[derive(Clone, Default)]
pub struct Clock {
    frozen: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Clock {
    /// Returns the current time, or the frozen time if one is set.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.frozen.lock().unwrap_or_else(Utc::now)
    }

    /// Freezes the clock at `time`. Every clone observes the change.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.frozen.lock() = Some(time);
    }

    /// Advances a frozen clock by `delta`.
    ///
    /// # Panics
    ///
    /// Panics if the clock has not been frozen with [`Clock::set`].
    pub fn advance(&self, delta: Duration) {
        let mut frozen = self.frozen.lock();
        let current = frozen.expect("advance requires a frozen clock");
        *frozen = Some(current + chrono::Duration::from_std(delta).expect("delta out of range"));
    }

    /// Unfreezes the clock.
    pub fn unfreeze(&self) {
        *self.frozen.lock() = None;
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self.frozen.lock() {
            Some(t) => write!(f, "Clock(frozen at {t})"),
            None => write!(f, "Clock(system)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_is_stable() {
        let clock = Clock::default();
        let t = Utc::now();
        clock.set(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn clones_share_state() {
        let clock = Clock::default();
        let other = clock.clone();
        let t = Utc::now();
        clock.set(t);
        assert_eq!(other.now(), t);
        other.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), t + chrono::Duration::seconds(1));
    }

    #[test]
    fn unfrozen_clock_moves() {
        let clock = Clock::default();
        let t = Utc::now();
        clock.set(t);
        clock.unfreeze();
        assert!(clock.now() >= t);
    }
}
