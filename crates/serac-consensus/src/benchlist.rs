//! Validator quarantine.
//!
//! A peer that consistently fails to answer queries inflates network
//! latency: every poll that includes it waits for the full timeout.
//! After `threshold` consecutive failures spanning at least
//! `minimum_failing_duration`, the peer is benched: its queries fail
//! immediately with a null vote until a randomized end time.
//!
//! End times are drawn from `[max(last_end, now + duration/2), now +
//! duration]`, which keeps the bench order sorted by expiry. The total
//! benched stake is capped at `max_portion` of the validator set.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, error};

use serac_ids::NodeId;
use serac_utils::timer::Clock;
use serac_utils::Set;

use crate::validators::ValidatorSet;

/// Benchlist tuning.
#[derive(Debug, Clone)]
pub struct BenchlistConfig {
    /// Consecutive failures required to bench.
    pub threshold: usize,
    /// The failure streak must span at least this long.
    pub minimum_failing_duration: Duration,
    /// Nominal bench duration; actual end times are randomized within it.
    pub duration: Duration,
    /// Cap on benched stake as a portion of total stake.
    pub max_portion: f64,
}

impl Default for BenchlistConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            minimum_failing_duration: Duration::from_secs(150),
            duration: Duration::from_secs(15 * 60),
            max_portion: 0.5,
        }
    }
}

#[derive(Clone, Copy)]
struct FailureStreak {
    first: DateTime<Utc>,
    consecutive: usize,
}

#[derive(Default)]
struct State {
    /// node -> outstanding request ids and when they were registered.
    pending: HashMap<NodeId, HashMap<u32, DateTime<Utc>>>,
    failures: HashMap<NodeId, FailureStreak>,
    bench_times: HashMap<NodeId, DateTime<Utc>>,
    /// Benched nodes ordered by end time.
    bench_order: VecDeque<NodeId>,
    benched: Set<NodeId>,
}

/// Tracks query outcomes per validator and quarantines repeat offenders.
pub struct QueryBenchlist {
    validators: Arc<ValidatorSet>,
    config: BenchlistConfig,
    clock: Clock,
    rng: Mutex<StdRng>,
    state: Mutex<State>,
}

impl QueryBenchlist {
    /// Creates a benchlist over `validators`.
    pub fn new(
        validators: Arc<ValidatorSet>,
        config: BenchlistConfig,
        clock: Clock,
        rng: StdRng,
    ) -> Self {
        Self {
            validators,
            config,
            clock,
            rng: Mutex::new(rng),
            state: Mutex::new(State::default()),
        }
    }

    /// Registers an outgoing query. Returns false if the validator is
    /// benched and the send should be skipped.
    pub fn register_query(&self, node: NodeId, request_id: u32) -> bool {
        let mut state = self.state.lock();
        if self.check_benched(&mut state, &node) {
            return false;
        }
        state
            .pending
            .entry(node)
            .or_default()
            .insert(request_id, self.clock.now());
        true
    }

    /// Registers a response, resetting the validator's failure streak.
    pub fn register_response(&self, node: NodeId, request_id: u32) {
        let mut state = self.state.lock();
        if !Self::remove_query(&mut state, &node, request_id) {
            return;
        }
        state.failures.remove(&node);
    }

    /// Registers a query failure, benching the validator once its streak
    /// crosses the threshold.
    pub fn query_failed(&self, node: NodeId, request_id: u32) {
        let mut state = self.state.lock();
        if !Self::remove_query(&mut state, &node, request_id) {
            return;
        }

        let now = self.clock.now();
        let streak = state.failures.entry(node).or_insert(FailureStreak {
            first: now,
            consecutive: 0,
        });
        streak.consecutive += 1;
        let streak = *streak;

        let min_span = chrono::Duration::from_std(self.config.minimum_failing_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        if streak.consecutive >= self.config.threshold && now >= streak.first + min_span {
            self.bench(&mut state, node);
        }
    }

    /// Returns true if the validator is currently benched.
    pub fn is_benched(&self, node: &NodeId) -> bool {
        let mut state = self.state.lock();
        self.check_benched(&mut state, node)
    }

    /// The number of currently benched validators.
    pub fn num_benched(&self) -> usize {
        self.state.lock().benched.len()
    }

    /// Combined stake of the benched validators.
    pub fn benched_weight(&self) -> u64 {
        let state = self.state.lock();
        self.validators.subset_weight(&state.benched)
    }

    fn remove_query(state: &mut State, node: &NodeId, request_id: u32) -> bool {
        let Some(requests) = state.pending.get_mut(node) else {
            return false;
        };
        if requests.remove(&request_id).is_none() {
            return false;
        }
        if requests.is_empty() {
            state.pending.remove(node);
        }
        true
    }

    fn check_benched(&self, state: &mut State, node: &NodeId) -> bool {
        let Some(end) = state.bench_times.get(node).copied() else {
            return false;
        };
        if self.clock.now() < end {
            return true;
        }
        self.cleanup(state);
        false
    }

    fn bench(&self, state: &mut State, node: NodeId) {
        if state.benched.contains(&node) {
            return;
        }

        // Randomized end time in [max(last_end, now + duration/2),
        // now + duration], preserving the expiry ordering of bench_order.
        let now = self.clock.now();
        let duration = match chrono::Duration::from_std(self.config.duration) {
            Ok(d) => d,
            Err(_) => {
                error!("bench duration out of range");
                return;
            }
        };
        let mut min_end = now + duration / 2;
        if let Some(last) = state.bench_order.back() {
            if let Some(last_end) = state.bench_times.get(last) {
                if *last_end > min_end {
                    min_end = *last_end;
                }
            }
        }
        let max_end = now + duration;
        let window = (max_end - min_end).num_milliseconds().max(0);
        let offset = self.rng.lock().gen_range(0.0..=1.0) * window as f64;
        let end = min_end + chrono::Duration::milliseconds(offset as i64);

        debug!(%node, until = %end, "benching validator after repeated query failures");
        state.bench_times.insert(node, end);
        state.bench_order.push_back(node);
        state.benched.add(node);
        state.failures.remove(&node);

        self.cleanup(state);
    }

    /// Removes expired entries in end-time order and keeps removing the
    /// earliest-expiring entries while the benched stake exceeds the cap.
    fn cleanup(&self, state: &mut State) {
        let now = self.clock.now();
        let total = self.validators.total_weight();
        let max_weight = (total as f64 * self.config.max_portion) as u64;
        let mut weight = self.validators.subset_weight(&state.benched);

        while let Some(front) = state.bench_order.front().copied() {
            let end = state.bench_times.get(&front).copied();
            let expired = !end.is_some_and(|end| now < end);
            if !expired && weight < max_weight {
                break;
            }
            weight = weight.saturating_sub(self.validators.weight(&front));
            state.bench_order.pop_front();
            state.bench_times.remove(&front);
            state.benched.remove(&front);
            debug!(node = %front, "removed validator from benchlist");
        }
    }
}
