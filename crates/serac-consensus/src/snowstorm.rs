//! Transaction conflict graph.
//!
//! Two transactions conflict when they consume a common input; at most one
//! member of any conflict set can ever be accepted. Every input carries an
//! n-ary [`Snowball`] over its consumers, and a transaction only gains
//! confidence while it is the preferred consumer of every input it
//! touches.
//!
//! A transaction whose inputs are consumed by nobody else is virtuous and
//! finalizes at `beta_virtuous`; the moment a conflict appears, every
//! member of the set is rogue forever and needs `beta_rogue`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use serac_ids::Id;
use serac_utils::{Bag, Set};

use crate::error::{ConsensusError, Result};
use crate::params::Parameters;
use crate::snowball::Snowball;
use crate::tx::Tx;

struct TxEntry {
    tx: Arc<dyn Tx>,
    confidence: u32,
    rogue: bool,
}

/// The outcome of applying one poll to the conflict graph.
#[derive(Debug, Default, Clone)]
pub struct PollOutcome {
    /// Transactions accepted by this poll, in acceptance order.
    pub accepted: Vec<Id>,
    /// Transactions rejected by this poll.
    pub rejected: Vec<Id>,
}

/// Snowball voting over transaction conflict sets.
pub struct ConflictGraph {
    params: Parameters,
    entries: HashMap<Id, TxEntry>,
    /// input id -> processing transactions consuming it.
    consumers: HashMap<Id, Vec<Id>>,
    /// input id -> Snowball over its consumers.
    input_sets: HashMap<Id, Snowball>,
    /// Inputs consumed by an accepted transaction.
    spent: Set<Id>,
    accepted: Set<Id>,
    rejected: Set<Id>,
}

impl ConflictGraph {
    /// Creates an empty graph.
    pub fn new(params: Parameters) -> Result<Self> {
        params
            .validate()
            .map_err(ConsensusError::InvalidParameters)?;
        Ok(Self {
            params,
            entries: HashMap::new(),
            consumers: HashMap::new(),
            input_sets: HashMap::new(),
            spent: Set::new(),
            accepted: Set::new(),
            rejected: Set::new(),
        })
    }

    /// Registers a transaction. Re-adding a known transaction is a no-op,
    /// which lets rejected containers re-issue their payload. A
    /// transaction that consumes an already spent input is rejected on the
    /// spot.
    pub fn add(&mut self, tx: Arc<dyn Tx>) -> Result<()> {
        let id = tx.id();
        if self.entries.contains_key(&id)
            || self.accepted.contains(&id)
            || self.rejected.contains(&id)
        {
            return Ok(());
        }

        let inputs = tx.input_ids();
        if inputs.iter().any(|input| self.spent.contains(input)) {
            debug!(tx = %id, "rejecting transaction spending a settled input");
            tx.reject()?;
            self.rejected.add(id);
            return Ok(());
        }

        let mut rogue = false;
        for input in &inputs {
            let consumers = self.consumers.entry(*input).or_default();
            if !consumers.is_empty() {
                rogue = true;
                for other in consumers.iter() {
                    if let Some(entry) = self.entries.get_mut(other) {
                        entry.rogue = true;
                    }
                }
            }
            consumers.push(id);
            self.input_sets.entry(*input).or_default().add(id);
        }

        self.entries.insert(
            id,
            TxEntry {
                tx,
                confidence: 0,
                rogue,
            },
        );
        Ok(())
    }

    /// Returns true while the transaction is undecided.
    #[must_use]
    pub fn processing(&self, id: &Id) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns true if the transaction was accepted by this graph.
    #[must_use]
    pub fn is_accepted(&self, id: &Id) -> bool {
        self.accepted.contains(id)
    }

    /// Returns true if the transaction was rejected by this graph.
    #[must_use]
    pub fn is_rejected(&self, id: &Id) -> bool {
        self.rejected.contains(id)
    }

    /// Returns true if the transaction has no conflicts.
    #[must_use]
    pub fn is_virtuous(&self, id: &Id) -> bool {
        self.entries.get(id).is_some_and(|e| !e.rogue)
    }

    /// Returns true if any processing transaction is rogue.
    #[must_use]
    pub fn has_rogue(&self) -> bool {
        self.entries.values().any(|e| e.rogue)
    }

    /// The number of processing transactions.
    #[must_use]
    pub fn num_processing(&self) -> usize {
        self.entries.len()
    }

    /// Processing transactions that conflict with `id`.
    #[must_use]
    pub fn conflicts_of(&self, id: &Id) -> Set<Id> {
        let mut out = Set::new();
        if let Some(entry) = self.entries.get(id) {
            for input in entry.tx.input_ids() {
                if let Some(consumers) = self.consumers.get(&input) {
                    for other in consumers {
                        if other != id {
                            out.add(*other);
                        }
                    }
                }
            }
        }
        out
    }

    /// Returns true if `id` is the preferred consumer of every one of its
    /// inputs.
    #[must_use]
    pub fn is_preferred(&self, id: &Id) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        entry.tx.input_ids().iter().all(|input| {
            self.input_sets
                .get(input)
                .and_then(Snowball::preference)
                .is_some_and(|pref| pref == *id)
        })
    }

    fn beta(&self, entry: &TxEntry) -> usize {
        if entry.rogue {
            self.params.beta_rogue
        } else {
            self.params.beta_virtuous
        }
    }

    /// A dependency is met when it was accepted here or decided before this
    /// graph existed (unknown and not rejected).
    fn dependencies_met(&self, tx: &dyn Tx) -> bool {
        tx.dependencies().iter().all(|dep| {
            self.accepted.contains(dep)
                || (!self.entries.contains_key(dep) && !self.rejected.contains(dep))
        })
    }

    /// Applies one poll. `votes` counts the distinct voter slots that
    /// endorsed each transaction.
    pub fn record_poll(&mut self, votes: &Bag<Id>) -> Result<PollOutcome> {
        let alpha = self.params.alpha;
        let successful: Vec<Id> = self
            .entries
            .keys()
            .filter(|id| votes.count(id) >= alpha)
            .copied()
            .collect();

        // Feed each input's Snowball; preference switches only on strictly
        // more successful polls.
        for id in &successful {
            let inputs = match self.entries.get(id) {
                Some(entry) => entry.tx.input_ids(),
                None => continue,
            };
            for input in inputs {
                if let Some(sb) = self.input_sets.get_mut(&input) {
                    sb.record_successful_poll(*id);
                }
            }
        }

        // Confidence accrues only while preferred everywhere.
        let all_ids: Vec<Id> = self.entries.keys().copied().collect();
        for id in &all_ids {
            let preferred = self.is_preferred(id);
            let succeeded = successful.contains(id);
            if let Some(entry) = self.entries.get_mut(id) {
                if succeeded && preferred {
                    entry.confidence += 1;
                } else {
                    entry.confidence = 0;
                }
            }
        }

        self.finalize()
    }

    fn finalize(&mut self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();
        loop {
            let candidate = self.entries.iter().find_map(|(id, entry)| {
                let done = entry.confidence as usize >= self.beta(entry)
                    && self.is_preferred(id)
                    && self.dependencies_met(entry.tx.as_ref());
                done.then_some(*id)
            });
            let Some(id) = candidate else {
                break;
            };
            self.accept_tx(id, &mut outcome)?;
        }

        // A transaction whose dependency was rejected can never be
        // accepted.
        loop {
            let doomed = self.entries.iter().find_map(|(id, entry)| {
                entry
                    .tx
                    .dependencies()
                    .iter()
                    .any(|dep| self.rejected.contains(dep))
                    .then_some(*id)
            });
            let Some(id) = doomed else {
                break;
            };
            self.reject_tx(id, &mut outcome)?;
        }
        Ok(outcome)
    }

    fn accept_tx(&mut self, id: Id, outcome: &mut PollOutcome) -> Result<()> {
        let conflicts = self.conflicts_of(&id);
        let entry = self
            .entries
            .remove(&id)
            .ok_or_else(|| ConsensusError::UnknownDecision(id.to_string()))?;

        entry.tx.accept()?;
        debug!(tx = %id, "accepted transaction");
        self.accepted.add(id);
        // The inputs are settled; their conflict sets are over.
        for input in entry.tx.input_ids() {
            self.spent.add(input);
            self.consumers.remove(&input);
            self.input_sets.remove(&input);
        }
        outcome.accepted.push(id);

        for conflict in conflicts {
            self.reject_tx(conflict, outcome)?;
        }
        Ok(())
    }

    fn reject_tx(&mut self, id: Id, outcome: &mut PollOutcome) -> Result<()> {
        let Some(entry) = self.entries.remove(&id) else {
            return Ok(());
        };
        entry.tx.reject()?;
        debug!(tx = %id, "rejected transaction");
        self.rejected.add(id);
        for input in entry.tx.input_ids() {
            if let Some(consumers) = self.consumers.get_mut(&input) {
                consumers.retain(|c| *c != id);
                if consumers.is_empty() {
                    self.consumers.remove(&input);
                }
            }
            if let Some(sb) = self.input_sets.get_mut(&input) {
                sb.remove(&id);
            }
        }
        outcome.rejected.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices::Status;
    use crate::testing::{id_of, TestTx};

    fn graph(alpha: usize, bv: usize, br: usize) -> ConflictGraph {
        ConflictGraph::new(Parameters::new(3, alpha, bv, br)).unwrap()
    }

    fn votes(pairs: &[(Id, usize)]) -> Bag<Id> {
        let mut bag = Bag::new();
        for (id, count) in pairs {
            bag.add_count(*id, *count);
        }
        bag
    }

    #[test]
    fn lone_tx_is_virtuous_and_finalizes_fast() {
        let mut g = graph(2, 1, 2);
        let tx = TestTx::arc(1, vec![id_of(10)]);
        g.add(tx.clone()).unwrap();
        assert!(g.is_virtuous(&id_of(1)));

        let outcome = g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        assert_eq!(outcome.accepted, vec![id_of(1)]);
        assert_eq!(tx.status(), Status::Accepted);
        assert!(!g.processing(&id_of(1)));
    }

    #[test]
    fn conflict_makes_both_rogue_forever() {
        let mut g = graph(2, 1, 2);
        let a = TestTx::arc(1, vec![id_of(10)]);
        let b = TestTx::arc(2, vec![id_of(10)]);
        g.add(a).unwrap();
        assert!(g.is_virtuous(&id_of(1)));
        g.add(b).unwrap();
        assert!(!g.is_virtuous(&id_of(1)));
        assert!(!g.is_virtuous(&id_of(2)));
        assert!(g.has_rogue());
        assert_eq!(g.conflicts_of(&id_of(1)).list(), vec![id_of(2)]);
    }

    #[test]
    fn rogue_needs_beta_rogue() {
        let mut g = graph(2, 1, 2);
        let a = TestTx::arc(1, vec![id_of(10)]);
        let b = TestTx::arc(2, vec![id_of(10)]);
        g.add(a.clone()).unwrap();
        g.add(b.clone()).unwrap();

        // One successful poll is not enough for a rogue set.
        let outcome = g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        assert!(outcome.accepted.is_empty());

        let outcome = g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        assert_eq!(outcome.accepted, vec![id_of(1)]);
        assert_eq!(outcome.rejected, vec![id_of(2)]);
        assert_eq!(a.status(), Status::Accepted);
        assert_eq!(b.status(), Status::Rejected);
    }

    #[test]
    fn conflicting_votes_cannot_accept_both() {
        let mut g = graph(2, 1, 2);
        let a = TestTx::arc(1, vec![id_of(10)]);
        let b = TestTx::arc(2, vec![id_of(10)]);
        g.add(a.clone()).unwrap();
        g.add(b.clone()).unwrap();

        // Both reach alpha in the same polls; only the preferred one can
        // accumulate confidence.
        for _ in 0..4 {
            g.record_poll(&votes(&[(id_of(1), 2), (id_of(2), 2)]))
                .unwrap();
        }
        let accepted = usize::from(a.status() == Status::Accepted)
            + usize::from(b.status() == Status::Accepted);
        assert!(accepted <= 1, "conflicting transactions both accepted");
    }

    #[test]
    fn spending_a_settled_input_is_rejected_on_add() {
        let mut g = graph(2, 1, 2);
        let utxo = id_of(10);
        let a = TestTx::arc(1, vec![utxo]);
        g.add(a).unwrap();
        g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();

        let latecomer = TestTx::arc(2, vec![utxo]);
        g.add(latecomer.clone()).unwrap();
        assert_eq!(latecomer.status(), Status::Rejected);
        assert!(g.is_rejected(&id_of(2)));
    }

    #[test]
    fn failed_poll_resets_confidence() {
        let mut g = graph(2, 2, 3);
        let tx = TestTx::arc(1, vec![id_of(10)]);
        g.add(tx.clone()).unwrap();

        g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        g.record_poll(&votes(&[(id_of(1), 1)])).unwrap();
        g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        assert_eq!(tx.status(), Status::Processing);

        g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        assert_eq!(tx.status(), Status::Accepted);
    }

    #[test]
    fn dependency_gates_acceptance() {
        let mut g = graph(2, 1, 2);
        let dep = TestTx::arc(1, vec![id_of(10)]);
        let tx = Arc::new(TestTx::new(2, vec![id_of(11)]).with_deps(vec![id_of(1)]));
        g.add(dep.clone()).unwrap();
        g.add(tx.clone()).unwrap();

        // Only the dependent reaches quorum; it must wait for its
        // dependency.
        g.record_poll(&votes(&[(id_of(2), 2)])).unwrap();
        assert_eq!(tx.status(), Status::Processing);

        // Once the dependency is accepted the dependent follows.
        g.record_poll(&votes(&[(id_of(1), 2), (id_of(2), 2)]))
            .unwrap();
        assert_eq!(dep.status(), Status::Accepted);
        assert_eq!(tx.status(), Status::Accepted);
    }

    #[test]
    fn rejected_dependency_rejects_dependent() {
        let mut g = graph(2, 1, 2);
        let a = TestTx::arc(1, vec![id_of(10)]);
        let b = TestTx::arc(2, vec![id_of(10)]);
        let child = Arc::new(TestTx::new(3, vec![id_of(11)]).with_deps(vec![id_of(2)]));
        g.add(a.clone()).unwrap();
        g.add(b.clone()).unwrap();
        g.add(child.clone()).unwrap();

        for _ in 0..2 {
            g.record_poll(&votes(&[(id_of(1), 2)])).unwrap();
        }
        assert_eq!(b.status(), Status::Rejected);
        assert_eq!(child.status(), Status::Rejected);
    }

    #[test]
    fn quiesce_signal() {
        let mut g = graph(2, 1, 2);
        g.add(TestTx::arc(1, vec![id_of(10)])).unwrap();
        assert!(!g.has_rogue());
        g.add(TestTx::arc(2, vec![id_of(10)])).unwrap();
        assert!(g.has_rogue());
    }
}
