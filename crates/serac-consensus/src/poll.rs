//! Outstanding poll tracking.
//!
//! Each poll waits on the validators it was sent to. Responses and drops
//! (timeouts, benched peers) consume one sampled slot each; duplicate
//! responses beyond a validator's sampled multiplicity are ignored.
//! Finished polls are delivered strictly in the order they were started: a
//! later poll's result is held until every earlier poll has finished.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use serac_ids::{Id, NodeId};
use serac_utils::{Bag, UniqueBag};

/// When a poll may finish before every validator responded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Wait for every response or drop.
    Full,
    /// Finish as soon as one choice reached alpha, or no choice can.
    Early,
}

struct Poll {
    /// Unused response slots per validator; a validator sampled with
    /// multiplicity m starts with m slots.
    slots: HashMap<NodeId, Vec<u32>>,
    votes: UniqueBag<Id>,
    outstanding: usize,
}

impl Poll {
    fn new(validators: &Bag<NodeId>) -> Self {
        let mut slots: HashMap<NodeId, Vec<u32>> = HashMap::new();
        let mut next = 0u32;
        for (node, count) in validators.iter() {
            let entry = slots.entry(*node).or_default();
            for _ in 0..count {
                entry.push(next);
                next += 1;
            }
        }
        Self {
            slots,
            votes: UniqueBag::new(),
            outstanding: next as usize,
        }
    }

    /// Consumes one slot of `node`, recording its votes. Returns false if
    /// the node has no slot left.
    fn record(&mut self, node: &NodeId, votes: &[Id]) -> bool {
        let Some(slots) = self.slots.get_mut(node) else {
            return false;
        };
        let Some(slot) = slots.pop() else {
            return false;
        };
        for id in votes {
            self.votes.insert(*id, slot);
        }
        self.outstanding -= 1;
        true
    }

    fn finished(&self, alpha: usize, policy: Termination) -> bool {
        if self.outstanding == 0 {
            return true;
        }
        if policy == Termination::Full {
            return false;
        }
        let max = self
            .votes
            .iter()
            .map(|(_, slots)| slots.len())
            .max()
            .unwrap_or(0);
        max >= alpha || max + self.outstanding < alpha
    }
}

struct PollEntry {
    request_id: u32,
    poll: Poll,
    finished: bool,
}

/// The set of outstanding polls for one engine.
pub struct PollSet {
    alpha: usize,
    policy: Termination,
    polls: VecDeque<PollEntry>,
}

impl PollSet {
    /// Creates a poll set with the given quorum and termination policy.
    #[must_use]
    pub fn new(alpha: usize, policy: Termination) -> Self {
        Self {
            alpha,
            policy,
            polls: VecDeque::new(),
        }
    }

    /// The number of polls not yet delivered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.polls.len()
    }

    /// Returns true if no poll is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    /// Starts a poll. Returns false if the request id is already in use.
    pub fn add(&mut self, request_id: u32, validators: &Bag<NodeId>) -> bool {
        if self.polls.iter().any(|e| e.request_id == request_id) {
            debug!(request_id, "dropping duplicated poll");
            return false;
        }
        self.polls.push_back(PollEntry {
            request_id,
            poll: Poll::new(validators),
            finished: false,
        });
        true
    }

    /// Records a response. Returns every poll that can now be delivered, in
    /// insertion order.
    pub fn vote(
        &mut self,
        request_id: u32,
        node: &NodeId,
        votes: &[Id],
    ) -> Vec<(u32, UniqueBag<Id>)> {
        self.record(request_id, node, votes)
    }

    /// Records a null response (timeout or benched validator).
    pub fn drop_vote(&mut self, request_id: u32, node: &NodeId) -> Vec<(u32, UniqueBag<Id>)> {
        self.record(request_id, node, &[])
    }

    fn record(
        &mut self,
        request_id: u32,
        node: &NodeId,
        votes: &[Id],
    ) -> Vec<(u32, UniqueBag<Id>)> {
        let Some(entry) = self
            .polls
            .iter_mut()
            .find(|e| e.request_id == request_id)
        else {
            debug!(request_id, "response for unknown poll");
            return Vec::new();
        };
        if entry.finished {
            return Vec::new();
        }
        if !entry.poll.record(node, votes) {
            debug!(request_id, %node, "duplicate response ignored");
            return Vec::new();
        }
        if entry.poll.finished(self.alpha, self.policy) {
            entry.finished = true;
        }
        self.drain_finished()
    }

    /// Pops finished polls from the front; an unfinished earlier poll holds
    /// back every later result.
    fn drain_finished(&mut self) -> Vec<(u32, UniqueBag<Id>)> {
        let mut out = Vec::new();
        while self.polls.front().is_some_and(|front| front.finished) {
            if let Some(entry) = self.polls.pop_front() {
                out.push((entry.request_id, entry.poll.votes));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id_of, node_of};

    fn validators(nodes: &[NodeId]) -> Bag<NodeId> {
        Bag::of(nodes.iter().copied())
    }

    #[test]
    fn full_poll_waits_for_everyone() {
        let mut set = PollSet::new(2, Termination::Full);
        let (a, b) = (node_of(1), node_of(2));
        assert!(set.add(0, &validators(&[a, b])));
        assert!(!set.add(0, &validators(&[a, b])));

        assert!(set.vote(0, &a, &[id_of(1)]).is_empty());
        let done = set.vote(0, &b, &[id_of(1)]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, 0);
        assert_eq!(done[0].1.count(&id_of(1)), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn unknown_request_is_discarded() {
        let mut set = PollSet::new(2, Termination::Full);
        assert!(set.vote(7, &node_of(1), &[id_of(1)]).is_empty());
    }

    #[test]
    fn duplicate_response_is_ignored() {
        let mut set = PollSet::new(2, Termination::Full);
        let (a, b) = (node_of(1), node_of(2));
        set.add(0, &validators(&[a, b]));

        assert!(set.vote(0, &a, &[id_of(1)]).is_empty());
        // Same validator again: no extra weight, poll still open.
        assert!(set.vote(0, &a, &[id_of(1)]).is_empty());

        let done = set.vote(0, &b, &[id_of(1)]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1.count(&id_of(1)), 2);
    }

    #[test]
    fn sampled_multiplicity_counts_twice() {
        let mut set = PollSet::new(2, Termination::Full);
        let a = node_of(1);
        let mut vdrs = Bag::new();
        vdrs.add_count(a, 2);
        set.add(0, &vdrs);

        assert!(set.vote(0, &a, &[id_of(1)]).is_empty());
        let done = set.vote(0, &a, &[id_of(1)]);
        assert_eq!(done[0].1.count(&id_of(1)), 2);
    }

    #[test]
    fn early_termination_at_alpha() {
        let mut set = PollSet::new(2, Termination::Early);
        let (a, b, c) = (node_of(1), node_of(2), node_of(3));
        set.add(0, &validators(&[a, b, c]));

        assert!(set.vote(0, &a, &[id_of(1)]).is_empty());
        // Second matching vote reaches alpha; no need to wait for c.
        let done = set.vote(0, &b, &[id_of(1)]);
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn early_termination_when_unreachable() {
        let mut set = PollSet::new(3, Termination::Early);
        let (a, b, c) = (node_of(1), node_of(2), node_of(3));
        set.add(0, &validators(&[a, b, c]));

        assert!(set.drop_vote(0, &a).is_empty());
        // Best case is now 1 vote + 1 outstanding = 2 < alpha.
        let done = set.drop_vote(0, &b);
        assert_eq!(done.len(), 1);
        assert!(done[0].1.is_empty());
    }

    #[test]
    fn split_vote_does_not_terminate_early() {
        let mut set = PollSet::new(2, Termination::Early);
        let (a, b, c) = (node_of(1), node_of(2), node_of(3));
        set.add(0, &validators(&[a, b, c]));

        // One failure and one chit: 1 + 1 outstanding can still reach
        // alpha, so the poll must stay open.
        assert!(set.drop_vote(0, &a).is_empty());
        assert!(set.vote(0, &b, &[id_of(1)]).is_empty());

        // A second failure resolves it with no quorum.
        let done = set.drop_vote(0, &c);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].1.count(&id_of(1)), 1);
    }

    #[test]
    fn results_delivered_in_insertion_order() {
        let mut set = PollSet::new(1, Termination::Full);
        let (a, b) = (node_of(1), node_of(2));
        set.add(0, &validators(&[a]));
        set.add(1, &validators(&[b]));

        // Poll 1 finishes first but must wait for poll 0.
        assert!(set.vote(1, &b, &[id_of(2)]).is_empty());

        let done = set.vote(0, &a, &[id_of(1)]);
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].0, 0);
        assert_eq!(done[1].0, 1);
    }
}
