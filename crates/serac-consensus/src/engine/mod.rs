//! The transitive engine.
//!
//! Glues the network to a consensus instance. Decisions are issued as soon
//! as their ancestry allows; anything arriving early parks in the
//! [`blocker`] wait graph. Completed polls are bubbled to the nearest
//! issued ancestors and recorded; while consensus cannot quiesce the
//! engine keeps `concurrent_repolls` pull queries in flight for the
//! current preference.
//!
//! All entry points run on the owning chain's single handler task.

mod blocker;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use serac_ids::{Id, NodeId};
use serac_utils::{Bag, Set, UniqueBag};

use crate::benchlist::QueryBenchlist;
use crate::choices::Decision;
use crate::consensus::Consensus;
use crate::error::Result;
use crate::events::EventDispatcher;
use crate::params::Parameters;
use crate::poll::{PollSet, Termination};
use crate::sender::Sender;
use crate::validators::ValidatorSet;
use crate::vm::{DecisionSource, VerifyError};

use blocker::{Blocker, Convincer, Issuer, Outcome, Task, Voter};

/// The transitive consensus engine for one chain.
pub struct Transitive {
    chain_id: Id,
    params: Parameters,
    consensus: Box<dyn Consensus>,
    source: Arc<dyn DecisionSource>,
    sender: Arc<dyn Sender>,
    validators: Arc<ValidatorSet>,
    benchlist: Option<Arc<QueryBenchlist>>,
    events: Arc<EventDispatcher>,
    polls: PollSet,
    blocker: Blocker,
    /// Decisions with a live issuer.
    pending: Set<Id>,
    /// Outstanding container requests by request id.
    requested: HashMap<u32, Id>,
    /// Ids with an outstanding request, to avoid duplicate fetches.
    fetching: Set<Id>,
    request_id: u32,
    rng: StdRng,
    /// Guards against re-entering repoll when a fresh poll resolves
    /// instantly (e.g. every sampled validator is benched).
    repolling: bool,
}

impl Transitive {
    /// Creates an engine around an initialized consensus instance.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: Parameters,
        chain_id: Id,
        consensus: Box<dyn Consensus>,
        source: Arc<dyn DecisionSource>,
        sender: Arc<dyn Sender>,
        validators: Arc<ValidatorSet>,
        events: Arc<EventDispatcher>,
        rng: StdRng,
    ) -> Self {
        let alpha = params.alpha;
        Self {
            chain_id,
            params,
            consensus,
            source,
            sender,
            validators,
            benchlist: None,
            events,
            polls: PollSet::new(alpha, Termination::Early),
            blocker: Blocker::new(),
            pending: Set::new(),
            requested: HashMap::new(),
            fetching: Set::new(),
            request_id: 0,
            rng,
            repolling: false,
        }
    }

    /// Attaches a benchlist; benched validators are skipped at send time
    /// and counted as null votes.
    pub fn with_benchlist(mut self, benchlist: Arc<QueryBenchlist>) -> Self {
        self.benchlist = Some(benchlist);
        self
    }

    /// The consensus instance's current preference.
    pub fn preference(&self) -> Vec<Id> {
        self.consensus.preference()
    }

    /// The number of tasks blocked on missing decisions.
    pub fn num_blocked(&self) -> usize {
        self.blocker.len()
    }

    /// The number of outstanding polls.
    pub fn num_polls(&self) -> usize {
        self.polls.len()
    }

    /// Returns true when the engine has nothing left to do.
    pub fn quiesce(&self) -> bool {
        self.consensus.quiesce() && self.polls.is_empty()
    }

    /// The VM has pending work: ask it for a decision and issue it.
    pub fn notify_pending(&mut self) -> Result<()> {
        if let Some(decision) = self.source.build() {
            trace!(chain = %self.chain_id, id = %decision.id(), "issuing built decision");
            self.issue(decision)?;
        }
        Ok(())
    }

    /// Issues a locally known decision, fetching missing ancestry.
    pub fn issue(&mut self, decision: Arc<dyn Decision>) -> Result<()> {
        self.issue_from(decision)
    }

    /// Gossip tick: re-broadcast the last accepted decision.
    pub fn gossip(&mut self) -> Result<()> {
        let last = self.source.last_accepted();
        if let Some(decision) = self.source.get(&last) {
            trace!(chain = %self.chain_id, id = %last, "gossiping accepted container");
            self.sender.gossip(last, decision.bytes());
        }
        Ok(())
    }

    /// A peer delivered a container, solicited or not.
    pub fn put(&mut self, node: NodeId, request_id: u32, bytes: &[u8]) -> Result<()> {
        if let Some(expected) = self.requested.remove(&request_id) {
            self.fetching.remove(&expected);
            match self.source.parse(bytes) {
                Ok(decision) if decision.id() == expected => {
                    return self.issue_from(decision);
                }
                Ok(decision) => {
                    warn!(chain = %self.chain_id, %node, wanted = %expected,
                        got = %decision.id(), "byzantine put response");
                    return self.abandon(expected);
                }
                Err(err) => {
                    debug!(chain = %self.chain_id, %node, %err, "dropping unparsable put");
                    return self.abandon(expected);
                }
            }
        }

        // Unsolicited container (gossip): issue it if it parses.
        match self.source.parse(bytes) {
            Ok(decision) => self.issue_from(decision),
            Err(err) => {
                debug!(chain = %self.chain_id, %node, %err, "dropping unsolicited container");
                Ok(())
            }
        }
    }

    /// A peer asked for a container we may have.
    pub fn get(&mut self, node: NodeId, request_id: u32, id: Id) -> Result<()> {
        if let Some(decision) = self.source.get(&id) {
            if decision.status().fetched() {
                self.sender.put(node, request_id, id, decision.bytes());
            }
        }
        Ok(())
    }

    /// Our `Get` went unanswered.
    pub fn get_failed(&mut self, node: NodeId, request_id: u32) -> Result<()> {
        let Some(id) = self.requested.remove(&request_id) else {
            return Ok(());
        };
        debug!(chain = %self.chain_id, %node, %id, "get failed, abandoning");
        self.fetching.remove(&id);
        self.abandon(id)
    }

    /// A peer pushed a container and wants our vote. We answer with the
    /// current preference immediately, whether or not the push parses.
    pub fn push_query(&mut self, node: NodeId, request_id: u32, bytes: &[u8]) -> Result<()> {
        match self.source.parse(bytes) {
            Ok(decision) => self.issue_from(decision)?,
            Err(err) => {
                debug!(chain = %self.chain_id, %node, %err, "dropping unparsable push query")
            }
        }
        let preference = self.consensus.preference();
        self.sender.chits(node, request_id, preference);
        Ok(())
    }

    /// A peer wants our vote on a container by id.
    pub fn pull_query(&mut self, node: NodeId, request_id: u32, id: Id) -> Result<()> {
        let known = self
            .source
            .get(&id)
            .is_some_and(|d| d.status().fetched());
        if known {
            let preference = self.consensus.preference();
            self.sender.chits(node, request_id, preference);
            return Ok(());
        }

        // Unknown container: fetch it and answer once it arrives.
        self.fetch(id, Some(node))?;
        let task = Task::Convince(Convincer {
            node,
            request_id,
            deps: Set::of([id]),
        });
        if let Some(task) = self.blocker.register(task) {
            self.run_task(task)?;
        }
        Ok(())
    }

    /// A peer answered a query with its preference set.
    pub fn chits(&mut self, node: NodeId, request_id: u32, votes: Vec<Id>) -> Result<()> {
        if let Some(benchlist) = &self.benchlist {
            benchlist.register_response(node, request_id);
        }

        // Park the vote on any id we have not issued yet.
        let mut deps = Set::new();
        for vote in &votes {
            let decided = self
                .source
                .get(vote)
                .is_some_and(|d| d.status().decided());
            if self.consensus.issued(vote) || decided {
                continue;
            }
            match self.source.get(vote) {
                Some(decision) => {
                    self.issue_from(decision)?;
                    if !self.consensus.issued(vote) {
                        deps.add(*vote);
                    }
                }
                None => {
                    self.fetch(*vote, Some(node))?;
                    deps.add(*vote);
                }
            }
        }

        let task = Task::Vote(Voter {
            node,
            request_id,
            response: votes,
            deps,
        });
        if let Some(task) = self.blocker.register(task) {
            self.run_task(task)?;
        }
        Ok(())
    }

    /// A query to `node` timed out: count a null vote.
    pub fn query_failed(&mut self, node: NodeId, request_id: u32) -> Result<()> {
        if let Some(benchlist) = &self.benchlist {
            benchlist.query_failed(node, request_id);
        }
        let finished = self.polls.drop_vote(request_id, &node);
        self.process_finished(finished)
    }

    fn run_task(&mut self, task: Task) -> Result<()> {
        match task {
            Task::Issue(issuer) => self.deliver(issuer.decision),
            Task::Vote(voter) => self.finish_vote(voter),
            Task::Convince(convincer) => {
                let preference = self.consensus.preference();
                self.sender
                    .chits(convincer.node, convincer.request_id, preference);
                Ok(())
            }
        }
    }

    /// Registers an issuer for `decision`, recursively issuing known
    /// ancestry and fetching the unknown parts.
    fn issue_from(&mut self, decision: Arc<dyn Decision>) -> Result<()> {
        let id = decision.id();
        if self.consensus.issued(&id) || self.pending.contains(&id) {
            return Ok(());
        }
        if decision.status().decided() {
            return Ok(());
        }
        self.pending.add(id);

        let mut deps = Set::new();
        for parent in decision.parents() {
            let decided = self
                .source
                .get(&parent)
                .is_some_and(|d| d.status().decided());
            if self.consensus.issued(&parent) || decided {
                continue;
            }
            match self.source.get(&parent) {
                Some(parent_decision) => {
                    self.issue_from(parent_decision)?;
                    if !self.consensus.issued(&parent) {
                        deps.add(parent);
                    }
                }
                None => {
                    self.fetch(parent, None)?;
                    deps.add(parent);
                }
            }
        }

        let task = Task::Issue(Issuer { decision, deps });
        if let Some(task) = self.blocker.register(task) {
            self.run_task(task)?;
        }
        Ok(())
    }

    /// Adds a verified decision to consensus and queries the network.
    fn deliver(&mut self, decision: Arc<dyn Decision>) -> Result<()> {
        let id = decision.id();
        self.pending.remove(&id);
        if self.consensus.issued(&id) {
            return Ok(());
        }

        match decision.verify() {
            Ok(()) => {}
            Err(VerifyError::Permanent(reason)) => {
                warn!(chain = %self.chain_id, %id, %reason, "permanent verification failure");
                return self.abandon(id);
            }
            Err(VerifyError::Temporary(reason)) => {
                debug!(chain = %self.chain_id, %id, %reason, "temporary verification failure");
                return self.abandon(id);
            }
        }

        self.consensus.add(decision.clone())?;
        self.events.issue(self.chain_id, id, &decision.bytes());
        debug!(chain = %self.chain_id, %id, "issued decision");

        self.notify_blocker(id, Outcome::Fulfilled)?;
        self.query(id, decision.bytes())
    }

    fn abandon(&mut self, id: Id) -> Result<()> {
        self.pending.remove(&id);
        self.notify_blocker(id, Outcome::Abandoned)
    }

    fn notify_blocker(&mut self, id: Id, outcome: Outcome) -> Result<()> {
        let (ready, abandoned) = self.blocker.notify(id, outcome);
        for id in abandoned {
            self.pending.remove(&id);
        }
        for task in ready {
            self.run_task(task)?;
        }
        Ok(())
    }

    /// Requests a container from `peer`, or from a sampled validator.
    fn fetch(&mut self, id: Id, peer: Option<NodeId>) -> Result<()> {
        if self.fetching.contains(&id) {
            return Ok(());
        }
        let sampled = match peer {
            Some(node) => Some(node),
            None => match self.validators.sample(&mut self.rng, 1) {
                Ok(sample) => sample.into_iter().next(),
                Err(err) => {
                    warn!(chain = %self.chain_id, %err, "cannot sample a peer to fetch from");
                    None
                }
            },
        };
        let Some(node) = sampled else {
            return Ok(());
        };
        self.request_id += 1;
        self.fetching.add(id);
        self.requested.insert(self.request_id, id);
        trace!(chain = %self.chain_id, %node, %id, request_id = self.request_id, "fetching");
        self.sender.get(node, self.request_id, id);
        Ok(())
    }

    /// Starts a push query for a freshly issued decision.
    fn query(&mut self, id: Id, bytes: Vec<u8>) -> Result<()> {
        let Some((request_id, active, benched)) = self.start_poll() else {
            return Ok(());
        };
        if !active.is_empty() {
            self.sender.push_query(active, request_id, id, bytes);
        }
        self.drop_benched(request_id, benched)
    }

    /// Keeps pull queries in flight for the preferred frontier while
    /// consensus cannot quiesce.
    fn repoll(&mut self) -> Result<()> {
        if self.repolling {
            return Ok(());
        }
        self.repolling = true;
        let result = self.repoll_inner();
        self.repolling = false;
        result
    }

    fn repoll_inner(&mut self) -> Result<()> {
        for _ in self.polls.len()..self.params.concurrent_repolls {
            let Some(&target) = self.consensus.preference().first() else {
                break;
            };
            let Some((request_id, active, benched)) = self.start_poll() else {
                break;
            };
            if !active.is_empty() {
                self.sender.pull_query(active, request_id, target);
            }
            self.drop_benched(request_id, benched)?;
        }
        Ok(())
    }

    /// Samples K validators and registers the poll. Benched validators are
    /// kept in the poll (their weight matters) but reported separately so
    /// the caller can record their null votes.
    fn start_poll(&mut self) -> Option<(u32, Vec<NodeId>, Vec<NodeId>)> {
        let sample = match self.validators.sample(&mut self.rng, self.params.k) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(chain = %self.chain_id, %err, "cannot sample validators for poll");
                return None;
            }
        };
        self.request_id += 1;
        let request_id = self.request_id;

        let validators = Bag::of(sample.iter().copied());
        if !self.polls.add(request_id, &validators) {
            return None;
        }

        let mut active = Vec::new();
        let mut benched = Vec::new();
        for node in sample {
            let allowed = self
                .benchlist
                .as_ref()
                .map_or(true, |b| b.register_query(node, request_id));
            if allowed {
                active.push(node);
            } else {
                benched.push(node);
            }
        }
        Some((request_id, active, benched))
    }

    fn drop_benched(&mut self, request_id: u32, benched: Vec<NodeId>) -> Result<()> {
        for node in benched {
            trace!(chain = %self.chain_id, %node, request_id, "null vote for benched validator");
            let finished = self.polls.drop_vote(request_id, &node);
            self.process_finished(finished)?;
        }
        Ok(())
    }

    /// A voter's dependencies are met: record its response.
    fn finish_vote(&mut self, voter: Voter) -> Result<()> {
        let finished = self
            .polls
            .vote(voter.request_id, &voter.node, &voter.response);
        self.process_finished(finished)
    }

    fn process_finished(&mut self, finished: Vec<(u32, UniqueBag<Id>)>) -> Result<()> {
        for (request_id, votes) in finished {
            let bubbled = self.bubble(votes);
            debug!(chain = %self.chain_id, request_id, "finishing poll");
            self.consensus.record_poll(bubbled)?;

            if let Some(&preferred) = self.consensus.preference().first() {
                self.source.set_preference(preferred);
            }

            // Transactions stranded by rejected containers get a fresh
            // container.
            let orphans = self.consensus.orphans();
            if !orphans.is_empty() {
                debug!(chain = %self.chain_id, orphans = orphans.len(), "re-issuing orphans");
                if let Some(decision) = self.source.reissue(&orphans) {
                    self.issue_from(decision)?;
                }
            }

            if self.consensus.quiesce() {
                trace!(chain = %self.chain_id, "engine can quiesce");
            } else {
                self.repoll()?;
            }
        }
        Ok(())
    }

    /// Moves votes aimed at unknown or un-issued decisions up to the
    /// nearest issued, undecided ancestors. Votes that reach an unknown or
    /// decided decision are dropped.
    fn bubble(&mut self, votes: UniqueBag<Id>) -> UniqueBag<Id> {
        let mut out = UniqueBag::new();
        let mut queue: VecDeque<(Id, std::collections::HashSet<u32>)> =
            votes.iter().map(|(id, set)| (*id, set.clone())).collect();

        while let Some((id, set)) = queue.pop_front() {
            let Some(decision) = self.source.get(&id) else {
                trace!(chain = %self.chain_id, %id, "dropping votes for unknown decision");
                continue;
            };
            if decision.status().decided() {
                continue;
            }
            if self.consensus.issued(&id) {
                out.union_set(id, &set);
                continue;
            }
            trace!(chain = %self.chain_id, %id, "bubbling votes to parents");
            for parent in decision.parents() {
                queue.push_back((parent, set.clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchlist::BenchlistConfig;
    use crate::choices::Status;
    use crate::snowman::Snowman;
    use crate::testing::{id_of, node_of, CountingSender, Sent, TestDecision, TestSource};
    use crate::validators::Validator;
    use rand::SeedableRng;
    use serac_utils::timer::Clock;

    struct Harness {
        engine: Transitive,
        sender: Arc<CountingSender>,
        source: Arc<TestSource>,
    }

    fn harness(k: usize, alpha: usize, bv: usize, br: usize) -> Harness {
        let params = Parameters::new(k, alpha, bv, br);
        let chain = id_of(0xaa);
        let events = Arc::new(EventDispatcher::new());
        let consensus =
            Snowman::new(params.clone(), chain, events.clone(), id_of(0)).unwrap();
        let source = TestSource::new();
        let genesis = TestDecision::new(0, vec![Id::ZERO], 0);
        *genesis.status.lock() = Status::Accepted;
        source.register(genesis);
        source.set_last_accepted(id_of(0));

        let sender = CountingSender::new();
        let validators = Arc::new(ValidatorSet::new());
        for i in 0..k {
            validators
                .add(Validator::new(node_of(i as u8), 100))
                .unwrap();
        }

        let engine = Transitive::new(
            params,
            chain,
            Box::new(consensus),
            source.clone(),
            sender.clone(),
            validators,
            events,
            StdRng::seed_from_u64(5),
        );
        Harness {
            engine,
            sender,
            source,
        }
    }

    fn last_query(sender: &CountingSender) -> (Vec<NodeId>, u32) {
        sender
            .snapshot()
            .iter()
            .rev()
            .find_map(|sent| match sent {
                Sent::PushQuery {
                    nodes, request_id, ..
                }
                | Sent::PullQuery {
                    nodes, request_id, ..
                } => Some((nodes.clone(), *request_id)),
                _ => None,
            })
            .expect("no query sent")
    }

    #[test]
    fn issue_sends_push_query() {
        let mut h = harness(3, 2, 1, 2);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());
        h.engine.issue(blk).unwrap();

        let (nodes, _) = last_query(&h.sender);
        assert_eq!(nodes.len(), 3);
        assert_eq!(h.engine.num_polls(), 1);
    }

    #[test]
    fn multi_query_finality_accepts_ancestry() {
        // Two validators chit for the tip, one for its grandparent; the
        // whole chain finalizes and nothing stays blocked.
        let mut h = harness(3, 2, 1, 2);
        let a = TestDecision::new(1, vec![id_of(0)], 1);
        let b = TestDecision::new(2, vec![id_of(1)], 2);
        let c = TestDecision::new(3, vec![id_of(2)], 3);
        for blk in [&a, &b, &c] {
            h.source.register(blk.clone());
        }
        h.engine.issue(a.clone()).unwrap();
        h.engine.issue(b.clone()).unwrap();
        h.engine.issue(c.clone()).unwrap();

        // Answer the first poll (for block a).
        h.engine.chits(node_of(0), 1, vec![id_of(3)]).unwrap();
        h.engine.chits(node_of(1), 1, vec![id_of(3)]).unwrap();
        h.engine.chits(node_of(2), 1, vec![id_of(1)]).unwrap();

        assert_eq!(a.status(), Status::Accepted);
        assert_eq!(b.status(), Status::Accepted);
        assert_eq!(c.status(), Status::Accepted);
        assert_eq!(h.engine.num_blocked(), 0);
        assert_eq!(h.source.preference(), id_of(3));
    }

    #[test]
    fn vote_cancellation_repolls_without_deciding() {
        let mut h = harness(3, 2, 1, 2);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());
        h.engine.issue(blk.clone()).unwrap();

        h.engine.query_failed(node_of(0), 1).unwrap();
        h.engine.chits(node_of(1), 1, vec![id_of(1)]).unwrap();
        // One failure and one chit: the poll must still be open.
        assert_eq!(blk.status(), Status::Processing);
        assert_eq!(h.engine.num_polls(), 1);

        h.engine.query_failed(node_of(2), 1).unwrap();
        // Poll resolved without a quorum; the block is undecided and a
        // repoll goes out.
        assert_eq!(blk.status(), Status::Processing);
        assert!(h
            .sender
            .snapshot()
            .iter()
            .any(|s| matches!(s, Sent::PullQuery { .. })));
    }

    #[test]
    fn double_chit_is_ignored() {
        let mut h = harness(2, 2, 1, 2);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());
        h.engine.issue(blk.clone()).unwrap();

        h.engine.chits(node_of(0), 1, vec![id_of(1)]).unwrap();
        h.engine.chits(node_of(0), 1, vec![id_of(1)]).unwrap();
        assert_eq!(blk.status(), Status::Processing);

        h.engine.chits(node_of(1), 1, vec![id_of(1)]).unwrap();
        assert_eq!(blk.status(), Status::Accepted);
    }

    #[test]
    fn chits_for_unknown_block_fetch_and_park() {
        let mut h = harness(2, 2, 1, 2);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());
        h.engine.issue(blk).unwrap();

        // A vote names a block we have never seen.
        h.engine.chits(node_of(0), 1, vec![id_of(9)]).unwrap();
        assert_eq!(h.engine.num_blocked(), 1);
        let get_request = h
            .sender
            .snapshot()
            .iter()
            .find_map(|s| match s {
                Sent::Get { id, request_id, .. } => Some((*id, *request_id)),
                _ => None,
            })
            .expect("no fetch sent");
        assert_eq!(get_request.0, id_of(9));

        // The fetch fails: the vote unblocks and bubbles to nothing.
        h.engine.get_failed(node_of(0), get_request.1).unwrap();
        assert_eq!(h.engine.num_blocked(), 0);
    }

    #[test]
    fn put_issues_missing_ancestry() {
        let mut h = harness(2, 2, 1, 2);
        let parent = TestDecision::new(1, vec![id_of(0)], 1);
        let child = TestDecision::new(2, vec![id_of(1)], 2);
        h.source.register(child.clone());
        h.engine.issue(child.clone()).unwrap();

        // The child blocks on its unknown parent, which gets fetched.
        assert_eq!(h.engine.num_blocked(), 1);
        let request_id = h
            .sender
            .snapshot()
            .iter()
            .find_map(|s| match s {
                Sent::Get { request_id, id, .. } if *id == id_of(1) => Some(*request_id),
                _ => None,
            })
            .expect("parent not fetched");

        h.source.register(parent.clone());
        h.engine
            .put(node_of(0), request_id, &parent.bytes())
            .unwrap();

        // Both are now issued and queried.
        assert_eq!(h.engine.num_blocked(), 0);
        assert_eq!(h.engine.num_polls(), 2);
    }

    #[test]
    fn byzantine_put_abandons_dependents() {
        let mut h = harness(2, 2, 1, 2);
        let child = TestDecision::new(2, vec![id_of(1)], 2);
        h.source.register(child.clone());
        h.engine.issue(child.clone()).unwrap();
        let request_id = 1;

        // The peer answers the fetch with an unrelated container.
        let junk = TestDecision::new(7, vec![id_of(0)], 1);
        h.source.register(junk);
        h.engine.put(node_of(0), request_id, &[7]).unwrap();

        // The issuer chain is abandoned.
        assert_eq!(h.engine.num_blocked(), 0);
        assert_eq!(child.status(), Status::Processing);
        assert!(!h.engine.consensus.issued(&id_of(2)));
    }

    #[test]
    fn push_query_answers_with_preference() {
        let mut h = harness(2, 2, 1, 2);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());

        h.engine.push_query(node_of(0), 42, &blk.bytes()).unwrap();

        let chits = h
            .sender
            .snapshot()
            .iter()
            .find_map(|s| match s {
                Sent::Chits {
                    node,
                    request_id,
                    votes,
                } => Some((*node, *request_id, votes.clone())),
                _ => None,
            })
            .expect("no chits sent");
        assert_eq!(chits.0, node_of(0));
        assert_eq!(chits.1, 42);
        assert_eq!(chits.2, vec![id_of(1)]);
    }

    #[test]
    fn push_query_with_junk_still_answers() {
        let mut h = harness(2, 2, 1, 2);
        h.engine.push_query(node_of(0), 42, &[99]).unwrap();
        assert!(h
            .sender
            .snapshot()
            .iter()
            .any(|s| matches!(s, Sent::Chits { request_id: 42, .. })));
    }

    #[test]
    fn pull_query_for_unknown_container_parks_convincer() {
        let mut h = harness(2, 2, 1, 2);
        h.engine.pull_query(node_of(0), 42, id_of(5)).unwrap();
        assert_eq!(h.engine.num_blocked(), 1);
        assert!(h
            .sender
            .snapshot()
            .iter()
            .any(|s| matches!(s, Sent::Get { id, .. } if *id == id_of(5))));

        // Container arrives: the parked convincer answers.
        let blk = TestDecision::new(5, vec![id_of(0)], 1);
        h.source.register(blk.clone());
        let get_request = 1;
        h.engine.put(node_of(1), get_request, &blk.bytes()).unwrap();
        assert!(h
            .sender
            .snapshot()
            .iter()
            .any(|s| matches!(s, Sent::Chits { request_id: 42, .. })));
    }

    #[test]
    fn benched_validator_resolves_via_null_vote() {
        let k = 2;
        let mut h = harness(k, 2, 1, 2);
        let validators = Arc::new(ValidatorSet::new());
        for i in 0..k {
            validators
                .add(Validator::new(node_of(i as u8), 100))
                .unwrap();
        }
        let clock = Clock::default();
        clock.set(chrono::Utc::now());
        let benchlist = Arc::new(QueryBenchlist::new(
            validators,
            BenchlistConfig {
                threshold: 3,
                minimum_failing_duration: std::time::Duration::ZERO,
                ..Default::default()
            },
            clock,
            StdRng::seed_from_u64(3),
        ));
        // Bench node 0 with three failed queries.
        for i in 0..3 {
            assert!(benchlist.register_query(node_of(0), 100 + i));
            benchlist.query_failed(node_of(0), 100 + i);
        }
        assert!(benchlist.is_benched(&node_of(0)));

        h.engine = h.engine.with_benchlist(benchlist);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());
        h.engine.issue(blk.clone()).unwrap();

        // The push query went only to the healthy validator.
        let (nodes, request_id) = last_query(&h.sender);
        assert_eq!(nodes, vec![node_of(1)]);

        // Its chit plus the benched null vote resolves the poll; alpha is
        // unreachable so nothing decides and a repoll goes out.
        h.engine
            .chits(node_of(1), request_id, vec![id_of(1)])
            .unwrap();
        assert_eq!(blk.status(), Status::Processing);
    }

    #[test]
    fn idempotent_put_has_no_extra_effect() {
        let mut h = harness(2, 2, 1, 2);
        let blk = TestDecision::new(1, vec![id_of(0)], 1);
        h.source.register(blk.clone());

        h.engine.put(node_of(0), 0, &blk.bytes()).unwrap();
        let polls_after_first = h.engine.num_polls();
        h.engine.put(node_of(0), 0, &blk.bytes()).unwrap();

        assert_eq!(h.engine.num_polls(), polls_after_first);
    }
}
