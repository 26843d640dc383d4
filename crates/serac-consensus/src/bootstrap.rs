//! Bootstrap engine.
//!
//! Before consensus starts, the node fetches and accepts the historical
//! chain or DAG from its beacons:
//!
//! 1. sample beacons and collect their accepted frontiers
//! 2. keep the frontier ids vouched for by at least `alpha_weight` stake
//! 3. fetch unknown ancestry with `GetAncestors`, parsing each returned
//!    container into a queue job keyed on its missing parents
//! 4. drain the job queue, accepting decisions in topological order
//!
//! Fetch failures retry against a different beacon, indefinitely; a
//! response whose first container is not the requested one is Byzantine
//! and re-requested elsewhere. Extra containers are accepted provisionally
//! but never trigger their own fetches.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use serac_db::Database;
use serac_ids::{Id, NodeId};
use serac_utils::Set;

use crate::benchlist::QueryBenchlist;
use crate::choices::{Decision, Status};
use crate::error::{ConsensusError, Result};
use crate::events::EventDispatcher;
use crate::message::MAX_CONTAINERS_PER_MULTIPUT;
use crate::queue::{Job, JobParser, JobQueue};
use crate::sender::Sender;
use crate::validators::ValidatorSet;
use crate::vm::DecisionSource;

/// Bootstrap tuning.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Beacons polled for the frontier.
    pub sample_size: usize,
    /// Stake weight required to accept a frontier id.
    pub alpha_weight: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            alpha_weight: 1,
        }
    }
}

/// Bootstrap state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Idle,
    FetchingFrontier,
    FilteringAccepted,
    FetchingAncestors,
    Executing,
    Done,
}

/// A queue job that accepts one decision.
struct DecisionJob {
    decision: Arc<dyn Decision>,
    source: Arc<dyn DecisionSource>,
    events: Arc<EventDispatcher>,
    chain_id: Id,
}

impl Job for DecisionJob {
    fn id(&self) -> Id {
        self.decision.id()
    }

    fn missing_dependencies(&self) -> Result<Vec<Id>> {
        let mut missing = Vec::new();
        for parent in self.decision.parents() {
            if parent.is_zero() {
                continue;
            }
            let accepted = self
                .source
                .get(&parent)
                .is_some_and(|d| d.status() == Status::Accepted);
            if !accepted {
                missing.push(parent);
            }
        }
        Ok(missing)
    }

    fn execute(&self) -> Result<()> {
        match self.decision.status() {
            Status::Accepted => Ok(()),
            Status::Processing => {
                let deps = self.missing_dependencies()?;
                if !deps.is_empty() {
                    return Err(ConsensusError::UnmetDependencies(
                        self.decision.id().to_string(),
                    ));
                }
                self.decision
                    .verify()
                    .map_err(|e| ConsensusError::Queue(e.to_string()))?;
                self.decision.accept()?;
                self.events
                    .accept(self.chain_id, self.decision.id(), &self.decision.bytes());
                Ok(())
            }
            status => Err(ConsensusError::Queue(format!(
                "cannot execute decision with status {status}"
            ))),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        self.decision.bytes()
    }
}

struct DecisionJobParser {
    source: Arc<dyn DecisionSource>,
    events: Arc<EventDispatcher>,
    chain_id: Id,
}

impl JobParser for DecisionJobParser {
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn Job>> {
        let decision = self
            .source
            .parse(bytes)
            .map_err(|e| ConsensusError::Queue(e.to_string()))?;
        Ok(Box::new(DecisionJob {
            decision,
            source: self.source.clone(),
            events: self.events.clone(),
            chain_id: self.chain_id,
        }))
    }
}

/// The bootstrap engine for one chain.
pub struct Bootstrapper {
    chain_id: Id,
    config: BootstrapConfig,
    beacons: Arc<ValidatorSet>,
    source: Arc<dyn DecisionSource>,
    sender: Arc<dyn Sender>,
    events: Arc<EventDispatcher>,
    benchlist: Option<Arc<QueryBenchlist>>,
    jobs: JobQueue,
    rng: StdRng,
    phase: BootstrapPhase,
    request_id: u32,

    frontier_round: u32,
    pending_frontier: Set<NodeId>,
    frontier: Set<Id>,

    accepted_round: u32,
    pending_accepted: Set<NodeId>,
    accepted_weight: HashMap<Id, u64>,

    /// rid -> (beacon, requested id) for outstanding GetAncestors.
    outstanding: HashMap<u32, (NodeId, Id)>,
    fetch_failures: HashMap<Id, u32>,
}

impl Bootstrapper {
    /// Creates a bootstrapper persisting its queue in `db`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BootstrapConfig,
        chain_id: Id,
        db: Arc<dyn Database>,
        source: Arc<dyn DecisionSource>,
        sender: Arc<dyn Sender>,
        beacons: Arc<ValidatorSet>,
        events: Arc<EventDispatcher>,
        rng: StdRng,
    ) -> Result<Self> {
        let parser = Arc::new(DecisionJobParser {
            source: source.clone(),
            events: events.clone(),
            chain_id,
        });
        let jobs = JobQueue::new(db, parser)?;
        Ok(Self {
            chain_id,
            config,
            beacons,
            source,
            sender,
            events,
            benchlist: None,
            jobs,
            rng,
            phase: BootstrapPhase::Idle,
            request_id: 0,
            frontier_round: 0,
            pending_frontier: Set::new(),
            frontier: Set::new(),
            accepted_round: 0,
            pending_accepted: Set::new(),
            accepted_weight: HashMap::new(),
            outstanding: HashMap::new(),
            fetch_failures: HashMap::new(),
        })
    }

    /// Attaches a benchlist so repeated fetch failures count against the
    /// failing beacon.
    pub fn with_benchlist(mut self, benchlist: Arc<QueryBenchlist>) -> Self {
        self.benchlist = Some(benchlist);
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    /// Returns true once the historical graph is accepted.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == BootstrapPhase::Done
    }

    /// The number of outstanding ancestor fetches.
    #[must_use]
    pub fn num_outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Starts bootstrapping by polling beacons for their frontiers.
    pub fn start(&mut self) -> Result<()> {
        self.phase = BootstrapPhase::FetchingFrontier;
        self.frontier.clear();
        self.pending_frontier.clear();

        let beacons = self.sample_beacons();
        if beacons.is_empty() {
            // Nothing to sync from; our own frontier is the world.
            info!(chain = %self.chain_id, "no beacons, bootstrap complete");
            self.phase = BootstrapPhase::Done;
            return Ok(());
        }

        self.request_id += 1;
        self.frontier_round = self.request_id;
        for beacon in &beacons {
            self.pending_frontier.add(*beacon);
        }
        debug!(chain = %self.chain_id, beacons = beacons.len(), "requesting accepted frontier");
        self.sender
            .get_accepted_frontier(beacons, self.frontier_round);
        Ok(())
    }

    fn sample_beacons(&mut self) -> Vec<NodeId> {
        let count = self.config.sample_size.min(self.beacons.len());
        if count == 0 {
            return Vec::new();
        }
        self.beacons
            .sample(&mut self.rng, count)
            .unwrap_or_else(|_| self.beacons.node_ids())
    }

    /// A beacon reported its accepted frontier.
    pub fn accepted_frontier(&mut self, node: NodeId, request_id: u32, ids: Vec<Id>) -> Result<()> {
        if self.phase != BootstrapPhase::FetchingFrontier || request_id != self.frontier_round {
            return Ok(());
        }
        if !self.pending_frontier.remove(&node) {
            return Ok(());
        }
        self.frontier.add_all(ids);
        if self.pending_frontier.is_empty() {
            self.filter_accepted()?;
        }
        Ok(())
    }

    /// A frontier request timed out.
    pub fn get_accepted_frontier_failed(&mut self, node: NodeId, request_id: u32) -> Result<()> {
        self.accepted_frontier(node, request_id, Vec::new())
    }

    fn filter_accepted(&mut self) -> Result<()> {
        self.phase = BootstrapPhase::FilteringAccepted;
        self.accepted_weight.clear();
        self.pending_accepted.clear();

        let beacons = self.sample_beacons();
        self.request_id += 1;
        self.accepted_round = self.request_id;
        for beacon in &beacons {
            self.pending_accepted.add(*beacon);
        }
        debug!(chain = %self.chain_id, frontier = self.frontier.len(), "filtering accepted frontier");
        self.sender
            .get_accepted(beacons, self.accepted_round, self.frontier.list());
        Ok(())
    }

    /// A beacon reported which frontier ids it accepted.
    pub fn accepted(&mut self, node: NodeId, request_id: u32, ids: Vec<Id>) -> Result<()> {
        if self.phase != BootstrapPhase::FilteringAccepted || request_id != self.accepted_round {
            return Ok(());
        }
        if !self.pending_accepted.remove(&node) {
            return Ok(());
        }
        let weight = self.beacons.weight(&node);
        for id in ids {
            *self.accepted_weight.entry(id).or_insert(0) += weight;
        }

        if self.pending_accepted.is_empty() {
            let accepted: Vec<Id> = self
                .accepted_weight
                .iter()
                .filter(|(_, w)| **w >= self.config.alpha_weight)
                .map(|(id, _)| *id)
                .collect();
            if accepted.is_empty() {
                warn!(chain = %self.chain_id, "no frontier id reached quorum, retrying");
                return self.start();
            }
            return self.force_accepted(accepted);
        }
        Ok(())
    }

    /// An accepted filter request timed out.
    pub fn get_accepted_failed(&mut self, node: NodeId, request_id: u32) -> Result<()> {
        self.accepted(node, request_id, Vec::new())
    }

    /// Seeds the fetch phase with a known-accepted frontier.
    pub fn force_accepted(&mut self, accepted: Vec<Id>) -> Result<()> {
        self.phase = BootstrapPhase::FetchingAncestors;
        info!(chain = %self.chain_id, targets = accepted.len(), "fetching accepted ancestry");
        for id in accepted {
            match self.source.get(&id) {
                Some(decision) if decision.status() == Status::Accepted => {}
                Some(decision) => self.enqueue(decision)?,
                None => self.fetch(id)?,
            }
        }
        self.maybe_execute()
    }

    /// Pushes a job and fetches the unresolved frontier of its dependency
    /// closure. Dependencies already queued are walked, not re-fetched.
    fn enqueue(&mut self, decision: Arc<dyn Decision>) -> Result<()> {
        let id = decision.id();
        self.push_job(decision)?;

        let mut visited = Set::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for dep in self.jobs.missing_of(&current) {
                if !visited.add(dep) {
                    continue;
                }
                if self.jobs.has_job(&dep)? {
                    stack.push(dep);
                    continue;
                }
                match self.source.get(&dep) {
                    Some(d) if d.status() == Status::Accepted => {}
                    Some(d) => {
                        self.push_job(d)?;
                        stack.push(dep);
                    }
                    None => self.fetch(dep)?,
                }
            }
        }
        Ok(())
    }

    fn push_job(&mut self, decision: Arc<dyn Decision>) -> Result<bool> {
        let job = Box::new(DecisionJob {
            decision,
            source: self.source.clone(),
            events: self.events.clone(),
            chain_id: self.chain_id,
        });
        self.jobs.push(job)
    }

    /// Requests the ancestry of `id` from a random beacon.
    fn fetch(&mut self, id: Id) -> Result<()> {
        self.fetch_excluding(id, None)
    }

    fn fetch_excluding(&mut self, id: Id, exclude: Option<NodeId>) -> Result<()> {
        if self.jobs.has_job(&id)? {
            return Ok(());
        }
        if self.outstanding.values().any(|(_, wanted)| *wanted == id) {
            return Ok(());
        }

        let mut beacons = self.beacons.node_ids();
        if let Some(exclude) = exclude {
            if beacons.len() > 1 {
                beacons.retain(|b| *b != exclude);
            }
        }
        if beacons.is_empty() {
            warn!(chain = %self.chain_id, %id, "no beacon available to fetch from");
            return Ok(());
        }
        let node = beacons[self.rng.gen_range(0..beacons.len())];

        self.request_id += 1;
        self.outstanding.insert(self.request_id, (node, id));
        if let Some(benchlist) = &self.benchlist {
            benchlist.register_query(node, self.request_id);
        }
        debug!(chain = %self.chain_id, %node, %id, request_id = self.request_id,
            "requesting ancestors");
        self.sender.get_ancestors(node, self.request_id, id);
        Ok(())
    }

    /// A beacon delivered containers in reverse topological order.
    pub fn multi_put(
        &mut self,
        node: NodeId,
        request_id: u32,
        containers: Vec<Vec<u8>>,
    ) -> Result<()> {
        if self.phase != BootstrapPhase::FetchingAncestors {
            return Ok(());
        }
        let Some((expected_node, wanted)) = self.outstanding.remove(&request_id) else {
            debug!(chain = %self.chain_id, request_id, "multiput for unknown request");
            return Ok(());
        };
        if expected_node != node {
            self.outstanding.insert(request_id, (expected_node, wanted));
            return Ok(());
        }

        if containers.is_empty() || containers.len() > MAX_CONTAINERS_PER_MULTIPUT {
            return self.fetch_failed(node, request_id, wanted);
        }

        // The first container must be the one we asked for; anything else
        // is a Byzantine response.
        let first = match self.source.parse(&containers[0]) {
            Ok(decision) if decision.id() == wanted => decision,
            Ok(decision) => {
                warn!(chain = %self.chain_id, %node, %wanted, got = %decision.id(),
                    "byzantine multiput response");
                return self.fetch_failed(node, request_id, wanted);
            }
            Err(err) => {
                warn!(chain = %self.chain_id, %node, %wanted, %err, "unparsable multiput head");
                return self.fetch_failed(node, request_id, wanted);
            }
        };

        if let Some(benchlist) = &self.benchlist {
            benchlist.register_response(node, request_id);
        }

        // Trailing containers are likely ancestors: keep what parses, but
        // never fetch on their behalf.
        for extra in &containers[1..] {
            match self.source.parse(extra) {
                Ok(decision) => {
                    if decision.status() != Status::Accepted {
                        self.push_job(decision)?;
                    }
                }
                Err(err) => {
                    debug!(chain = %self.chain_id, %node, %err, "dropping junk container");
                }
            }
        }

        self.enqueue(first)?;
        self.maybe_execute()
    }

    /// A `GetAncestors` went unanswered.
    pub fn get_ancestors_failed(&mut self, node: NodeId, request_id: u32) -> Result<()> {
        let Some((_, wanted)) = self.outstanding.remove(&request_id) else {
            return Ok(());
        };
        self.fetch_failed(node, request_id, wanted)
    }

    fn fetch_failed(&mut self, node: NodeId, request_id: u32, wanted: Id) -> Result<()> {
        if let Some(benchlist) = &self.benchlist {
            benchlist.query_failed(node, request_id);
        }
        let failures = self.fetch_failures.entry(wanted).or_insert(0);
        *failures += 1;
        debug!(chain = %self.chain_id, %node, id = %wanted, failures = *failures,
            "ancestor fetch failed, retrying elsewhere");
        self.fetch_excluding(wanted, Some(node))?;
        self.maybe_execute()
    }

    fn maybe_execute(&mut self) -> Result<()> {
        if self.phase != BootstrapPhase::FetchingAncestors || !self.outstanding.is_empty() {
            return Ok(());
        }
        self.phase = BootstrapPhase::Executing;
        let executed = self.jobs.execute_all()?;
        if self.jobs.num_blocked() > 0 {
            debug!(chain = %self.chain_id, blocked = self.jobs.num_blocked(),
                "leaving unresolved provisional containers behind");
        }
        info!(chain = %self.chain_id, executed, "bootstrap executed history");
        self.phase = BootstrapPhase::Done;
        Ok(())
    }

    // Responder side: peers bootstrap from us.

    /// Answers a frontier request with our last accepted decision.
    pub fn get_accepted_frontier(&mut self, node: NodeId, request_id: u32) -> Result<()> {
        let frontier = vec![self.source.last_accepted()];
        self.sender.accepted_frontier(node, request_id, frontier);
        Ok(())
    }

    /// Answers an accepted filter with the subset we accepted.
    pub fn get_accepted(&mut self, node: NodeId, request_id: u32, ids: Vec<Id>) -> Result<()> {
        let accepted: Vec<Id> = ids
            .into_iter()
            .filter(|id| {
                self.source
                    .get(id)
                    .is_some_and(|d| d.status() == Status::Accepted)
            })
            .collect();
        self.sender.accepted(node, request_id, accepted);
        Ok(())
    }

    /// Answers a `GetAncestors` with up to the MultiPut cap of containers
    /// in reverse topological order.
    pub fn get_ancestors(&mut self, node: NodeId, request_id: u32, id: Id) -> Result<()> {
        let Some(root) = self.source.get(&id) else {
            return Ok(());
        };
        if !root.status().fetched() {
            return Ok(());
        }

        let mut containers = Vec::new();
        let mut visited = Set::new();
        let mut queue = std::collections::VecDeque::new();
        visited.add(id);
        queue.push_back(root);
        while let Some(decision) = queue.pop_front() {
            if containers.len() >= MAX_CONTAINERS_PER_MULTIPUT {
                break;
            }
            containers.push(decision.bytes());
            for parent in decision.parents() {
                if parent.is_zero() || !visited.add(parent) {
                    continue;
                }
                if let Some(parent_decision) = self.source.get(&parent) {
                    if parent_decision.status().fetched() {
                        queue.push_back(parent_decision);
                    }
                }
            }
        }
        self.sender.multi_put(node, request_id, containers);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id_of, node_of, CountingSender, Sent, TestDecision, TestSource};
    use crate::validators::Validator;
    use rand::SeedableRng;
    use serac_db::MemDb;

    struct Harness {
        boot: Bootstrapper,
        sender: Arc<CountingSender>,
        source: Arc<TestSource>,
    }

    fn harness(beacon_count: usize, alpha_weight: u64) -> Harness {
        let sender = CountingSender::new();
        let source = TestSource::new();
        let beacons = Arc::new(ValidatorSet::new());
        for i in 0..beacon_count {
            beacons
                .add(Validator::new(node_of(i as u8), 100))
                .unwrap();
        }
        let boot = Bootstrapper::new(
            BootstrapConfig {
                sample_size: beacon_count,
                alpha_weight,
            },
            id_of(0xbb),
            Arc::new(MemDb::new()),
            source.clone(),
            sender.clone(),
            beacons,
            Arc::new(EventDispatcher::new()),
            StdRng::seed_from_u64(21),
        )
        .unwrap();
        Harness {
            boot,
            sender,
            source,
        }
    }

    fn get_ancestors_requests(sender: &CountingSender) -> Vec<(NodeId, u32, Id)> {
        sender
            .snapshot()
            .iter()
            .filter_map(|s| match s {
                Sent::GetAncestors {
                    node,
                    request_id,
                    id,
                } => Some((*node, *request_id, *id)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn local_frontier_executes_without_fetching() {
        // Three known vertices with no ancestry: one drain accepts all,
        // and no GetAncestors goes out.
        let mut h = harness(2, 1);
        let v0 = TestDecision::new(1, vec![], 0);
        let v1 = TestDecision::new(2, vec![], 0);
        let v2 = TestDecision::new(3, vec![], 0);
        for v in [&v0, &v1, &v2] {
            h.source.register(v.clone());
        }

        h.boot
            .force_accepted(vec![id_of(1), id_of(2), id_of(3)])
            .unwrap();

        assert_eq!(v0.status(), Status::Accepted);
        assert_eq!(v1.status(), Status::Accepted);
        assert_eq!(v2.status(), Status::Accepted);
        assert!(h.boot.is_done());
        assert!(get_ancestors_requests(&h.sender).is_empty());
    }

    #[test]
    fn byzantine_multiput_is_refetched_elsewhere() {
        let mut h = harness(3, 1);
        // V1 is known but its parent V0 is not.
        let v1 = TestDecision::new(1, vec![id_of(10)], 1);
        h.source.register(v1.clone());

        h.boot.force_accepted(vec![id_of(1)]).unwrap();

        let requests = get_ancestors_requests(&h.sender);
        assert_eq!(requests.len(), 1);
        let (first_node, first_rid, wanted) = requests[0];
        assert_eq!(wanted, id_of(10));

        // The peer answers with an unrelated container.
        let v2 = TestDecision::new(2, vec![id_of(20)], 1);
        h.source.register(v2.clone());
        h.boot
            .multi_put(first_node, first_rid, vec![v2.bytes()])
            .unwrap();

        // A fresh request with a new id goes to a different peer.
        let requests = get_ancestors_requests(&h.sender);
        assert_eq!(requests.len(), 2);
        let (second_node, second_rid, rewanted) = requests[1];
        assert_eq!(rewanted, id_of(10));
        assert_ne!(second_rid, first_rid);
        assert_ne!(second_node, first_node);

        // The second answer is honest and carries the same junk ancestor.
        let v0 = TestDecision::new(10, vec![], 0);
        h.source.register(v0.clone());
        h.boot
            .multi_put(second_node, second_rid, vec![v0.bytes(), v2.bytes()])
            .unwrap();

        assert_eq!(v0.status(), Status::Accepted);
        assert_eq!(v1.status(), Status::Accepted);
        // The junk container was kept provisionally but never accepted and
        // never fetched for.
        assert_eq!(v2.status(), Status::Processing);
        assert!(h.boot.is_done());
        assert_eq!(get_ancestors_requests(&h.sender).len(), 2);
    }

    #[test]
    fn frontier_flow_reaches_quorum() {
        let mut h = harness(2, 150);
        let target = TestDecision::new(5, vec![], 0);
        h.source.register(target.clone());

        h.boot.start().unwrap();
        assert_eq!(h.boot.phase(), BootstrapPhase::FetchingFrontier);
        let frontier_round = 1;

        h.boot
            .accepted_frontier(node_of(0), frontier_round, vec![id_of(5)])
            .unwrap();
        h.boot
            .accepted_frontier(node_of(1), frontier_round, vec![id_of(5)])
            .unwrap();
        assert_eq!(h.boot.phase(), BootstrapPhase::FilteringAccepted);

        // Both beacons (100 weight each) vouch: 200 >= 150.
        let accepted_round = 2;
        h.boot
            .accepted(node_of(0), accepted_round, vec![id_of(5)])
            .unwrap();
        h.boot
            .accepted(node_of(1), accepted_round, vec![id_of(5)])
            .unwrap();

        assert!(h.boot.is_done());
        assert_eq!(target.status(), Status::Accepted);
    }

    #[test]
    fn insufficient_weight_restarts_frontier_phase() {
        let mut h = harness(2, 500);
        h.boot.start().unwrap();
        h.boot
            .accepted_frontier(node_of(0), 1, vec![id_of(5)])
            .unwrap();
        h.boot
            .get_accepted_frontier_failed(node_of(1), 1)
            .unwrap();

        h.boot.accepted(node_of(0), 2, vec![id_of(5)]).unwrap();
        h.boot.accepted(node_of(1), 2, vec![id_of(5)]).unwrap();

        // 200 < 500: the bootstrapper went back to the frontier phase.
        assert_eq!(h.boot.phase(), BootstrapPhase::FetchingFrontier);
        let frontier_requests = h
            .sender
            .snapshot()
            .iter()
            .filter(|s| matches!(s, Sent::GetAcceptedFrontier { .. }))
            .count();
        assert_eq!(frontier_requests, 2);
    }

    #[test]
    fn failed_fetch_retries_another_beacon() {
        let mut h = harness(3, 1);
        h.boot.force_accepted(vec![id_of(9)]).unwrap();

        let requests = get_ancestors_requests(&h.sender);
        assert_eq!(requests.len(), 1);
        let (node, rid, _) = requests[0];

        h.boot.get_ancestors_failed(node, rid).unwrap();
        let requests = get_ancestors_requests(&h.sender);
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[1].0, node);
        assert_eq!(requests[1].2, id_of(9));
        assert!(!h.boot.is_done());
    }

    #[test]
    fn answers_frontier_and_accepted_queries() {
        let mut h = harness(1, 1);
        let accepted = TestDecision::new(4, vec![], 0);
        accepted.accept().unwrap();
        h.source.register(accepted);
        h.source.set_last_accepted(id_of(4));

        h.boot.get_accepted_frontier(node_of(7), 11).unwrap();
        h.boot
            .get_accepted(node_of(7), 12, vec![id_of(4), id_of(9)])
            .unwrap();

        let sent = h.sender.snapshot();
        assert!(sent.contains(&Sent::AcceptedFrontier {
            node: node_of(7),
            request_id: 11,
            ids: vec![id_of(4)],
        }));
        assert!(sent.contains(&Sent::Accepted {
            node: node_of(7),
            request_id: 12,
            ids: vec![id_of(4)],
        }));
    }

    #[test]
    fn serves_ancestors_in_reverse_topological_order() {
        let mut h = harness(1, 1);
        let v0 = TestDecision::new(1, vec![], 0);
        let v1 = TestDecision::new(2, vec![id_of(1)], 1);
        let v2 = TestDecision::new(3, vec![id_of(2)], 2);
        for v in [&v0, &v1, &v2] {
            h.source.register(v.clone());
        }

        h.boot.get_ancestors(node_of(7), 13, id_of(3)).unwrap();

        let sent = h.sender.snapshot();
        let containers = sent
            .iter()
            .find_map(|s| match s {
                Sent::MultiPut { containers, .. } => Some(containers.clone()),
                _ => None,
            })
            .expect("no multiput sent");
        assert_eq!(containers, vec![vec![3], vec![2], vec![1]]);
    }
}
