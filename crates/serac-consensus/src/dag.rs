//! Vertex DAG consensus.
//!
//! Vertices carry transactions; voting happens on vertices but confidence
//! lives in the transaction conflict graph. A vote for a vertex endorses
//! the vertex and its whole ancestry, so poll results are closed over
//! parents (highest first) before being translated into transaction votes.
//!
//! A vertex finalizes from its content: accepted when every parent is
//! accepted and every carried transaction is accepted, rejected as soon as
//! any of them is rejected. Undecided transactions stranded in a rejected
//! vertex become orphans and are handed back to the engine for re-issuing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use serac_ids::Id;
use serac_utils::{Set, UniqueBag};

use crate::choices::Decision;
use crate::consensus::Consensus;
use crate::error::{ConsensusError, Result};
use crate::events::EventDispatcher;
use crate::params::Parameters;
use crate::snowstorm::ConflictGraph;
use crate::tx::Tx;

struct VertexEntry {
    vtx: Arc<dyn Decision>,
    parents: Vec<Id>,
    height: u64,
    txs: Vec<Arc<dyn Tx>>,
}

/// DAG consensus instance.
pub struct DagConsensus {
    params: Parameters,
    chain_id: Id,
    events: Arc<EventDispatcher>,
    graph: ConflictGraph,
    vertices: HashMap<Id, VertexEntry>,
    /// parent id -> processing children.
    children: HashMap<Id, Vec<Id>>,
    /// Every vertex id ever issued.
    history: Set<Id>,
    accepted: Set<Id>,
    rejected: Set<Id>,
    /// Accepted vertices with no accepted children; the fallback chit.
    accepted_frontier: Set<Id>,
    orphans: Set<Id>,
}

impl DagConsensus {
    /// Creates an instance whose accepted frontier starts at `frontier`.
    pub fn new(
        params: Parameters,
        chain_id: Id,
        events: Arc<EventDispatcher>,
        frontier: Vec<Id>,
    ) -> Result<Self> {
        params
            .validate()
            .map_err(ConsensusError::InvalidParameters)?;
        let graph = ConflictGraph::new(params.clone())?;
        let mut history = Set::new();
        let mut accepted_frontier = Set::new();
        for id in frontier {
            history.add(id);
            accepted_frontier.add(id);
        }
        Ok(Self {
            params,
            chain_id,
            events,
            graph,
            vertices: HashMap::new(),
            children: HashMap::new(),
            history,
            accepted: Set::new(),
            rejected: Set::new(),
            accepted_frontier,
            orphans: Set::new(),
        })
    }

    /// The number of processing vertices.
    #[must_use]
    pub fn num_processing(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the vertex is still being decided.
    #[must_use]
    pub fn processing(&self, id: &Id) -> bool {
        self.vertices.contains_key(id)
    }

    /// Access to the transaction conflict graph.
    #[must_use]
    pub fn conflict_graph(&self) -> &ConflictGraph {
        &self.graph
    }

    fn parent_rejected(&self, parents: &[Id]) -> bool {
        parents.iter().any(|p| self.rejected.contains(p))
    }

    fn parent_accepted(&self, parent: &Id) -> bool {
        !self.vertices.contains_key(parent) && !self.rejected.contains(parent)
    }

    fn tx_decided_accepted(&self, tx: &dyn Tx) -> bool {
        let id = tx.id();
        !self.graph.processing(&id) && !self.graph.is_rejected(&id)
    }

    /// A vertex is preferred when every transaction it carries is the
    /// preferred consumer of its inputs.
    fn vertex_preferred(&self, entry: &VertexEntry) -> bool {
        entry.txs.iter().all(|tx| {
            let id = tx.id();
            if self.graph.processing(&id) {
                self.graph.is_preferred(&id)
            } else {
                self.graph.is_accepted(&id) || self.tx_decided_accepted(tx.as_ref())
            }
        })
    }

    fn accept_vertex(&mut self, id: Id) -> Result<()> {
        let entry = self
            .vertices
            .remove(&id)
            .ok_or_else(|| ConsensusError::UnknownDecision(id.to_string()))?;
        entry.vtx.accept()?;
        info!(chain = %self.chain_id, vertex = %id, "accepted vertex");
        self.events.accept(self.chain_id, id, &entry.vtx.bytes());
        self.accepted.add(id);
        for parent in &entry.parents {
            self.accepted_frontier.remove(parent);
        }
        self.accepted_frontier.add(id);
        Ok(())
    }

    fn reject_vertex(&mut self, id: Id) -> Result<()> {
        let entry = self
            .vertices
            .remove(&id)
            .ok_or_else(|| ConsensusError::UnknownDecision(id.to_string()))?;
        entry.vtx.reject()?;
        debug!(chain = %self.chain_id, vertex = %id, "rejected vertex");
        self.events.reject(self.chain_id, id, &entry.vtx.bytes());
        self.rejected.add(id);

        // Undecided payload is stranded unless another processing vertex
        // still carries it.
        for tx in &entry.txs {
            let txid = tx.id();
            if !self.graph.processing(&txid) {
                continue;
            }
            let carried_elsewhere = self
                .vertices
                .values()
                .any(|other| other.txs.iter().any(|t| t.id() == txid));
            if !carried_elsewhere {
                debug!(tx = %txid, "transaction orphaned");
                self.orphans.add(txid);
            }
        }
        Ok(())
    }

    /// Accepts and rejects vertices until nothing changes.
    fn update_vertices(&mut self) -> Result<()> {
        loop {
            // Rejections first: any rejected parent or transaction dooms
            // the vertex.
            let doomed: Vec<Id> = self
                .vertices
                .iter()
                .filter(|(_, entry)| {
                    self.parent_rejected(&entry.parents)
                        || entry.txs.iter().any(|tx| self.graph.is_rejected(&tx.id()))
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &doomed {
                self.reject_vertex(*id)?;
            }

            // Acceptances in height order so events stay topological.
            let mut ready: Vec<(u64, Id)> = self
                .vertices
                .iter()
                .filter(|(_, entry)| {
                    entry.parents.iter().all(|p| self.parent_accepted(p))
                        && entry
                            .txs
                            .iter()
                            .all(|tx| self.tx_decided_accepted(tx.as_ref()))
                })
                .map(|(id, entry)| (entry.height, *id))
                .collect();
            ready.sort_unstable();
            for (_, id) in &ready {
                self.accept_vertex(*id)?;
            }

            if doomed.is_empty() && ready.is_empty() {
                return Ok(());
            }
        }
    }
}

impl Consensus for DagConsensus {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn add(&mut self, vtx: Arc<dyn Decision>) -> Result<()> {
        let id = vtx.id();
        if self.history.contains(&id) {
            return Err(ConsensusError::DuplicateDecision(id.to_string()));
        }
        let parents = vtx.parents();
        if parents.is_empty() {
            return Err(ConsensusError::MissingParent(id.to_string()));
        }
        self.history.add(id);

        if self.parent_rejected(&parents) {
            debug!(chain = %self.chain_id, vertex = %id,
                "rejecting vertex with rejected ancestor");
            vtx.reject()?;
            self.events.reject(self.chain_id, id, &vtx.bytes());
            self.rejected.add(id);
            return Ok(());
        }

        let txs = vtx.txs();
        for tx in &txs {
            self.graph.add(tx.clone())?;
            self.orphans.remove(&tx.id());
        }
        for parent in &parents {
            if self.vertices.contains_key(parent) {
                self.children.entry(*parent).or_default().push(id);
            }
        }
        self.vertices.insert(
            id,
            VertexEntry {
                height: vtx.height(),
                parents,
                txs,
                vtx,
            },
        );
        // Everything it carries may already be decided.
        self.update_vertices()
    }

    fn issued(&self, id: &Id) -> bool {
        self.history.contains(id)
    }

    fn preference(&self) -> Vec<Id> {
        // Preferred frontier: preferred vertices without a preferred child.
        let mut preferred: HashSet<Id> = HashSet::new();
        for (id, entry) in &self.vertices {
            if self.vertex_preferred(entry) {
                preferred.insert(*id);
            }
        }
        let mut frontier: Vec<Id> = preferred
            .iter()
            .filter(|id| {
                self.children
                    .get(id)
                    .map_or(true, |kids| !kids.iter().any(|k| preferred.contains(k)))
            })
            .copied()
            .collect();
        if frontier.is_empty() {
            frontier = self.accepted_frontier.list();
        }
        frontier.sort_unstable();
        frontier
    }

    fn record_poll(&mut self, votes: UniqueBag<Id>) -> Result<()> {
        // Close votes over ancestry: a vote for a vertex endorses every
        // ancestor. Children are strictly higher than parents, so pushing
        // sets down the height order visits each edge once.
        let mut sets: HashMap<Id, HashSet<u32>> = HashMap::new();
        for (id, slots) in votes.iter() {
            if self.vertices.contains_key(id) {
                sets.entry(*id).or_default().extend(slots);
            }
        }

        let mut order: Vec<(u64, Id)> = sets
            .keys()
            .filter_map(|id| self.vertices.get(id).map(|e| (e.height, *id)))
            .collect();
        order.sort_unstable_by(|a, b| b.cmp(a));
        let mut index = 0;
        while index < order.len() {
            let (_, id) = order[index];
            index += 1;
            let Some(entry) = self.vertices.get(&id) else {
                continue;
            };
            let set = sets.get(&id).cloned().unwrap_or_default();
            for parent in entry.parents.clone() {
                if let Some(parent_entry) = self.vertices.get(&parent) {
                    let parent_set = sets.entry(parent).or_default();
                    let grew = {
                        let before = parent_set.len();
                        parent_set.extend(set.iter().copied());
                        parent_set.len() > before
                    };
                    if grew && !order.iter().any(|(_, v)| *v == parent) {
                        order.push((parent_entry.height, parent));
                        order.sort_unstable_by(|a, b| b.cmp(a));
                    }
                }
            }
        }

        // Translate vertex endorsements into transaction endorsements.
        let mut tx_votes: UniqueBag<Id> = UniqueBag::new();
        for (vid, set) in &sets {
            if let Some(entry) = self.vertices.get(vid) {
                for tx in &entry.txs {
                    let txid = tx.id();
                    if self.graph.processing(&txid) {
                        tx_votes.union_set(txid, set);
                    }
                }
            }
        }

        self.graph.record_poll(&tx_votes.as_bag())?;
        self.update_vertices()
    }

    fn orphans(&self) -> Vec<Id> {
        let mut list = self.orphans.list();
        list.sort_unstable();
        list
    }

    fn finalized(&self) -> bool {
        self.vertices.is_empty()
    }

    fn quiesce(&self) -> bool {
        !self.graph.has_rogue()
    }
}
