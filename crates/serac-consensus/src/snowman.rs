//! Linear-chain consensus over a block tree.
//!
//! The tree is rooted at the last accepted block. Each processing block
//! carries a [`UnarySnowball`] counter; a vote for a block endorses every
//! ancestor, so poll results are unioned down each subtree before the
//! counters are updated. When a child of the root finalizes, it becomes the
//! new root and its sibling subtrees are rejected depth-first.

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
use crate::snowball::UnarySnowball;

struct BlockNode {
    block: Arc<dyn Decision>,
    parent: Id,
    sb: UnarySnowball,
}

/// Snowman consensus instance.
pub struct Snowman {
    params: Parameters,
    chain_id: Id,
    events: Arc<EventDispatcher>,
    /// The last accepted block; root of the processing tree.
    root: Id,
    /// Processing blocks by id.
    nodes: HashMap<Id, BlockNode>,
    /// Children edges, keyed by parent id. Includes the root's children.
    children: HashMap<Id, Vec<Id>>,
    /// Every id ever issued into this instance.
    history: Set<Id>,
}

impl Snowman {
    /// Creates an instance rooted at `last_accepted`.
    pub fn new(
        params: Parameters,
        chain_id: Id,
        events: Arc<EventDispatcher>,
        last_accepted: Id,
    ) -> Result<Self> {
        params
            .validate()
            .map_err(ConsensusError::InvalidParameters)?;
        let mut history = Set::new();
        history.add(last_accepted);
        Ok(Self {
            params,
            chain_id,
            events,
            root: last_accepted,
            nodes: HashMap::new(),
            children: HashMap::new(),
            history,
        })
    }

    /// The last accepted block id.
    #[must_use]
    pub fn last_accepted(&self) -> Id {
        self.root
    }

    /// The number of processing blocks.
    #[must_use]
    pub fn num_processing(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the block is still being decided.
    #[must_use]
    pub fn processing(&self, id: &Id) -> bool {
        self.nodes.contains_key(id)
    }

    /// Walks the preferred chain from the root and returns its tip.
    #[must_use]
    pub fn preferred_tip(&self) -> Id {
        let mut current = self.root;
        while let Some(next) = self.preferred_child(&current) {
            current = next;
        }
        current
    }

    fn preferred_child(&self, parent: &Id) -> Option<Id> {
        let kids = self.children.get(parent)?;
        let mut best: Option<(&Id, &UnarySnowball)> = None;
        for kid in kids {
            let Some(node) = self.nodes.get(kid) else {
                continue;
            };
            best = match best {
                None => Some((kid, &node.sb)),
                Some((best_id, best_sb)) => {
                    if Self::beats(&node.sb, kid, best_sb, best_id) {
                        Some((kid, &node.sb))
                    } else {
                        Some((best_id, best_sb))
                    }
                }
            };
        }
        best.map(|(id, _)| *id)
    }

    /// Sibling ordering: confidence, then successful polls, then lowest id.
    fn beats(a: &UnarySnowball, a_id: &Id, b: &UnarySnowball, b_id: &Id) -> bool {
        (a.confidence(), a.num_successful_polls(), std::cmp::Reverse(a_id))
            > (b.confidence(), b.num_successful_polls(), std::cmp::Reverse(b_id))
    }

    /// Unions voter sets down every subtree under `id`, recording the
    /// transitive set for each processing block.
    fn gather_votes(
        &self,
        id: Id,
        votes: &UniqueBag<Id>,
        out: &mut HashMap<Id, HashSet<u32>>,
    ) -> HashSet<u32> {
        let mut set = votes.get_set(&id).cloned().unwrap_or_default();
        if let Some(kids) = self.children.get(&id) {
            for kid in kids.clone() {
                if self.nodes.contains_key(&kid) {
                    let kid_set = self.gather_votes(kid, votes, out);
                    set.extend(kid_set);
                }
            }
        }
        out.insert(id, set.clone());
        set
    }

    fn accept_block(&mut self, id: Id) -> Result<()> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| ConsensusError::UnknownDecision(id.to_string()))?;

        node.block.accept()?;
        info!(chain = %self.chain_id, block = %id, "accepted block");
        self.events.accept(self.chain_id, id, &node.block.bytes());

        let siblings: Vec<Id> = self
            .children
            .remove(&self.root)
            .unwrap_or_default()
            .into_iter()
            .filter(|sib| *sib != id && self.nodes.contains_key(sib))
            .collect();
        for sib in siblings {
            self.reject_subtree(sib)?;
        }
        self.root = id;
        Ok(())
    }

    fn reject_subtree(&mut self, id: Id) -> Result<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            node.block.reject()?;
            debug!(chain = %self.chain_id, block = %current, "rejected block");
            self.events.reject(self.chain_id, current, &node.block.bytes());
            if let Some(kids) = self.children.remove(&current) {
                stack.extend(kids);
            }
        }
        Ok(())
    }

    fn try_finalize(&mut self) -> Result<()> {
        loop {
            let kids: Vec<Id> = self
                .children
                .get(&self.root)
                .map(|kids| {
                    kids.iter()
                        .filter(|kid| self.nodes.contains_key(kid))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            if kids.is_empty() {
                return Ok(());
            }

            let beta = if kids.len() == 1 {
                self.params.beta_virtuous
            } else {
                self.params.beta_rogue
            };
            let Some(preferred) = self.preferred_child(&self.root) else {
                return Ok(());
            };
            let finalized = self
                .nodes
                .get(&preferred)
                .is_some_and(|node| node.sb.finalized(beta));
            if !finalized {
                return Ok(());
            }
            self.accept_block(preferred)?;
        }
    }
}

impl Consensus for Snowman {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn add(&mut self, block: Arc<dyn Decision>) -> Result<()> {
        let id = block.id();
        if self.history.contains(&id) {
            return Err(ConsensusError::DuplicateDecision(id.to_string()));
        }
        let parent = *block
            .parents()
            .first()
            .ok_or_else(|| ConsensusError::MissingParent(id.to_string()))?;

        self.history.add(id);

        if parent != self.root && !self.nodes.contains_key(&parent) {
            // The parent was already decided against (or never issued):
            // this block can never be accepted.
            debug!(chain = %self.chain_id, block = %id, %parent,
                "rejecting block with unavailable parent");
            block.reject()?;
            self.events.reject(self.chain_id, id, &block.bytes());
            return Ok(());
        }

        self.children.entry(parent).or_default().push(id);
        self.nodes.insert(
            id,
            BlockNode {
                block,
                parent,
                sb: UnarySnowball::new(),
            },
        );
        Ok(())
    }

    fn issued(&self, id: &Id) -> bool {
        self.history.contains(id)
    }

    fn preference(&self) -> Vec<Id> {
        vec![self.preferred_tip()]
    }

    fn record_poll(&mut self, votes: UniqueBag<Id>) -> Result<()> {
        let mut transitive = HashMap::new();
        let roots: Vec<Id> = self
            .children
            .get(&self.root)
            .map(|kids| {
                kids.iter()
                    .filter(|kid| self.nodes.contains_key(kid))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        for kid in roots {
            self.gather_votes(kid, &votes, &mut transitive);
        }

        let alpha = self.params.alpha;
        for (id, voters) in &transitive {
            if let Some(node) = self.nodes.get_mut(id) {
                if voters.len() >= alpha {
                    node.sb.record_successful_poll();
                } else {
                    node.sb.record_unsuccessful_poll();
                }
            }
        }
        // Blocks that received no vote set at all also had an unsuccessful
        // poll.
        let untouched: Vec<Id> = self
            .nodes
            .keys()
            .filter(|id| !transitive.contains_key(id))
            .copied()
            .collect();
        for id in untouched {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.sb.record_unsuccessful_poll();
            }
        }

        self.try_finalize()
    }

    fn orphans(&self) -> Vec<Id> {
        Vec::new()
    }

    fn finalized(&self) -> bool {
        self.nodes.is_empty()
    }

    fn quiesce(&self) -> bool {
        self.nodes.is_empty()
    }
}
