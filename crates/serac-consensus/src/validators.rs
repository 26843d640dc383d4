//! Validator set management and K-sampling.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::rngs::StdRng;

use serac_ids::NodeId;
use serac_utils::Set;

use crate::error::{ConsensusError, Result};
use crate::sampler::{BestWeighted, WeightedSampler};

/// A validator and its stake weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// Node identity.
    pub node_id: NodeId,
    /// Stake weight.
    pub weight: u64,
}

impl Validator {
    /// Creates a validator.
    #[must_use]
    pub fn new(node_id: NodeId, weight: u64) -> Self {
        Self { node_id, weight }
    }
}

struct Inner {
    weights: HashMap<NodeId, u64>,
    /// Stable ordering for the sampler's index space.
    order: Vec<NodeId>,
    total_weight: u64,
    sampler: BestWeighted,
    sampler_stale: bool,
}

/// A mutable, shared set of validators with stake-weighted sampling.
///
/// The sampler is re-benchmarked lazily whenever membership or weights
/// changed since the last sample.
pub struct ValidatorSet {
    inner: Mutex<Inner>,
}

impl Default for ValidatorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatorSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                weights: HashMap::new(),
                order: Vec::new(),
                total_weight: 0,
                sampler: BestWeighted::new(20),
                sampler_stale: true,
            }),
        }
    }

    /// Adds a validator. Fails if it is already present.
    pub fn add(&self, validator: Validator) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.weights.contains_key(&validator.node_id) {
            return Err(ConsensusError::Internal(format!(
                "validator {} already registered",
                validator.node_id
            )));
        }
        inner.total_weight += validator.weight;
        inner.order.push(validator.node_id);
        inner.weights.insert(validator.node_id, validator.weight);
        inner.sampler_stale = true;
        Ok(())
    }

    /// Removes a validator if present.
    pub fn remove(&self, node_id: &NodeId) {
        let mut inner = self.inner.lock();
        if let Some(weight) = inner.weights.remove(node_id) {
            inner.total_weight -= weight;
            inner.order.retain(|n| n != node_id);
            inner.sampler_stale = true;
        }
    }

    /// Returns true if the validator is in the set.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner.lock().weights.contains_key(node_id)
    }

    /// The validator's weight, zero if absent.
    #[must_use]
    pub fn weight(&self, node_id: &NodeId) -> u64 {
        self.inner.lock().weights.get(node_id).copied().unwrap_or(0)
    }

    /// Total stake weight.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.inner.lock().total_weight
    }

    /// Combined weight of the given subset.
    #[must_use]
    pub fn subset_weight(&self, subset: &Set<NodeId>) -> u64 {
        let inner = self.inner.lock();
        subset
            .iter()
            .map(|node| inner.weights.get(node).copied().unwrap_or(0))
            .sum()
    }

    /// The number of validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().weights.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().weights.is_empty()
    }

    /// Every validator's node id.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.lock().order.clone()
    }

    /// Draws `count` distinct validators, stake-weighted, without
    /// replacement.
    ///
    /// Fails if fewer than `count` validators have positive weight.
    pub fn sample(&self, rng: &mut StdRng, count: usize) -> Result<Vec<NodeId>> {
        let mut inner = self.inner.lock();
        let positive = inner.weights.values().filter(|w| **w > 0).count();
        if positive < count {
            return Err(ConsensusError::InsufficientValidators {
                needed: count,
                have: positive,
            });
        }

        if inner.sampler_stale {
            let weights: Vec<u64> = inner
                .order
                .iter()
                .map(|node| inner.weights[node])
                .collect();
            inner.sampler.initialize(&weights);
            inner.sampler_stale = false;
        }

        let indices = inner
            .sampler
            .sample(rng, count)
            .map_err(|e| ConsensusError::Internal(e.to_string()))?;
        Ok(indices.into_iter().map(|i| inner.order[i]).collect())
    }
}
