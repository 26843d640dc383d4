//! The interface shared by the linear and DAG consensus instances.

use std::sync::Arc;

use serac_ids::Id;
use serac_utils::UniqueBag;

use crate::choices::Decision;
use crate::error::Result;
use crate::params::Parameters;

/// A consensus instance processing a stream of dependent decisions.
///
/// Implementations are single-threaded; the owning engine serializes every
/// call. Votes arrive as a [`UniqueBag`] mapping decision id to the set of
/// voter slots endorsing it, which lets implementations union votes across
/// ancestry without double counting.
pub trait Consensus: Send {
    /// The parameters this instance was initialized with.
    fn parameters(&self) -> &Parameters;

    /// Adds a decision. Every parent must already be issued (or decided).
    fn add(&mut self, decision: Arc<dyn Decision>) -> Result<()>;

    /// Returns true if the id has ever been issued into this instance,
    /// whether still processing or already decided.
    fn issued(&self, id: &Id) -> bool;

    /// The currently preferred frontier: the chain tip for linear mode, the
    /// virtuous frontier for DAG mode. Sorted by id for determinism.
    fn preference(&self) -> Vec<Id>;

    /// Applies the results of one completed poll.
    fn record_poll(&mut self, votes: UniqueBag<Id>) -> Result<()>;

    /// Transactions stranded by a rejected container that are themselves
    /// still undecided and need re-issuing. Always empty in linear mode.
    fn orphans(&self) -> Vec<Id>;

    /// Returns true once nothing is left processing.
    fn finalized(&self) -> bool;

    /// Returns true if it is safe to stop issuing repolls: nothing
    /// processing is rogue.
    fn quiesce(&self) -> bool;
}
