//! Decision status and the decision capability trait.

use std::fmt;
use std::sync::Arc;

use serac_ids::Id;

use crate::error::{ConsensusError, Result};
use crate::tx::Tx;
use crate::vm::VerifyError;

/// Lifecycle status of a decision or transaction.
///
/// Status only ever moves forward: Unknown -> Processing -> Accepted or
/// Rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Referenced but bytes not yet fetched or parsed.
    Unknown,
    /// Known and being decided.
    Processing,
    /// Finalized irrevocably.
    Accepted,
    /// Finalized against, irrevocably.
    Rejected,
}

impl Status {
    /// Returns true once the decision is accepted or rejected.
    #[must_use]
    pub fn decided(&self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }

    /// Returns true if the bytes for this decision are available locally.
    #[must_use]
    pub fn fetched(&self) -> bool {
        !matches!(self, Status::Unknown)
    }

    /// Returns true if moving from `self` to `next` respects monotonicity.
    #[must_use]
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Unknown, Status::Processing)
                | (Status::Processing, Status::Accepted)
                | (Status::Processing, Status::Rejected)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unknown => "Unknown",
            Status::Processing => "Processing",
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
        };
        write!(f, "{s}")
    }
}

/// The capability set consensus requires of anything it decides on.
///
/// Blocks and vertices both implement this; a block has exactly one parent
/// and carries no transactions, a vertex has up to 128 of each. Status
/// mutation is the implementor's responsibility and must be interior
/// (consensus holds shared handles).
pub trait Decision: Send + Sync {
    /// The decision's unique identifier.
    fn id(&self) -> Id;

    /// Parent decision ids. One entry for blocks, possibly many for
    /// vertices.
    fn parents(&self) -> Vec<Id>;

    /// Height above genesis (blocks) or the maximum parent height plus one
    /// (vertices).
    fn height(&self) -> u64;

    /// The byte representation this decision was parsed from.
    fn bytes(&self) -> Vec<u8>;

    /// Current status.
    fn status(&self) -> Status;

    /// Transactions carried by this decision. Empty for linear blocks.
    fn txs(&self) -> Vec<Arc<dyn Tx>> {
        Vec::new()
    }

    /// Checks the decision's internal validity.
    fn verify(&self) -> std::result::Result<(), VerifyError>;

    /// Marks the decision accepted and commits its effects.
    fn accept(&self) -> Result<()>;

    /// Marks the decision rejected.
    fn reject(&self) -> Result<()>;
}

/// Checks and reports an illegal status transition.
pub(crate) fn check_transition(id: Id, from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ConsensusError::InvalidStatusTransition {
            from: format!("{from} ({id})"),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decided_statuses() {
        assert!(!Status::Unknown.decided());
        assert!(!Status::Processing.decided());
        assert!(Status::Accepted.decided());
        assert!(Status::Rejected.decided());
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(Status::Unknown.can_transition_to(Status::Processing));
        assert!(Status::Processing.can_transition_to(Status::Accepted));
        assert!(Status::Processing.can_transition_to(Status::Rejected));

        assert!(!Status::Accepted.can_transition_to(Status::Processing));
        assert!(!Status::Rejected.can_transition_to(Status::Accepted));
        assert!(!Status::Unknown.can_transition_to(Status::Accepted));
    }

    #[test]
    fn fetched_statuses() {
        assert!(!Status::Unknown.fetched());
        assert!(Status::Processing.fetched());
        assert!(Status::Accepted.fetched());
    }
}
