//! The boundary between consensus and the virtual machine.
//!
//! The VM parses container bytes into decisions, builds new decisions on
//! demand, and commits state when a decision is accepted. Everything else
//! about it is opaque.

use std::sync::Arc;

use thiserror::Error;

use serac_ids::Id;

use crate::choices::Decision;
use crate::tx::Tx;

/// Verification failure, split into the two tiers of spec'd handling.
///
/// A permanent failure rejects the decision and abandons everything blocked
/// on it. A temporary failure leaves consensus untouched; the operation may
/// be retried.
#[derive(Debug, Error, Clone)]
pub enum VerifyError {
    /// The decision can never become valid.
    #[error("permanent verification failure: {0}")]
    Permanent(String),

    /// The decision could not be verified right now (e.g. missing state).
    #[error("temporary verification failure: {0}")]
    Temporary(String),
}

impl VerifyError {
    /// Returns true for the permanent tier.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, VerifyError::Permanent(_))
    }
}

/// The VM capability the engine and bootstrapper consume.
///
/// Implementations own the container store: `parse` registers bytes and
/// `get` retrieves previously seen decisions. Both engines (linear and DAG)
/// speak this interface; the DAG VM additionally implements [`TxSource`].
pub trait DecisionSource: Send + Sync {
    /// Parses container bytes into a decision, registering it locally.
    ///
    /// Parsing the same bytes twice returns the same decision.
    fn parse(&self, bytes: &[u8]) -> std::result::Result<Arc<dyn Decision>, VerifyError>;

    /// Returns a previously parsed or stored decision.
    fn get(&self, id: &Id) -> Option<Arc<dyn Decision>>;

    /// Builds a new decision extending the current preference, if the VM
    /// has pending work.
    fn build(&self) -> Option<Arc<dyn Decision>>;

    /// Re-wraps orphaned transactions into a fresh decision.
    ///
    /// Linear VMs have no orphans and return `None`.
    fn reissue(&self, _orphans: &[Id]) -> Option<Arc<dyn Decision>> {
        None
    }

    /// Tells the VM which decision consensus currently prefers.
    fn set_preference(&self, id: Id);

    /// The most recently accepted decision.
    fn last_accepted(&self) -> Id;
}

/// Transaction lookup for DAG VMs.
pub trait TxSource: Send + Sync {
    /// Parses transaction bytes.
    fn parse_tx(&self, bytes: &[u8]) -> std::result::Result<Arc<dyn Tx>, VerifyError>;

    /// Returns a previously seen transaction.
    fn get_tx(&self, id: &Id) -> Option<Arc<dyn Tx>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence() {
        assert!(VerifyError::Permanent("bad".into()).is_permanent());
        assert!(!VerifyError::Temporary("later".into()).is_permanent());
    }
}
