//! Error types for the consensus crate.

use serac_db::DatabaseError;
use thiserror::Error;

/// Result alias for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors surfaced by the consensus engine and its subsystems.
///
/// Variants other than the recoverable parse/lookup failures are treated as
/// fatal by the router: they terminate the chain's handler task.
#[derive(Debug, Error, Clone)]
pub enum ConsensusError {
    /// Consensus parameters failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A decision referenced an id that consensus does not know.
    #[error("unknown decision: {0}")]
    UnknownDecision(String),

    /// A decision was added twice.
    #[error("decision already added: {0}")]
    DuplicateDecision(String),

    /// A decision arrived without the required parent reference.
    #[error("decision {0} has no parent")]
    MissingParent(String),

    /// A status change violated the Unknown -> Processing -> decided order.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// An accept was attempted while dependencies were still undecided.
    #[error("attempted to accept {0} with unmet dependencies")]
    UnmetDependencies(String),

    /// Not enough validators with positive weight to sample.
    #[error("insufficient validators: need {needed}, have {have}")]
    InsufficientValidators { needed: usize, have: usize },

    /// A persistent-queue operation failed.
    #[error("job queue error: {0}")]
    Queue(String),

    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// An invariant inside consensus was violated.
    #[error("internal error: {0}")]
    Internal(String),
}
