//! Transaction capability trait.

use serac_ids::Id;

use crate::choices::Status;
use crate::error::Result;
use crate::vm::VerifyError;

/// A transaction carried by a DAG vertex.
///
/// Transactions are opaque to consensus except for their consumed inputs
/// (conflict detection) and explicit dependencies (acceptance ordering).
/// Two transactions that share any input id conflict; at most one of them
/// can ever be accepted.
pub trait Tx: Send + Sync {
    /// The transaction's unique identifier.
    fn id(&self) -> Id;

    /// Ids of the UTXOs this transaction consumes.
    fn input_ids(&self) -> Vec<Id>;

    /// Ids of transactions that must be accepted before this one.
    fn dependencies(&self) -> Vec<Id> {
        Vec::new()
    }

    /// The byte representation.
    fn bytes(&self) -> Vec<u8>;

    /// Current status.
    fn status(&self) -> Status;

    /// Checks the transaction's internal validity.
    fn verify(&self) -> std::result::Result<(), VerifyError>;

    /// Marks the transaction accepted.
    fn accept(&self) -> Result<()>;

    /// Marks the transaction rejected.
    fn reject(&self) -> Result<()>;
}

/// Returns true if the two transactions consume a common input.
pub fn conflicts(a: &dyn Tx, b: &dyn Tx) -> bool {
    let inputs = a.input_ids();
    b.input_ids().iter().any(|id| inputs.contains(id))
}
