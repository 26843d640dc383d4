//! Identifier types for the serac consensus engine.
//!
//! Two identifiers flow through the whole system:
//! - [`Id`]: a 32-byte hash naming blocks, vertices, transactions, and chains
//! - [`NodeId`]: a 20-byte hash naming validator nodes
//!
//! Both render as CB58 (Base58 with a 4-byte checksum) in human-readable
//! contexts.

mod cb58;
mod hashing;
mod id;
mod node_id;

pub use cb58::{cb58_decode, cb58_encode, Cb58Error};
pub use hashing::{hash160, hash256};
pub use id::{Id, IdError};
pub use node_id::{NodeId, NodeIdError};

/// Length of an [`Id`] in bytes.
pub const ID_LEN: usize = 32;

/// Length of a [`NodeId`] in bytes.
pub const NODE_ID_LEN: usize = 20;
