//! Validator node identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::cb58::{cb58_decode, cb58_encode, Cb58Error};
use crate::hashing::{hash160, hash256};
use crate::NODE_ID_LEN;

/// Prefix on the string form of a [`NodeId`].
pub const NODE_ID_PREFIX: &str = "NodeID-";

/// A 20-byte validator identifier, derived from the node's TLS certificate
/// as `RIPEMD160(SHA256(cert_der))`.
///
/// # Examples
///
/// ```
/// use serac_ids::NodeId;
///
/// let id = NodeId::from_bytes([0u8; 20]);
/// assert!(id.to_string().starts_with("NodeID-"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

/// Errors produced while parsing a [`NodeId`].
#[derive(Debug, Error)]
pub enum NodeIdError {
    /// The CB58 decoding failed.
    #[error("cb58 decoding failed: {0}")]
    Cb58(#[from] Cb58Error),

    /// The decoded bytes have the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The string does not start with `NodeID-`.
    #[error("missing NodeID- prefix")]
    MissingPrefix,
}

impl NodeId {
    /// The all-zero node id.
    pub const ZERO: Self = Self([0u8; NODE_ID_LEN]);

    /// Creates a node id from a 20-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a node id from a slice of exactly 20 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`NodeIdError::InvalidLength`] for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, NodeIdError> {
        if bytes.len() != NODE_ID_LEN {
            return Err(NodeIdError::InvalidLength {
                expected: NODE_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; NODE_ID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Derives a node id from DER-encoded certificate bytes.
    #[must_use]
    pub fn from_cert(cert_der: &[u8]) -> Self {
        Self(hash160(&hash256(cert_der)))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Returns true if this is the all-zero node id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; NODE_ID_LEN]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_ID_PREFIX}{}", cb58_encode(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix(NODE_ID_PREFIX)
            .ok_or(NodeIdError::MissingPrefix)?;
        let bytes = cb58_decode(stripped)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
