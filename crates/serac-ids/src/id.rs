//! 32-byte identifier type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::cb58::{cb58_decode, cb58_encode, Cb58Error};
use crate::hashing::hash256;
use crate::ID_LEN;

/// A 32-byte identifier.
///
/// Ids name every decision the engine handles: blocks, vertices,
/// transactions, and chains. They are usually the SHA-256 hash of the
/// entity's byte representation.
///
/// # Examples
///
/// ```
/// use serac_ids::Id;
///
/// let id = Id::from_hash(b"container bytes");
/// assert!(!id.is_zero());
///
/// let roundtrip: Id = id.to_string().parse().unwrap();
/// assert_eq!(id, roundtrip);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Id([u8; ID_LEN]);

/// Errors produced while parsing an [`Id`].
#[derive(Debug, Error)]
pub enum IdError {
    /// The CB58 decoding failed.
    #[error("cb58 decoding failed: {0}")]
    Cb58(#[from] Cb58Error),

    /// The decoded bytes have the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

impl Id {
    /// The all-zero id, used as the missing-parent sentinel.
    pub const ZERO: Self = Self([0u8; ID_LEN]);

    /// Creates an id from a 32-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates an id from a slice of exactly 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidLength`] for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        if bytes.len() != ID_LEN {
            return Err(IdError::InvalidLength {
                expected: ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; ID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Creates an id by SHA-256 hashing `bytes`.
    #[must_use]
    pub fn from_hash(bytes: &[u8]) -> Self {
        Self(hash256(bytes))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Returns true if this is the all-zero id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_LEN]
    }

    /// Returns the hex encoding of this id.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", cb58_encode(&self.0))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = cb58_decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Id {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ID_LEN]> for Id {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&cb58_encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Id {
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
