//! Hashing helpers.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of `data`.
#[must_use]
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the RIPEMD-160 hash of `data`.
///
/// Used for deriving 20-byte node identifiers from certificate bytes.
#[must_use]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns the trailing `len` bytes of the SHA-256 hash of `data`.
///
/// # Panics
///
/// Panics if `len > 32`.
#[must_use]
pub(crate) fn checksum(data: &[u8], len: usize) -> Vec<u8> {
    let digest = hash256(data);
    digest[32 - len..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_is_deterministic() {
        assert_eq!(hash256(b"serac"), hash256(b"serac"));
        assert_ne!(hash256(b"serac"), hash256(b"carbon"));
    }

    #[test]
    fn hash160_len() {
        assert_eq!(hash160(b"serac").len(), 20);
    }

    #[test]
    fn checksum_is_suffix() {
        let digest = hash256(b"abc");
        assert_eq!(checksum(b"abc", 4), digest[28..].to_vec());
    }
}
