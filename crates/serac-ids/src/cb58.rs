//! CB58 encoding: Base58 with a 4-byte SHA-256 checksum suffix.

use thiserror::Error;

use crate::hashing::checksum;

const CHECKSUM_LEN: usize = 4;

/// Errors produced while decoding a CB58 string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Cb58Error {
    /// The string is not valid Base58.
    #[error("base58 decoding failed: {0}")]
    Base58(String),

    /// The decoded payload is shorter than the checksum.
    #[error("input shorter than the checksum")]
    MissingChecksum,

    /// The embedded checksum does not match the payload.
    #[error("invalid checksum")]
    BadChecksum,
}

/// Encodes `bytes` as a CB58 string.
#[must_use]
pub fn cb58_encode(bytes: &[u8]) -> String {
    let mut checked = Vec::with_capacity(bytes.len() + CHECKSUM_LEN);
    checked.extend_from_slice(bytes);
    checked.extend_from_slice(&checksum(bytes, CHECKSUM_LEN));
    bs58::encode(checked).into_string()
}

/// Decodes a CB58 string, verifying its checksum.
pub fn cb58_decode(s: &str) -> Result<Vec<u8>, Cb58Error> {
    let checked = bs58::decode(s)
        .into_vec()
        .map_err(|e| Cb58Error::Base58(e.to_string()))?;
    if checked.len() < CHECKSUM_LEN {
        return Err(Cb58Error::MissingChecksum);
    }

    let split = checked.len() - CHECKSUM_LEN;
    let (payload, check) = checked.split_at(split);
    if checksum(payload, CHECKSUM_LEN) != check {
        return Err(Cb58Error::BadChecksum);
    }
    Ok(payload.to_vec())
}
