//! Binary packing primitives.
//!
//! Every wire message and disk format in serac is a sequence of big-endian
//! integers, fixed-size byte arrays, and length-prefixed byte strings. This
//! crate provides the [`Packer`] / [`Unpacker`] pair that reads and writes
//! those sequences.

mod packer;

pub use packer::{PackError, Packer, UnpackError, Unpacker};

/// Maximum length of a packed string (u16 length prefix).
pub const MAX_STRING_LEN: usize = u16::MAX as usize;
