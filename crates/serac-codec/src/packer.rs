//! Big-endian binary packing and unpacking.

use thiserror::Error;

use crate::MAX_STRING_LEN;

/// Errors raised while packing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    /// The string exceeds the u16 length prefix.
    #[error("string too long: {len} bytes exceeds max {max}")]
    StringTooLong { len: usize, max: usize },

    /// Writing would exceed the packer's size limit.
    #[error("packer overflow: need {needed} bytes but max is {max}")]
    Overflow { needed: usize, max: usize },
}

/// Errors raised while unpacking.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// Fewer bytes remain than the requested type needs.
    #[error("insufficient bytes: need {needed} but only {remaining} remaining")]
    InsufficientBytes { needed: usize, remaining: usize },

    /// A boolean byte was neither 0 nor 1.
    #[error("invalid boolean value: {0}")]
    InvalidBool(u8),

    /// A packed string was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Serializes values into a byte buffer. Multi-byte integers are written
/// big-endian.
///
/// The packer is error-latching: after the first failure, further writes are
/// no-ops and the error is reported by [`Packer::take_error`].
///
/// # Examples
///
/// ```
/// use serac_codec::Packer;
///
/// let mut p = Packer::new(64);
/// p.pack_int(42);
/// p.pack_bytes(b"chits");
/// let bytes = p.finish().unwrap();
/// assert_eq!(&bytes[..4], &[0, 0, 0, 42]);
/// ```
#[derive(Debug)]
pub struct Packer {
    bytes: Vec<u8>,
    max_size: usize,
    error: Option<PackError>,
}

impl Packer {
    /// Creates a packer with the given initial capacity and no size limit.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            max_size: usize::MAX,
            error: None,
        }
    }

    /// Creates a packer that refuses to grow beyond `max_size` bytes.
    #[must_use]
    pub fn with_max_size(capacity: usize, max_size: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            max_size,
            error: None,
        }
    }

    /// Returns true if a write has failed.
    #[must_use]
    pub fn errored(&self) -> bool {
        self.error.is_some()
    }

    /// Takes the latched error, if any.
    pub fn take_error(&mut self) -> Option<PackError> {
        self.error.take()
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the packed bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the packer, returning the packed bytes or the latched error.
    pub fn finish(self) -> Result<Vec<u8>, PackError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.bytes),
        }
    }

    fn reserve(&mut self, additional: usize) -> bool {
        if self.error.is_some() {
            return false;
        }
        let needed = self.bytes.len().saturating_add(additional);
        if needed > self.max_size {
            self.error = Some(PackError::Overflow {
                needed,
                max: self.max_size,
            });
            return false;
        }
        true
    }

    /// Writes a single byte.
    pub fn pack_byte(&mut self, val: u8) {
        if self.reserve(1) {
            self.bytes.push(val);
        }
    }

    /// Writes a u16.
    pub fn pack_short(&mut self, val: u16) {
        if self.reserve(2) {
            self.bytes.extend_from_slice(&val.to_be_bytes());
        }
    }

    /// Writes a u32.
    pub fn pack_int(&mut self, val: u32) {
        if self.reserve(4) {
            self.bytes.extend_from_slice(&val.to_be_bytes());
        }
    }

    /// Writes a u64.
    pub fn pack_long(&mut self, val: u64) {
        if self.reserve(8) {
            self.bytes.extend_from_slice(&val.to_be_bytes());
        }
    }

    /// Writes a bool as one byte.
    pub fn pack_bool(&mut self, val: bool) {
        self.pack_byte(u8::from(val));
    }

    /// Writes a string with a u16 length prefix.
    pub fn pack_str(&mut self, val: &str) {
        if val.len() > MAX_STRING_LEN {
            self.error = Some(PackError::StringTooLong {
                len: val.len(),
                max: MAX_STRING_LEN,
            });
            return;
        }
        self.pack_short(val.len() as u16);
        self.pack_fixed_bytes(val.as_bytes());
    }

    /// Writes bytes with no length prefix.
    pub fn pack_fixed_bytes(&mut self, val: &[u8]) {
        if self.reserve(val.len()) {
            self.bytes.extend_from_slice(val);
        }
    }

    /// Writes bytes with a u32 length prefix.
    pub fn pack_bytes(&mut self, val: &[u8]) {
        self.pack_int(val.len() as u32);
        self.pack_fixed_bytes(val);
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Deserializes values from a byte slice. Multi-byte integers are read
/// big-endian.
#[derive(Debug)]
pub struct Unpacker<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Unpacker<'a> {
    /// Creates an unpacker over `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    /// Returns true if every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], UnpackError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(UnpackError::InsufficientBytes { needed, remaining });
        }
        let out = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(out)
    }

    /// Reads a single byte.
    pub fn unpack_byte(&mut self) -> Result<u8, UnpackError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a u16.
    pub fn unpack_short(&mut self) -> Result<u16, UnpackError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a u32.
    pub fn unpack_int(&mut self) -> Result<u32, UnpackError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a u64.
    pub fn unpack_long(&mut self) -> Result<u64, UnpackError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Reads a bool.
    pub fn unpack_bool(&mut self) -> Result<bool, UnpackError> {
        match self.unpack_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(UnpackError::InvalidBool(v)),
        }
    }

    /// Reads a u16-length-prefixed string.
    pub fn unpack_string(&mut self) -> Result<String, UnpackError> {
        let len = self.unpack_short()? as usize;
        let bytes = self.take(len)?.to_vec();
        Ok(String::from_utf8(bytes)?)
    }

    /// Reads exactly `N` bytes.
    pub fn unpack_fixed_bytes<const N: usize>(&mut self) -> Result<[u8; N], UnpackError> {
        let b = self.take(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    /// Reads u32-length-prefixed bytes.
    pub fn unpack_bytes(&mut self) -> Result<Vec<u8>, UnpackError> {
        let len = self.unpack_int()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
