//! Key-value database abstraction.
//!
//! The bootstrap job queue persists its tables through these traits. The
//! layering is composable:
//!
//! - [`MemDb`]: in-memory store, the only backend shipped here (real
//!   backends live behind the same traits, outside this repo)
//! - [`PrefixDb`]: namespaces a shared database by key prefix
//! - [`VersionDb`]: buffers writes in memory until `commit`, giving the
//!   queue its crash-safe execute batch
//!
//! # Example
//!
//! ```
//! use serac_db::{KeyValueReader, KeyValueWriter, MemDb};
//!
//! let db = MemDb::new();
//! db.put(b"job", b"bytes").unwrap();
//! assert_eq!(db.get(b"job").unwrap(), Some(b"bytes".to_vec()));
//! ```

mod error;
mod memdb;
mod prefixdb;
mod versiondb;

pub use error::{DatabaseError, Result};
pub use memdb::MemDb;
pub use prefixdb::PrefixDb;
pub use versiondb::VersionDb;

/// Read access to a key-value store.
pub trait KeyValueReader: Send + Sync {
    /// Returns whether `key` exists.
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// Returns the value stored at `key`, or `None`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Write access to a key-value store.
pub trait KeyValueWriter: Send + Sync {
    /// Stores `value` at `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}

/// Delete access to a key-value store.
pub trait KeyValueDeleter: Send + Sync {
    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;
}

/// A batch of writes applied atomically.
pub trait Batch: Send {
    /// Buffers a put.
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Buffers a delete.
    fn delete(&mut self, key: &[u8]);

    /// Returns the number of buffered operations.
    fn len(&self) -> usize;

    /// Returns true if nothing is buffered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies the buffered operations.
    fn write(&mut self) -> Result<()>;

    /// Discards the buffered operations.
    fn reset(&mut self);
}

/// Batch creation.
pub trait Batcher: Send + Sync {
    /// Creates an empty batch bound to this database.
    fn new_batch(&self) -> Box<dyn Batch>;
}

/// Iteration over key-value pairs in ascending key order.
pub trait Iteratee: Send + Sync {
    /// Iterates over every pair.
    fn new_iterator(&self) -> Box<dyn DbIterator>;

    /// Iterates over pairs whose key starts with `prefix`.
    fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator>;
}

/// A snapshot iterator over key-value pairs.
pub trait DbIterator: Send {
    /// Advances to the next pair, returning false at the end.
    fn next(&mut self) -> bool;

    /// Returns the current key. Valid only after `next` returned true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Valid only after `next` returned true.
    fn value(&self) -> &[u8];
}

/// The full database interface.
pub trait Database:
    KeyValueReader + KeyValueWriter + KeyValueDeleter + Batcher + Iteratee
{
    /// Closes the database; all later operations fail with
    /// [`DatabaseError::Closed`].
    fn close(&self) -> Result<()>;

    /// Returns whether the database is closed.
    fn is_closed(&self) -> bool;
}

/// A snapshot-backed iterator over an owned list of pairs.
///
/// Backends collect the matching pairs under their own lock and hand them to
/// this cursor, which keeps the iterator object lock-free.
pub(crate) struct VecIterator {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl VecIterator {
    pub(crate) fn new(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { pairs, pos: 0 }
    }
}

impl DbIterator for VecIterator {
    fn next(&mut self) -> bool {
        if self.pos < self.pairs.len() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn key(&self) -> &[u8] {
        &self.pairs[self.pos - 1].0
    }

    fn value(&self) -> &[u8] {
        &self.pairs[self.pos - 1].1
    }
}
