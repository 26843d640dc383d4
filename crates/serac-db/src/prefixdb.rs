//! Prefix-namespaced database wrapper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::{
    Batch, Batcher, Database, DatabaseError, DbIterator, Iteratee, KeyValueDeleter,
    KeyValueReader, KeyValueWriter, Result, VecIterator,
};

/// Wraps a database so every key is transparently prefixed, partitioning a
/// shared database into independent namespaces.
///
/// The prefix is hashed to a fixed length so no namespace can be a prefix of
/// another.
pub struct PrefixDb {
    prefix: Vec<u8>,
    db: Arc<dyn Database>,
    closed: AtomicBool,
}

impl PrefixDb {
    /// Creates a namespace identified by `prefix` over `db`.
    pub fn new(db: Arc<dyn Database>, prefix: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prefix);
        Self {
            prefix: hasher.finalize().to_vec(),
            db,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the underlying database.
    pub fn inner(&self) -> Arc<dyn Database> {
        self.db.clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DatabaseError::Closed)
        } else {
            Ok(())
        }
    }

    fn wrap(&self, key: &[u8]) -> Vec<u8> {
        let mut wrapped = Vec::with_capacity(self.prefix.len() + key.len());
        wrapped.extend_from_slice(&self.prefix);
        wrapped.extend_from_slice(key);
        wrapped
    }
}

impl KeyValueReader for PrefixDb {
    fn has(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        self.db.has(&self.wrap(key))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.db.get(&self.wrap(key))
    }
}

impl KeyValueWriter for PrefixDb {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.db.put(&self.wrap(key), value)
    }
}

impl KeyValueDeleter for PrefixDb {
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.db.delete(&self.wrap(key))
    }
}

impl Batcher for PrefixDb {
    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(PrefixBatch {
            prefix: self.prefix.clone(),
            inner: self.db.new_batch(),
        })
    }
}

impl Iteratee for PrefixDb {
    fn new_iterator(&self) -> Box<dyn DbIterator> {
        self.strip_iterator(self.db.new_iterator_with_prefix(&self.prefix))
    }

    fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
        self.strip_iterator(self.db.new_iterator_with_prefix(&self.wrap(prefix)))
    }
}

impl PrefixDb {
    fn strip_iterator(&self, mut inner: Box<dyn DbIterator>) -> Box<dyn DbIterator> {
        let strip = self.prefix.len();
        let mut pairs = Vec::new();
        while inner.next() {
            pairs.push((inner.key()[strip..].to_vec(), inner.value().to_vec()));
        }
        Box::new(VecIterator::new(pairs))
    }
}

impl Database for PrefixDb {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct PrefixBatch {
    prefix: Vec<u8>,
    inner: Box<dyn Batch>,
}

impl PrefixBatch {
    fn wrap(&self, key: &[u8]) -> Vec<u8> {
        let mut wrapped = Vec::with_capacity(self.prefix.len() + key.len());
        wrapped.extend_from_slice(&self.prefix);
        wrapped.extend_from_slice(key);
        wrapped
    }
}

impl Batch for PrefixBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        let wrapped = self.wrap(key);
        self.inner.put(&wrapped, value);
    }

    fn delete(&mut self, key: &[u8]) {
        let wrapped = self.wrap(key);
        self.inner.delete(&wrapped);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn write(&mut self) -> Result<()> {
        self.inner.write()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDb;

    #[test]
    fn namespaces_are_disjoint() {
        let base: Arc<dyn Database> = Arc::new(MemDb::new());
        let a = PrefixDb::new(base.clone(), b"a");
        let b = PrefixDb::new(base, b"b");

        a.put(b"k", b"1").unwrap();
        b.put(b"k", b"2").unwrap();

        assert_eq!(a.get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(b.get(b"k").unwrap(), Some(b"2".to_vec()));

        a.delete(b"k").unwrap();
        assert_eq!(b.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn iterator_strips_prefix() {
        let base: Arc<dyn Database> = Arc::new(MemDb::new());
        let db = PrefixDb::new(base, b"ns");
        db.put(b"x1", b"1").unwrap();
        db.put(b"x2", b"2").unwrap();

        let mut iter = db.new_iterator_with_prefix(b"x");
        let mut seen = Vec::new();
        while iter.next() {
            seen.push(iter.key().to_vec());
        }
        assert_eq!(seen, vec![b"x1".to_vec(), b"x2".to_vec()]);
    }

    #[test]
    fn batch_applies_to_namespace() {
        let base: Arc<dyn Database> = Arc::new(MemDb::new());
        let db = PrefixDb::new(base, b"ns");
        let mut batch = db.new_batch();
        batch.put(b"k", b"v");
        batch.write().unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
