//! Write-buffering database wrapper.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    Batch, Batcher, Database, DatabaseError, DbIterator, Iteratee, KeyValueDeleter,
    KeyValueReader, KeyValueWriter, Result, VecIterator,
};

#[derive(Debug, Clone)]
enum ValueState {
    Present(Vec<u8>),
    Deleted,
}

/// Buffers every write in memory until [`VersionDb::commit`] flushes them to
/// the underlying database in one batch.
///
/// Reads see the buffered state first and fall through to the underlying
/// database. [`VersionDb::abort`] discards the buffer. This is the
/// transactional wrapper the bootstrap queue uses so a job execution and its
/// bookkeeping land atomically.
pub struct VersionDb {
    mem: Arc<RwLock<BTreeMap<Vec<u8>, ValueState>>>,
    db: Arc<dyn Database>,
    closed: Arc<AtomicBool>,
}

impl VersionDb {
    /// Wraps `db` with an empty write buffer.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            mem: Arc::new(RwLock::new(BTreeMap::new())),
            db,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DatabaseError::Closed)
        } else {
            Ok(())
        }
    }

    /// Flushes the buffered writes to the underlying database atomically.
    pub fn commit(&self) -> Result<()> {
        self.check_open()?;
        let mut mem = self.mem.write();
        if mem.is_empty() {
            return Ok(());
        }
        let mut batch = self.db.new_batch();
        for (key, state) in mem.iter() {
            match state {
                ValueState::Present(v) => batch.put(key, v),
                ValueState::Deleted => batch.delete(key),
            }
        }
        batch.write()?;
        mem.clear();
        Ok(())
    }

    /// Discards the buffered writes.
    pub fn abort(&self) {
        self.mem.write().clear();
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.mem.read().len()
    }
}

impl KeyValueReader for VersionDb {
    fn has(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        if let Some(state) = self.mem.read().get(key) {
            return Ok(matches!(state, ValueState::Present(_)));
        }
        self.db.has(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        if let Some(state) = self.mem.read().get(key) {
            return match state {
                ValueState::Present(v) => Ok(Some(v.clone())),
                ValueState::Deleted => Ok(None),
            };
        }
        self.db.get(key)
    }
}

impl KeyValueWriter for VersionDb {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.mem
            .write()
            .insert(key.to_vec(), ValueState::Present(value.to_vec()));
        Ok(())
    }
}

impl KeyValueDeleter for VersionDb {
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.mem.write().insert(key.to_vec(), ValueState::Deleted);
        Ok(())
    }
}

impl Batcher for VersionDb {
    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(VersionBatch {
            ops: Vec::new(),
            mem: self.mem.clone(),
            closed: self.closed.clone(),
        })
    }
}

impl Iteratee for VersionDb {
    fn new_iterator(&self) -> Box<dyn DbIterator> {
        self.merged_iterator(b"")
    }

    fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
        self.merged_iterator(prefix)
    }
}

impl VersionDb {
    fn merged_iterator(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
        // Snapshot the underlying pairs, then apply the overlay.
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut inner = self.db.new_iterator_with_prefix(prefix);
        while inner.next() {
            merged.insert(inner.key().to_vec(), inner.value().to_vec());
        }
        for (key, state) in self.mem.read().iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            match state {
                ValueState::Present(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                ValueState::Deleted => {
                    merged.remove(key);
                }
            }
        }
        Box::new(VecIterator::new(merged.into_iter().collect()))
    }
}

impl Database for VersionDb {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct VersionBatch {
    ops: Vec<(Vec<u8>, ValueState)>,
    mem: Arc<RwLock<BTreeMap<Vec<u8>, ValueState>>>,
    closed: Arc<AtomicBool>,
}

impl Batch for VersionBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops
            .push((key.to_vec(), ValueState::Present(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.push((key.to_vec(), ValueState::Deleted));
    }

    fn len(&self) -> usize {
        self.ops.len()
    }

    fn write(&mut self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Closed);
        }
        let mut mem = self.mem.write();
        for (key, state) in self.ops.drain(..) {
            mem.insert(key, state);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDb;

    fn setup() -> (Arc<dyn Database>, VersionDb) {
        let base: Arc<dyn Database> = Arc::new(MemDb::new());
        let vdb = VersionDb::new(base.clone());
        (base, vdb)
    }

    #[test]
    fn writes_are_buffered_until_commit() {
        let (base, vdb) = setup();
        vdb.put(b"k", b"v").unwrap();

        assert_eq!(vdb.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(base.get(b"k").unwrap(), None);

        vdb.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(vdb.pending(), 0);
    }

    #[test]
    fn abort_discards_buffer() {
        let (base, vdb) = setup();
        vdb.put(b"k", b"v").unwrap();
        vdb.abort();
        vdb.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), None);
    }

    #[test]
    fn buffered_delete_shadows_committed_value() {
        let (base, vdb) = setup();
        base.put(b"k", b"old").unwrap();

        vdb.delete(b"k").unwrap();
        assert_eq!(vdb.get(b"k").unwrap(), None);
        assert!(base.has(b"k").unwrap());

        vdb.commit().unwrap();
        assert!(!base.has(b"k").unwrap());
    }

    #[test]
    fn iterator_merges_overlay() {
        let (base, vdb) = setup();
        base.put(b"a", b"1").unwrap();
        base.put(b"b", b"2").unwrap();
        vdb.delete(b"a").unwrap();
        vdb.put(b"c", b"3").unwrap();

        let mut iter = vdb.new_iterator();
        let mut keys = Vec::new();
        while iter.next() {
            keys.push(iter.key().to_vec());
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
