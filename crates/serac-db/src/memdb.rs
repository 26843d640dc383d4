//! In-memory database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    Batch, Batcher, Database, DatabaseError, DbIterator, Iteratee, KeyValueDeleter,
    KeyValueReader, KeyValueWriter, Result, VecIterator,
};

/// An in-memory key-value store backed by a `BTreeMap`.
///
/// Thread-safe; values are cloned on read and write.
#[derive(Debug)]
pub struct MemDb {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemDb {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
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
}

impl KeyValueReader for MemDb {
    fn has(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        Ok(self.data.read().contains_key(key))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.data.read().get(key).cloned())
    }
}

impl KeyValueWriter for MemDb {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

impl KeyValueDeleter for MemDb {
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.data.write().remove(key);
        Ok(())
    }
}

impl Batcher for MemDb {
    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(MemBatch {
            ops: Vec::new(),
            data: self.data.clone(),
            closed: self.closed.clone(),
        })
    }
}

impl Iteratee for MemDb {
    fn new_iterator(&self) -> Box<dyn DbIterator> {
        let pairs = self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(VecIterator::new(pairs))
    }

    fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
        let pairs = self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(VecIterator::new(pairs))
    }
}

impl Database for MemDb {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

struct MemBatch {
    ops: Vec<Op>,
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl Batch for MemBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(Op::Put(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.push(Op::Delete(key.to_vec()));
    }

    fn len(&self) -> usize {
        self.ops.len()
    }

    fn write(&mut self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Closed);
        }
        let mut data = self.data.write();
        for op in self.ops.drain(..) {
            match op {
                Op::Put(k, v) => {
                    data.insert(k, v);
                }
                Op::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ops.clear();
    }
}
