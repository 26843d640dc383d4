//! Persistent bootstrap job queue.
//!
//! Jobs form a DAG: a job is runnable once every dependency has executed.
//! Three disk tables back the queue so a restart resumes where it left
//! off:
//!
//! - `jobs/<id>`: the job's byte representation
//! - `deps/<dep><job>`: reverse index waking dependents in O(deps)
//! - `runnable/<index>`: FIFO of runnable job ids, with head/tail markers
//!
//! All writes go through a [`VersionDb`]; executing a job commits its
//! removal and the fulfillment of its dependents in one batch, so a crash
//! either replays the whole job or none of it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use serac_db::{
    Database, Iteratee, KeyValueDeleter, KeyValueReader, KeyValueWriter, VersionDb,
};
use serac_ids::{Id, ID_LEN};
use serac_utils::Set;

use crate::error::{ConsensusError, Result};

const JOBS_PREFIX: &[u8] = b"jobs/";
const DEPS_PREFIX: &[u8] = b"deps/";
const RUNNABLE_PREFIX: &[u8] = b"runnable/";
const HEAD_KEY: &[u8] = b"meta/head";
const TAIL_KEY: &[u8] = b"meta/tail";

/// A unit of bootstrap work: accept one decision once its dependencies
/// have been accepted.
pub trait Job: Send {
    /// The decision id this job will accept.
    fn id(&self) -> Id;

    /// Dependencies that are not yet accepted.
    fn missing_dependencies(&self) -> Result<Vec<Id>>;

    /// Runs the job. Must be idempotent: re-executing an already accepted
    /// decision is a no-op.
    fn execute(&self) -> Result<()>;

    /// The byte representation persisted in the queue.
    fn bytes(&self) -> Vec<u8>;
}

/// Reconstructs a [`Job`] from its persisted bytes.
pub trait JobParser: Send + Sync {
    /// Parses job bytes.
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn Job>>;
}

/// The persistent job queue.
pub struct JobQueue {
    db: VersionDb,
    parser: Arc<dyn JobParser>,
    /// dep id -> jobs blocked on it.
    blocking: HashMap<Id, Set<Id>>,
    /// job id -> outstanding dependencies.
    missing: HashMap<Id, Set<Id>>,
    head: u64,
    tail: u64,
}

fn jobs_key(id: &Id) -> Vec<u8> {
    [JOBS_PREFIX, id.as_bytes()].concat()
}

fn deps_key(dep: &Id, job: &Id) -> Vec<u8> {
    [DEPS_PREFIX, dep.as_bytes(), job.as_bytes()].concat()
}

fn runnable_key(index: u64) -> Vec<u8> {
    [RUNNABLE_PREFIX, &index.to_be_bytes()[..]].concat()
}

impl JobQueue {
    /// Opens the queue over `db`, rebuilding in-memory indexes from the
    /// persisted tables.
    pub fn new(db: Arc<dyn Database>, parser: Arc<dyn JobParser>) -> Result<Self> {
        let db = VersionDb::new(db);
        let head = Self::read_counter(&db, HEAD_KEY)?;
        let tail = Self::read_counter(&db, TAIL_KEY)?;

        let mut blocking: HashMap<Id, Set<Id>> = HashMap::new();
        let mut missing: HashMap<Id, Set<Id>> = HashMap::new();
        let mut iter = db.new_iterator_with_prefix(DEPS_PREFIX);
        while iter.next() {
            let key = &iter.key()[DEPS_PREFIX.len()..];
            if key.len() != 2 * ID_LEN {
                return Err(ConsensusError::Queue("malformed dependency key".into()));
            }
            let dep = Id::from_slice(&key[..ID_LEN])
                .map_err(|e| ConsensusError::Queue(e.to_string()))?;
            let job = Id::from_slice(&key[ID_LEN..])
                .map_err(|e| ConsensusError::Queue(e.to_string()))?;
            blocking.entry(dep).or_default().add(job);
            missing.entry(job).or_default().add(dep);
        }

        Ok(Self {
            db,
            parser,
            blocking,
            missing,
            head,
            tail,
        })
    }

    fn read_counter(db: &VersionDb, key: &[u8]) -> Result<u64> {
        match db.get(key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ConsensusError::Queue("malformed counter".into()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    fn write_counter(&self, key: &[u8], value: u64) -> Result<()> {
        self.db.put(key, &value.to_be_bytes())?;
        Ok(())
    }

    /// Returns true if the job is queued (runnable or blocked).
    pub fn has_job(&self, id: &Id) -> Result<bool> {
        Ok(self.db.has(&jobs_key(id))?)
    }

    /// Outstanding dependencies of a queued job.
    #[must_use]
    pub fn missing_of(&self, id: &Id) -> Vec<Id> {
        self.missing.get(id).map(Set::list).unwrap_or_default()
    }

    /// The number of runnable jobs.
    #[must_use]
    pub fn num_runnable(&self) -> u64 {
        self.tail - self.head
    }

    /// The number of jobs blocked on dependencies.
    #[must_use]
    pub fn num_blocked(&self) -> usize {
        self.missing.len()
    }

    /// Enqueues a job. Returns false if it was already queued.
    pub fn push(&mut self, job: Box<dyn Job>) -> Result<bool> {
        let id = job.id();
        if self.has_job(&id)? {
            return Ok(false);
        }

        self.db.put(&jobs_key(&id), &job.bytes())?;
        let deps = job.missing_dependencies()?;
        if deps.is_empty() {
            self.append_runnable(id)?;
        } else {
            debug!(job = %id, deps = deps.len(), "job blocked on dependencies");
            for dep in deps {
                self.db.put(&deps_key(&dep, &id), &[])?;
                self.blocking.entry(dep).or_default().add(id);
                self.missing.entry(id).or_default().add(dep);
            }
        }
        self.db.commit()?;
        Ok(true)
    }

    fn append_runnable(&mut self, id: Id) -> Result<()> {
        self.db.put(&runnable_key(self.tail), id.as_bytes())?;
        self.tail += 1;
        self.write_counter(TAIL_KEY, self.tail)?;
        Ok(())
    }

    /// Marks a dependency as satisfied, waking jobs whose last dependency
    /// it was. Buffered; committed with the caller's batch.
    fn fulfill(&mut self, dep: Id) -> Result<()> {
        let Some(blocked) = self.blocking.remove(&dep) else {
            return Ok(());
        };
        // Wake in fulfillment order.
        let mut woken: Vec<Id> = Vec::new();
        for job in blocked {
            self.db.delete(&deps_key(&dep, &job))?;
            if let Some(remaining) = self.missing.get_mut(&job) {
                remaining.remove(&dep);
                if remaining.is_empty() {
                    self.missing.remove(&job);
                    woken.push(job);
                }
            }
        }
        woken.sort_unstable();
        for job in woken {
            self.append_runnable(job)?;
        }
        Ok(())
    }

    /// Pops the next runnable job. The mutation is buffered until the next
    /// commit, so an execution failure can roll it back.
    fn pop(&mut self) -> Result<Option<Box<dyn Job>>> {
        if self.head == self.tail {
            return Ok(None);
        }
        let key = runnable_key(self.head);
        let id_bytes = self
            .db
            .get(&key)?
            .ok_or_else(|| ConsensusError::Queue("runnable entry missing".into()))?;
        let id =
            Id::from_slice(&id_bytes).map_err(|e| ConsensusError::Queue(e.to_string()))?;
        self.db.delete(&key)?;
        self.head += 1;
        self.write_counter(HEAD_KEY, self.head)?;

        let bytes = self
            .db
            .get(&jobs_key(&id))?
            .ok_or_else(|| ConsensusError::Queue(format!("job {id} missing")))?;
        Ok(Some(self.parser.parse(&bytes)?))
    }

    /// Drains the runnable list, executing each job and atomically
    /// committing its removal together with the fulfillment of its
    /// dependents.
    pub fn execute_all(&mut self) -> Result<usize> {
        let mut executed = 0;
        loop {
            let job = match self.pop()? {
                Some(job) => job,
                None => break,
            };
            let id = job.id();
            if let Err(err) = job.execute() {
                // Roll back the buffered pop so the job stays queued.
                self.db.abort();
                self.head = Self::read_counter(&self.db, HEAD_KEY)?;
                self.tail = Self::read_counter(&self.db, TAIL_KEY)?;
                return Err(err);
            }
            self.db.delete(&jobs_key(&id))?;
            self.fulfill(id)?;
            self.db.commit()?;
            executed += 1;
            debug!(job = %id, "executed job");
        }
        if executed > 0 {
            info!(executed, "drained job queue");
        }
        Ok(executed)
    }
}
