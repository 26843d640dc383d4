//! Shared test doubles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use serac_ids::{Id, NodeId};

use crate::choices::{check_transition, Decision, Status};
use crate::error::Result;
use crate::sender::Sender;
use crate::tx::Tx;
use crate::vm::{DecisionSource, VerifyError};

pub(crate) fn id_of(byte: u8) -> Id {
    Id::from_bytes([byte; 32])
}

pub(crate) fn node_of(byte: u8) -> NodeId {
    NodeId::from_bytes([byte; 20])
}

/// A decision with scripted behavior.
pub(crate) struct TestDecision {
    pub id: Id,
    pub parents: Vec<Id>,
    pub height: u64,
    pub bytes: Vec<u8>,
    pub status: Mutex<Status>,
    pub verify_error: Mutex<Option<VerifyError>>,
    pub txs: Mutex<Vec<Arc<dyn Tx>>>,
}

impl TestDecision {
    pub fn new(byte: u8, parents: Vec<Id>, height: u64) -> Arc<Self> {
        Arc::new(Self {
            id: id_of(byte),
            parents,
            height,
            bytes: vec![byte],
            status: Mutex::new(Status::Processing),
            verify_error: Mutex::new(None),
            txs: Mutex::new(Vec::new()),
        })
    }

    pub fn with_txs(self: Arc<Self>, txs: Vec<Arc<dyn Tx>>) -> Arc<Self> {
        *self.txs.lock() = txs;
        self
    }

    pub fn fail_verify(self: Arc<Self>, err: VerifyError) -> Arc<Self> {
        *self.verify_error.lock() = Some(err);
        self
    }
}

impl Decision for TestDecision {
    fn id(&self) -> Id {
        self.id
    }

    fn parents(&self) -> Vec<Id> {
        self.parents.clone()
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn status(&self) -> Status {
        *self.status.lock()
    }

    fn txs(&self) -> Vec<Arc<dyn Tx>> {
        self.txs.lock().clone()
    }

    fn verify(&self) -> std::result::Result<(), VerifyError> {
        match self.verify_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn accept(&self) -> Result<()> {
        let mut status = self.status.lock();
        check_transition(self.id, *status, Status::Accepted)?;
        *status = Status::Accepted;
        Ok(())
    }

    fn reject(&self) -> Result<()> {
        let mut status = self.status.lock();
        check_transition(self.id, *status, Status::Rejected)?;
        *status = Status::Rejected;
        Ok(())
    }
}

/// A transaction with scripted inputs and dependencies.
pub(crate) struct TestTx {
    pub id: Id,
    pub inputs: Vec<Id>,
    pub deps: Vec<Id>,
    pub bytes: Vec<u8>,
    pub status: Mutex<Status>,
}

impl TestTx {
    pub fn new(byte: u8, inputs: Vec<Id>) -> Self {
        Self {
            id: id_of(byte),
            inputs,
            deps: Vec::new(),
            bytes: vec![byte],
            status: Mutex::new(Status::Processing),
        }
    }

    pub fn arc(byte: u8, inputs: Vec<Id>) -> Arc<Self> {
        Arc::new(Self::new(byte, inputs))
    }

    pub fn with_deps(mut self, deps: Vec<Id>) -> Self {
        self.deps = deps;
        self
    }
}

impl Tx for TestTx {
    fn id(&self) -> Id {
        self.id
    }

    fn input_ids(&self) -> Vec<Id> {
        self.inputs.clone()
    }

    fn dependencies(&self) -> Vec<Id> {
        self.deps.clone()
    }

    fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn status(&self) -> Status {
        *self.status.lock()
    }

    fn verify(&self) -> std::result::Result<(), VerifyError> {
        Ok(())
    }

    fn accept(&self) -> Result<()> {
        let mut status = self.status.lock();
        check_transition(self.id, *status, Status::Accepted)?;
        *status = Status::Accepted;
        Ok(())
    }

    fn reject(&self) -> Result<()> {
        let mut status = self.status.lock();
        check_transition(self.id, *status, Status::Rejected)?;
        *status = Status::Rejected;
        Ok(())
    }
}

/// Everything a [`CountingSender`] has sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    GetAcceptedFrontier { nodes: Vec<NodeId>, request_id: u32 },
    AcceptedFrontier { node: NodeId, request_id: u32, ids: Vec<Id> },
    GetAccepted { nodes: Vec<NodeId>, request_id: u32, ids: Vec<Id> },
    Accepted { node: NodeId, request_id: u32, ids: Vec<Id> },
    GetAncestors { node: NodeId, request_id: u32, id: Id },
    MultiPut { node: NodeId, request_id: u32, containers: Vec<Vec<u8>> },
    Get { node: NodeId, request_id: u32, id: Id },
    Put { node: NodeId, request_id: u32, id: Id, bytes: Vec<u8> },
    PushQuery { nodes: Vec<NodeId>, request_id: u32, id: Id, bytes: Vec<u8> },
    PullQuery { nodes: Vec<NodeId>, request_id: u32, id: Id },
    Chits { node: NodeId, request_id: u32, votes: Vec<Id> },
    Gossip { id: Id, bytes: Vec<u8> },
}

/// A [`Sender`] that records every outbound message.
#[derive(Default)]
pub(crate) struct CountingSender {
    pub sent: Mutex<Vec<Sent>>,
}

impl CountingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn snapshot(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

impl Sender for CountingSender {
    fn get_accepted_frontier(&self, nodes: Vec<NodeId>, request_id: u32) {
        self.sent
            .lock()
            .push(Sent::GetAcceptedFrontier { nodes, request_id });
    }

    fn accepted_frontier(&self, node: NodeId, request_id: u32, ids: Vec<Id>) {
        self.sent.lock().push(Sent::AcceptedFrontier {
            node,
            request_id,
            ids,
        });
    }

    fn get_accepted(&self, nodes: Vec<NodeId>, request_id: u32, ids: Vec<Id>) {
        self.sent.lock().push(Sent::GetAccepted {
            nodes,
            request_id,
            ids,
        });
    }

    fn accepted(&self, node: NodeId, request_id: u32, ids: Vec<Id>) {
        self.sent.lock().push(Sent::Accepted {
            node,
            request_id,
            ids,
        });
    }

    fn get_ancestors(&self, node: NodeId, request_id: u32, id: Id) {
        self.sent.lock().push(Sent::GetAncestors {
            node,
            request_id,
            id,
        });
    }

    fn multi_put(&self, node: NodeId, request_id: u32, containers: Vec<Vec<u8>>) {
        self.sent.lock().push(Sent::MultiPut {
            node,
            request_id,
            containers,
        });
    }

    fn get(&self, node: NodeId, request_id: u32, id: Id) {
        self.sent.lock().push(Sent::Get {
            node,
            request_id,
            id,
        });
    }

    fn put(&self, node: NodeId, request_id: u32, id: Id, bytes: Vec<u8>) {
        self.sent.lock().push(Sent::Put {
            node,
            request_id,
            id,
            bytes,
        });
    }

    fn push_query(&self, nodes: Vec<NodeId>, request_id: u32, id: Id, bytes: Vec<u8>) {
        self.sent.lock().push(Sent::PushQuery {
            nodes,
            request_id,
            id,
            bytes,
        });
    }

    fn pull_query(&self, nodes: Vec<NodeId>, request_id: u32, id: Id) {
        self.sent.lock().push(Sent::PullQuery {
            nodes,
            request_id,
            id,
        });
    }

    fn chits(&self, node: NodeId, request_id: u32, votes: Vec<Id>) {
        self.sent.lock().push(Sent::Chits {
            node,
            request_id,
            votes,
        });
    }

    fn gossip(&self, id: Id, bytes: Vec<u8>) {
        self.sent.lock().push(Sent::Gossip { id, bytes });
    }
}

/// A [`DecisionSource`] backed by in-memory maps.
#[derive(Default)]
pub(crate) struct TestSource {
    decisions: RwLock<HashMap<Id, Arc<dyn Decision>>>,
    by_bytes: RwLock<HashMap<Vec<u8>, Id>>,
    build_queue: Mutex<Vec<Arc<dyn Decision>>>,
    preference: Mutex<Id>,
    last_accepted: Mutex<Id>,
}

impl TestSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a decision so `parse` and `get` can find it.
    pub fn register(&self, decision: Arc<dyn Decision>) {
        self.by_bytes
            .write()
            .insert(decision.bytes(), decision.id());
        self.decisions.write().insert(decision.id(), decision);
    }

    /// Queues a decision for the next `build` call.
    pub fn queue_build(&self, decision: Arc<dyn Decision>) {
        self.register(decision.clone());
        self.build_queue.lock().push(decision);
    }

    pub fn preference(&self) -> Id {
        *self.preference.lock()
    }

    pub fn set_last_accepted(&self, id: Id) {
        *self.last_accepted.lock() = id;
    }
}

impl DecisionSource for TestSource {
    fn parse(&self, bytes: &[u8]) -> std::result::Result<Arc<dyn Decision>, VerifyError> {
        let id = self
            .by_bytes
            .read()
            .get(bytes)
            .copied()
            .ok_or_else(|| VerifyError::Permanent("unparsable container".into()))?;
        self.get(&id)
            .ok_or_else(|| VerifyError::Permanent("missing container".into()))
    }

    fn get(&self, id: &Id) -> Option<Arc<dyn Decision>> {
        self.decisions.read().get(id).cloned()
    }

    fn build(&self) -> Option<Arc<dyn Decision>> {
        self.build_queue.lock().pop()
    }

    fn set_preference(&self, id: Id) {
        *self.preference.lock() = id;
    }

    fn last_accepted(&self) -> Id {
        *self.last_accepted.lock()
    }
}
