//! Outbound message interface.
//!
//! The engine and bootstrapper never touch sockets; they call this trait
//! and the network layer enqueues the send. Calls must not block the engine
//! task.

use serac_ids::{Id, NodeId};

/// Per-chain outbound message sink.
///
/// Request/response pairing is by `request_id`; the caller owns the counter
/// and registers deadlines with the timeout manager.
pub trait Sender: Send + Sync {
    /// Asks each node for its accepted frontier.
    fn get_accepted_frontier(&self, nodes: Vec<NodeId>, request_id: u32);

    /// Answers a frontier request with our accepted frontier.
    fn accepted_frontier(&self, node: NodeId, request_id: u32, ids: Vec<Id>);

    /// Asks each node which of `ids` it has accepted.
    fn get_accepted(&self, nodes: Vec<NodeId>, request_id: u32, ids: Vec<Id>);

    /// Answers an accepted filter request.
    fn accepted(&self, node: NodeId, request_id: u32, ids: Vec<Id>);

    /// Asks a node for a container and its ancestry.
    fn get_ancestors(&self, node: NodeId, request_id: u32, id: Id);

    /// Answers a `get_ancestors` with containers in reverse topological
    /// order.
    fn multi_put(&self, node: NodeId, request_id: u32, containers: Vec<Vec<u8>>);

    /// Asks a node for a single container.
    fn get(&self, node: NodeId, request_id: u32, id: Id);

    /// Delivers a single container.
    fn put(&self, node: NodeId, request_id: u32, id: Id, bytes: Vec<u8>);

    /// Queries nodes about a container, shipping its bytes.
    fn push_query(&self, nodes: Vec<NodeId>, request_id: u32, id: Id, bytes: Vec<u8>);

    /// Queries nodes about a container by id only.
    fn pull_query(&self, nodes: Vec<NodeId>, request_id: u32, id: Id);

    /// Answers a query with our current preference.
    fn chits(&self, node: NodeId, request_id: u32, votes: Vec<Id>);

    /// Re-broadcasts an accepted container to a random sample.
    fn gossip(&self, id: Id, bytes: Vec<u8>);
}
