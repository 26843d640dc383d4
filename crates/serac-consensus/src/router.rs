//! Message routing into per-chain handler actors.
//!
//! Each chain owns a bounded FIFO and a single task draining it, so the
//! engine is never entered concurrently. The router parses nothing; it
//! maps already-decoded wire messages to the owning chain's queue. A
//! throttler reserves a share of each queue for staking validators and
//! drops non-staker traffic once the unreserved pool is full.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use serac_ids::{Id, NodeId};

use serac_utils::timer::Clock;

use crate::bootstrap::Bootstrapper;
use crate::engine::Transitive;
use crate::error::Result;
use crate::message::Message;
use crate::timeout::{RequestKey, TimeoutConfig, TimeoutManager};

/// A message delivered to one chain's handler.
#[derive(Debug, Clone)]
pub enum ChainMessage {
    GetAcceptedFrontier { node: NodeId, request_id: u32 },
    AcceptedFrontier { node: NodeId, request_id: u32, ids: Vec<Id> },
    GetAcceptedFrontierFailed { node: NodeId, request_id: u32 },
    GetAccepted { node: NodeId, request_id: u32, ids: Vec<Id> },
    Accepted { node: NodeId, request_id: u32, ids: Vec<Id> },
    GetAcceptedFailed { node: NodeId, request_id: u32 },
    GetAncestors { node: NodeId, request_id: u32, id: Id },
    MultiPut { node: NodeId, request_id: u32, containers: Vec<Vec<u8>> },
    GetAncestorsFailed { node: NodeId, request_id: u32 },
    Get { node: NodeId, request_id: u32, id: Id },
    GetFailed { node: NodeId, request_id: u32 },
    Put { node: NodeId, request_id: u32, container: Vec<u8> },
    PushQuery { node: NodeId, request_id: u32, container: Vec<u8> },
    PullQuery { node: NodeId, request_id: u32, id: Id },
    Chits { node: NodeId, request_id: u32, votes: Vec<Id> },
    QueryFailed { node: NodeId, request_id: u32 },
    /// The VM has pending work.
    Notify,
    /// Periodic gossip trigger.
    GossipTick,
    /// Drain and stop the handler task.
    Shutdown,
}

/// Consumer of a chain's message stream.
pub trait MessageSink: Send {
    /// Handles one message. An error is fatal for the chain.
    fn handle(&mut self, msg: ChainMessage) -> Result<()>;
}

/// The bootstrap engine and the transitive engine, glued in sequence.
///
/// Messages route to the bootstrapper until it finishes; the transitive
/// engine is then built (rooted at the bootstrapped frontier) and takes
/// over. The bootstrapper stays around to answer other nodes' bootstrap
/// queries.
pub struct ChainEngine {
    bootstrapper: Bootstrapper,
    engine: Option<Transitive>,
    engine_factory: Option<Box<dyn FnOnce() -> Result<Transitive> + Send>>,
}

impl ChainEngine {
    /// Creates the pair. `engine_factory` runs once bootstrap completes.
    pub fn new(
        bootstrapper: Bootstrapper,
        engine_factory: Box<dyn FnOnce() -> Result<Transitive> + Send>,
    ) -> Self {
        Self {
            bootstrapper,
            engine: None,
            engine_factory: Some(engine_factory),
        }
    }

    /// Starts bootstrapping.
    pub fn start(&mut self) -> Result<()> {
        self.bootstrapper.start()?;
        self.maybe_finish_bootstrap()
    }

    /// Returns true once the transitive engine is live.
    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.engine.is_some()
    }

    /// The running transitive engine, if bootstrapping finished.
    pub fn engine(&self) -> Option<&Transitive> {
        self.engine.as_ref()
    }

    fn maybe_finish_bootstrap(&mut self) -> Result<()> {
        if self.engine.is_none() && self.bootstrapper.is_done() {
            if let Some(factory) = self.engine_factory.take() {
                info!("bootstrap complete, starting consensus");
                self.engine = Some(factory()?);
            }
        }
        Ok(())
    }
}

impl MessageSink for ChainEngine {
    fn handle(&mut self, msg: ChainMessage) -> Result<()> {
        // Bootstrap queries are always served, before and after we finish
        // our own bootstrap.
        match &msg {
            ChainMessage::GetAcceptedFrontier { node, request_id } => {
                return self.bootstrapper.get_accepted_frontier(*node, *request_id);
            }
            ChainMessage::GetAccepted {
                node,
                request_id,
                ids,
            } => {
                return self
                    .bootstrapper
                    .get_accepted(*node, *request_id, ids.clone());
            }
            ChainMessage::GetAncestors {
                node,
                request_id,
                id,
            } => return self.bootstrapper.get_ancestors(*node, *request_id, *id),
            _ => {}
        }

        if let Some(engine) = self.engine.as_mut() {
            match msg {
                ChainMessage::Get {
                    node,
                    request_id,
                    id,
                } => engine.get(node, request_id, id),
                ChainMessage::GetFailed { node, request_id } => {
                    engine.get_failed(node, request_id)
                }
                ChainMessage::Put {
                    node,
                    request_id,
                    container,
                } => engine.put(node, request_id, &container),
                ChainMessage::PushQuery {
                    node,
                    request_id,
                    container,
                } => engine.push_query(node, request_id, &container),
                ChainMessage::PullQuery {
                    node,
                    request_id,
                    id,
                } => engine.pull_query(node, request_id, id),
                ChainMessage::Chits {
                    node,
                    request_id,
                    votes,
                } => engine.chits(node, request_id, votes),
                ChainMessage::QueryFailed { node, request_id } => {
                    engine.query_failed(node, request_id)
                }
                ChainMessage::Notify => engine.notify_pending(),
                ChainMessage::GossipTick => engine.gossip(),
                other => {
                    debug!(?other, "dropping bootstrap-phase message after bootstrap");
                    Ok(())
                }
            }
        } else {
            let result = match msg {
                ChainMessage::AcceptedFrontier {
                    node,
                    request_id,
                    ids,
                } => self.bootstrapper.accepted_frontier(node, request_id, ids),
                ChainMessage::GetAcceptedFrontierFailed { node, request_id } => self
                    .bootstrapper
                    .get_accepted_frontier_failed(node, request_id),
                ChainMessage::Accepted {
                    node,
                    request_id,
                    ids,
                } => self.bootstrapper.accepted(node, request_id, ids),
                ChainMessage::GetAcceptedFailed { node, request_id } => {
                    self.bootstrapper.get_accepted_failed(node, request_id)
                }
                ChainMessage::MultiPut {
                    node,
                    request_id,
                    containers,
                } => self.bootstrapper.multi_put(node, request_id, containers),
                ChainMessage::GetAncestorsFailed { node, request_id } => {
                    self.bootstrapper.get_ancestors_failed(node, request_id)
                }
                other => {
                    debug!(?other, "dropping consensus message while bootstrapping");
                    Ok(())
                }
            };
            result?;
            self.maybe_finish_bootstrap()
        }
    }
}

/// Queue throttling for one chain.
#[derive(Debug, Clone)]
pub struct ThrottlerConfig {
    /// Total pending messages allowed.
    pub pool_size: usize,
    /// Portion of the pool reserved for staking validators.
    pub staker_portion: f64,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            staker_portion: 0.375,
        }
    }
}

/// Tracks pending message counts; non-stakers only get the unreserved
/// share of the pool.
pub struct MsgThrottler {
    pool_size: usize,
    unreserved: usize,
    pending_total: usize,
    pending_non_staker: usize,
}

impl MsgThrottler {
    /// Creates a throttler.
    #[must_use]
    pub fn new(config: &ThrottlerConfig) -> Self {
        let reserved = (config.pool_size as f64 * config.staker_portion) as usize;
        Self {
            pool_size: config.pool_size,
            unreserved: config.pool_size.saturating_sub(reserved),
            pending_total: 0,
            pending_non_staker: 0,
        }
    }

    /// Reserves a slot. Returns false if the message must be dropped.
    pub fn add(&mut self, is_staker: bool) -> bool {
        if self.pending_total >= self.pool_size {
            return false;
        }
        if !is_staker && self.pending_non_staker >= self.unreserved {
            return false;
        }
        self.pending_total += 1;
        if !is_staker {
            self.pending_non_staker += 1;
        }
        true
    }

    /// Releases a slot.
    pub fn remove(&mut self, is_staker: bool) {
        self.pending_total = self.pending_total.saturating_sub(1);
        if !is_staker {
            self.pending_non_staker = self.pending_non_staker.saturating_sub(1);
        }
    }
}

/// Tracks the CPU time spent handling each peer's messages.
///
/// Usage decays multiplicatively so the budget reflects recent behavior;
/// `portion` reports a peer's share of all tracked time.
#[derive(Default)]
pub struct CpuTracker {
    usage: HashMap<NodeId, f64>,
    total: f64,
}

impl CpuTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `elapsed` seconds of work on behalf of `node`.
    pub fn observe(&mut self, node: NodeId, elapsed: std::time::Duration) {
        let secs = elapsed.as_secs_f64();
        *self.usage.entry(node).or_insert(0.0) += secs;
        self.total += secs;
    }

    /// The share of tracked CPU time consumed by `node`.
    #[must_use]
    pub fn portion(&self, node: &NodeId) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        self.usage.get(node).copied().unwrap_or(0.0) / self.total
    }

    /// Decays every peer's usage by `factor` (in `[0, 1]`).
    pub fn decay(&mut self, factor: f64) {
        self.total = 0.0;
        for usage in self.usage.values_mut() {
            *usage *= factor;
            self.total += *usage;
        }
    }
}

fn msg_node(msg: &ChainMessage) -> Option<NodeId> {
    match msg {
        ChainMessage::GetAcceptedFrontier { node, .. }
        | ChainMessage::AcceptedFrontier { node, .. }
        | ChainMessage::GetAcceptedFrontierFailed { node, .. }
        | ChainMessage::GetAccepted { node, .. }
        | ChainMessage::Accepted { node, .. }
        | ChainMessage::GetAcceptedFailed { node, .. }
        | ChainMessage::GetAncestors { node, .. }
        | ChainMessage::MultiPut { node, .. }
        | ChainMessage::GetAncestorsFailed { node, .. }
        | ChainMessage::Get { node, .. }
        | ChainMessage::GetFailed { node, .. }
        | ChainMessage::Put { node, .. }
        | ChainMessage::PushQuery { node, .. }
        | ChainMessage::PullQuery { node, .. }
        | ChainMessage::Chits { node, .. }
        | ChainMessage::QueryFailed { node, .. } => Some(*node),
        ChainMessage::Notify | ChainMessage::GossipTick | ChainMessage::Shutdown => None,
    }
}

struct Inbound {
    staker: bool,
    throttled: bool,
    msg: ChainMessage,
}

/// Handle to one chain's message queue.
pub struct ChainHandler {
    chain_id: Id,
    tx: mpsc::Sender<Inbound>,
    throttler: Arc<Mutex<MsgThrottler>>,
    cpu: Arc<Mutex<CpuTracker>>,
}

impl ChainHandler {
    /// Spawns the handler task for `sink` with a queue of `capacity`.
    pub fn spawn(
        chain_id: Id,
        mut sink: Box<dyn MessageSink>,
        throttler_config: &ThrottlerConfig,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Inbound>(capacity);
        let throttler = Arc::new(Mutex::new(MsgThrottler::new(throttler_config)));
        let cpu = Arc::new(Mutex::new(CpuTracker::new()));
        let task_throttler = throttler.clone();
        let task_cpu = cpu.clone();

        let task = tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                if inbound.throttled {
                    task_throttler.lock().remove(inbound.staker);
                }
                if matches!(inbound.msg, ChainMessage::Shutdown) {
                    debug!(chain = %chain_id, "handler shutting down");
                    break;
                }
                let node = msg_node(&inbound.msg);
                let started = std::time::Instant::now();
                let result = sink.handle(inbound.msg);
                if let Some(node) = node {
                    task_cpu.lock().observe(node, started.elapsed());
                }
                if let Err(err) = result {
                    // Fatal: terminate the chain.
                    error!(chain = %chain_id, %err, "fatal engine error, stopping chain");
                    break;
                }
            }
        });

        (
            Self {
                chain_id,
                tx,
                throttler,
                cpu,
            },
            task,
        )
    }

    /// The per-peer CPU accounting for this chain.
    #[must_use]
    pub fn cpu_tracker(&self) -> Arc<Mutex<CpuTracker>> {
        self.cpu.clone()
    }

    /// The chain this handler serves.
    #[must_use]
    pub fn chain_id(&self) -> Id {
        self.chain_id
    }

    /// Enqueues an external message, subject to throttling. Returns false
    /// if the message was dropped.
    pub fn push_external(&self, is_staker: bool, msg: ChainMessage) -> bool {
        if !self.throttler.lock().add(is_staker) {
            debug!(chain = %self.chain_id, "throttling non-staker message");
            return false;
        }
        let inbound = Inbound {
            staker: is_staker,
            throttled: true,
            msg,
        };
        if self.tx.try_send(inbound).is_err() {
            self.throttler.lock().remove(is_staker);
            return false;
        }
        true
    }

    /// Enqueues an internal message (timeout, VM notify, gossip tick).
    /// Internal messages bypass the throttler.
    pub fn push_internal(&self, msg: ChainMessage) -> bool {
        self.tx
            .try_send(Inbound {
                staker: true,
                throttled: false,
                msg,
            })
            .is_ok()
    }
}

/// Routes wire messages to per-chain handlers.
pub struct Router {
    chains: Mutex<HashMap<Id, ChainHandler>>,
    timeouts: Arc<TimeoutManager>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router with a default timeout manager.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(Arc::new(TimeoutManager::new(
            TimeoutConfig::default(),
            Clock::default(),
        )))
    }

    /// Creates an empty router over a shared timeout manager.
    #[must_use]
    pub fn with_timeouts(timeouts: Arc<TimeoutManager>) -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            timeouts,
        }
    }

    /// The shared timeout manager.
    #[must_use]
    pub fn timeouts(&self) -> &Arc<TimeoutManager> {
        &self.timeouts
    }

    /// Registers an outbound request: if no matching response arrives
    /// before the adaptive deadline, `failure` is delivered to the chain's
    /// handler as an internal message.
    pub fn register_request(
        self: &Arc<Self>,
        chain_id: Id,
        node: NodeId,
        request_id: u32,
        failure: ChainMessage,
    ) {
        let key = RequestKey {
            chain_id,
            node,
            request_id,
        };
        let router = Arc::downgrade(self);
        self.timeouts.register(
            key,
            Box::new(move || {
                if let Some(router) = router.upgrade() {
                    let chains = router.chains.lock();
                    if let Some(handler) = chains.get(&chain_id) {
                        handler.push_internal(failure);
                    }
                }
            }),
        );
    }

    /// Registers a chain's handler.
    pub fn add_chain(&self, handler: ChainHandler) {
        self.chains.lock().insert(handler.chain_id(), handler);
    }

    /// Removes a chain, shutting down its handler.
    pub fn remove_chain(&self, chain_id: &Id) {
        if let Some(handler) = self.chains.lock().remove(chain_id) {
            handler.push_internal(ChainMessage::Shutdown);
        }
    }

    /// Shuts down every chain, cancelling all outstanding requests.
    pub fn shutdown(&self) {
        self.timeouts.cancel_all();
        for handler in self.chains.lock().values() {
            handler.push_internal(ChainMessage::Shutdown);
        }
    }

    /// Routes a decoded wire message from `node`. Messages for unknown
    /// chains and non-consensus opcodes are dropped; responses cancel
    /// their pending timeout.
    pub fn route(&self, node: NodeId, is_staker: bool, message: Message) {
        // Responses settle the adaptive timeout for their request.
        if let Message::AcceptedFrontier {
            chain_id,
            request_id,
            ..
        }
        | Message::Accepted {
            chain_id,
            request_id,
            ..
        }
        | Message::MultiPut {
            chain_id,
            request_id,
            ..
        }
        | Message::Put {
            chain_id,
            request_id,
            ..
        }
        | Message::Chits {
            chain_id,
            request_id,
            ..
        } = &message
        {
            self.timeouts.remove(&RequestKey {
                chain_id: *chain_id,
                node,
                request_id: *request_id,
            });
        }

        let Some((chain_id, msg)) = Self::translate(node, message) else {
            return;
        };
        let chains = self.chains.lock();
        let Some(handler) = chains.get(&chain_id) else {
            warn!(%chain_id, "message for unknown chain");
            return;
        };
        handler.push_external(is_staker, msg);
    }

    fn translate(node: NodeId, message: Message) -> Option<(Id, ChainMessage)> {
        Some(match message {
            Message::GetAcceptedFrontier {
                chain_id,
                request_id,
                ..
            } => (
                chain_id,
                ChainMessage::GetAcceptedFrontier { node, request_id },
            ),
            Message::AcceptedFrontier {
                chain_id,
                request_id,
                container_ids,
            } => (
                chain_id,
                ChainMessage::AcceptedFrontier {
                    node,
                    request_id,
                    ids: container_ids,
                },
            ),
            Message::GetAccepted {
                chain_id,
                request_id,
                container_ids,
                ..
            } => (
                chain_id,
                ChainMessage::GetAccepted {
                    node,
                    request_id,
                    ids: container_ids,
                },
            ),
            Message::Accepted {
                chain_id,
                request_id,
                container_ids,
            } => (
                chain_id,
                ChainMessage::Accepted {
                    node,
                    request_id,
                    ids: container_ids,
                },
            ),
            Message::GetAncestors {
                chain_id,
                request_id,
                container_id,
                ..
            } => (
                chain_id,
                ChainMessage::GetAncestors {
                    node,
                    request_id,
                    id: container_id,
                },
            ),
            Message::MultiPut {
                chain_id,
                request_id,
                containers,
            } => (
                chain_id,
                ChainMessage::MultiPut {
                    node,
                    request_id,
                    containers,
                },
            ),
            Message::Get {
                chain_id,
                request_id,
                container_id,
                ..
            } => (
                chain_id,
                ChainMessage::Get {
                    node,
                    request_id,
                    id: container_id,
                },
            ),
            Message::Put {
                chain_id,
                request_id,
                container,
                ..
            } => (
                chain_id,
                ChainMessage::Put {
                    node,
                    request_id,
                    container,
                },
            ),
            Message::PushQuery {
                chain_id,
                request_id,
                container,
                ..
            } => (
                chain_id,
                ChainMessage::PushQuery {
                    node,
                    request_id,
                    container,
                },
            ),
            Message::PullQuery {
                chain_id,
                request_id,
                container_id,
                ..
            } => (
                chain_id,
                ChainMessage::PullQuery {
                    node,
                    request_id,
                    id: container_id,
                },
            ),
            Message::Chits {
                chain_id,
                request_id,
                container_ids,
            } => (
                chain_id,
                ChainMessage::Chits {
                    node,
                    request_id,
                    votes: container_ids,
                },
            ),
            // Handshake traffic never reaches consensus.
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapConfig;
    use crate::choices::Decision;
    use crate::events::EventDispatcher;
    use crate::params::Parameters;
    use crate::snowman::Snowman;
    use crate::testing::{id_of, node_of, CountingSender, Sent, TestDecision, TestSource};
    use crate::validators::{Validator, ValidatorSet};
    use crate::vm::DecisionSource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serac_db::MemDb;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        handled: Arc<Mutex<Vec<u32>>>,
        failed: Arc<Mutex<Vec<u32>>>,
    }

    impl MessageSink for RecordingSink {
        fn handle(&mut self, msg: ChainMessage) -> Result<()> {
            match msg {
                ChainMessage::Chits { request_id, .. } => {
                    self.handled.lock().push(request_id);
                }
                ChainMessage::QueryFailed { request_id, .. } => {
                    self.failed.lock().push(request_id);
                }
                _ => {}
            }
            Ok(())
        }
    }

    async fn drain(handler: &ChainHandler, task: JoinHandle<()>) {
        handler.push_internal(ChainMessage::Shutdown);
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    #[tokio::test]
    async fn handler_preserves_fifo_order() {
        let sink = RecordingSink::default();
        let handled = sink.handled.clone();
        let (handler, task) = ChainHandler::spawn(
            id_of(1),
            Box::new(sink),
            &ThrottlerConfig::default(),
            64,
        );

        for request_id in 0..10 {
            assert!(handler.push_external(
                true,
                ChainMessage::Chits {
                    node: node_of(1),
                    request_id,
                    votes: vec![],
                },
            ));
        }
        drain(&handler, task).await;
        assert_eq!(*handled.lock(), (0..10).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn non_stakers_are_throttled() {
        let sink = RecordingSink::default();
        let (handler, task) = ChainHandler::spawn(
            id_of(1),
            Box::new(sink),
            &ThrottlerConfig {
                pool_size: 4,
                staker_portion: 0.5,
            },
            64,
        );

        let msg = |request_id| ChainMessage::Chits {
            node: node_of(2),
            request_id,
            votes: vec![],
        };
        // Unreserved share is 2: the third non-staker message drops.
        assert!(handler.push_external(false, msg(0)));
        assert!(handler.push_external(false, msg(1)));
        assert!(!handler.push_external(false, msg(2)));
        // Stakers may still use the reserved share.
        assert!(handler.push_external(true, msg(3)));

        drain(&handler, task).await;
    }

    #[test]
    fn cpu_tracker_portions_and_decay() {
        let mut tracker = CpuTracker::new();
        tracker.observe(node_of(1), Duration::from_millis(300));
        tracker.observe(node_of(2), Duration::from_millis(100));

        assert!((tracker.portion(&node_of(1)) - 0.75).abs() < 1e-9);
        assert!((tracker.portion(&node_of(2)) - 0.25).abs() < 1e-9);
        assert_eq!(tracker.portion(&node_of(3)), 0.0);

        tracker.decay(0.5);
        // Relative portions survive the decay.
        assert!((tracker.portion(&node_of(1)) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn throttler_releases_slots() {
        let mut throttler = MsgThrottler::new(&ThrottlerConfig {
            pool_size: 2,
            staker_portion: 0.5,
        });
        assert!(throttler.add(false));
        assert!(!throttler.add(false));
        throttler.remove(false);
        assert!(throttler.add(false));
    }

    #[tokio::test]
    async fn router_routes_by_chain() {
        let sink = RecordingSink::default();
        let handled = sink.handled.clone();
        let (handler, task) = ChainHandler::spawn(
            id_of(1),
            Box::new(sink),
            &ThrottlerConfig::default(),
            64,
        );

        let router = Router::new();
        router.add_chain(handler);

        router.route(
            node_of(1),
            true,
            Message::Chits {
                chain_id: id_of(1),
                request_id: 7,
                container_ids: vec![],
            },
        );
        // Unknown chain: dropped.
        router.route(
            node_of(1),
            true,
            Message::Chits {
                chain_id: id_of(9),
                request_id: 8,
                container_ids: vec![],
            },
        );

        let chains = router.chains.lock();
        let handler = chains.get(&id_of(1)).unwrap();
        handler.push_internal(ChainMessage::Shutdown);
        drop(chains);
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert_eq!(*handled.lock(), vec![7]);
    }

    #[tokio::test]
    async fn timed_out_request_delivers_failure() {
        let clock = Clock::default();
        clock.set(chrono::Utc::now());
        let timeouts = Arc::new(TimeoutManager::new(TimeoutConfig::default(), clock.clone()));
        let router = Arc::new(Router::with_timeouts(timeouts.clone()));

        let sink = RecordingSink::default();
        let failed = sink.failed.clone();
        let (handler, task) = ChainHandler::spawn(
            id_of(1),
            Box::new(sink),
            &ThrottlerConfig::default(),
            8,
        );
        router.add_chain(handler);

        router.register_request(
            id_of(1),
            node_of(2),
            5,
            ChainMessage::QueryFailed {
                node: node_of(2),
                request_id: 5,
            },
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(timeouts.fire_expired(), 1);

        {
            let chains = router.chains.lock();
            chains
                .get(&id_of(1))
                .unwrap()
                .push_internal(ChainMessage::Shutdown);
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert_eq!(*failed.lock(), vec![5]);
    }

    #[test]
    fn response_cancels_pending_timeout() {
        let clock = Clock::default();
        clock.set(chrono::Utc::now());
        let timeouts = Arc::new(TimeoutManager::new(TimeoutConfig::default(), clock.clone()));
        let router = Arc::new(Router::with_timeouts(timeouts.clone()));

        router.register_request(
            id_of(1),
            node_of(2),
            5,
            ChainMessage::QueryFailed {
                node: node_of(2),
                request_id: 5,
            },
        );
        assert_eq!(timeouts.num_pending(), 1);

        // The chits response settles the request even though the chain is
        // not registered.
        router.route(
            node_of(2),
            true,
            Message::Chits {
                chain_id: id_of(1),
                request_id: 5,
                container_ids: vec![],
            },
        );
        assert_eq!(timeouts.num_pending(), 0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(timeouts.fire_expired(), 0);
    }

    #[test]
    fn chain_engine_hands_over_after_bootstrap() {
        // No beacons: bootstrap completes at start, the engine factory
        // runs, and consensus messages are served.
        let sender = CountingSender::new();
        let source = TestSource::new();
        let genesis = TestDecision::new(0, vec![Id::ZERO], 0);
        genesis.accept().unwrap();
        source.register(genesis);
        source.set_last_accepted(id_of(0));

        let chain = id_of(0xcc);
        let events = Arc::new(EventDispatcher::new());
        let beacons = Arc::new(ValidatorSet::new());
        let bootstrapper = Bootstrapper::new(
            BootstrapConfig::default(),
            chain,
            Arc::new(MemDb::new()),
            source.clone(),
            sender.clone(),
            beacons,
            events.clone(),
            StdRng::seed_from_u64(1),
        )
        .unwrap();

        let params = Parameters::new(1, 1, 1, 1);
        let validators = Arc::new(ValidatorSet::new());
        validators.add(Validator::new(node_of(0), 1)).unwrap();
        let factory_source = source.clone();
        let factory_sender = sender.clone();
        let factory = Box::new(move || {
            let consensus = Snowman::new(
                params.clone(),
                chain,
                events.clone(),
                factory_source.last_accepted(),
            )?;
            Ok(Transitive::new(
                params,
                chain,
                Box::new(consensus),
                factory_source,
                factory_sender,
                validators,
                events,
                StdRng::seed_from_u64(2),
            ))
        });

        let mut chain_engine = ChainEngine::new(bootstrapper, factory);
        chain_engine.start().unwrap();
        assert!(chain_engine.is_bootstrapped());

        // A pull query for the accepted block is answered with chits.
        chain_engine
            .handle(ChainMessage::PullQuery {
                node: node_of(3),
                request_id: 9,
                id: id_of(0),
            })
            .unwrap();
        assert!(sender
            .snapshot()
            .iter()
            .any(|s| matches!(s, Sent::Chits { request_id: 9, .. })));
    }
}
