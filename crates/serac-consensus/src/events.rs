//! Decision event fan-out.
//!
//! External consumers (indexers, RPC subscriptions, IPC publishers) observe
//! the engine through this dispatcher rather than by reaching into
//! consensus. Events fire inside the engine task, so subscribers must be
//! fast and non-blocking.

use std::sync::Arc;

use parking_lot::RwLock;

use serac_ids::Id;

/// Observer of decision lifecycle events on one node.
pub trait EventSubscriber: Send + Sync {
    /// A decision entered consensus.
    fn issue(&self, chain_id: Id, id: Id, bytes: &[u8]);

    /// A decision was accepted. Emitted in topological order, at most once
    /// per decision.
    fn accept(&self, chain_id: Id, id: Id, bytes: &[u8]);

    /// A decision was rejected. Emitted at most once per decision.
    fn reject(&self, chain_id: Id, id: Id, bytes: &[u8]);
}

/// Fans decision events out to registered subscribers in registration
/// order.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Emits an issue event.
    pub fn issue(&self, chain_id: Id, id: Id, bytes: &[u8]) {
        for sub in self.subscribers.read().iter() {
            sub.issue(chain_id, id, bytes);
        }
    }

    /// Emits an accept event.
    pub fn accept(&self, chain_id: Id, id: Id, bytes: &[u8]) {
        for sub in self.subscribers.read().iter() {
            sub.accept(chain_id, id, bytes);
        }
    }

    /// Emits a reject event.
    pub fn reject(&self, chain_id: Id, id: Id, bytes: &[u8]) {
        for sub in self.subscribers.read().iter() {
            sub.reject(chain_id, id, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, Id)>>,
    }

    impl EventSubscriber for Recorder {
        fn issue(&self, _chain_id: Id, id: Id, _bytes: &[u8]) {
            self.events.lock().push(("issue".into(), id));
        }

        fn accept(&self, _chain_id: Id, id: Id, _bytes: &[u8]) {
            self.events.lock().push(("accept".into(), id));
        }

        fn reject(&self, _chain_id: Id, id: Id, _bytes: &[u8]) {
            self.events.lock().push(("reject".into(), id));
        }
    }

    #[test]
    fn fan_out_in_order() {
        let dispatcher = EventDispatcher::new();
        let rec = Arc::new(Recorder::default());
        dispatcher.register(rec.clone());

        let chain = Id::from_bytes([0; 32]);
        let id = Id::from_bytes([1; 32]);
        dispatcher.issue(chain, id, b"");
        dispatcher.accept(chain, id, b"");

        let events = rec.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "issue");
        assert_eq!(events[1].0, "accept");
    }

    #[test]
    fn no_subscribers_is_fine() {
        let dispatcher = EventDispatcher::new();
        dispatcher.reject(Id::ZERO, Id::ZERO, b"");
    }
}
