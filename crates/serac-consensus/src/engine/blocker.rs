//! Wait graph for tasks blocked on missing decisions.
//!
//! Issuers, voters, and convincers all wait on decision ids. Tasks live in
//! an arena keyed by a task id; an id-to-tasks multimap records who is
//! waiting on what, so no task ever holds a pointer to another. Fulfillment
//! and abandonment walk the map breadth-first; an abandoned issuer releases
//! its own decision id, which cascades through the map in one pass.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serac_ids::{Id, NodeId};
use serac_utils::Set;

use crate::choices::Decision;

/// Issues a decision into consensus once its parents arrive.
pub(crate) struct Issuer {
    pub decision: Arc<dyn Decision>,
    pub deps: Set<Id>,
}

/// Records a validator's chits once every voted-for id is issued.
pub(crate) struct Voter {
    pub node: NodeId,
    pub request_id: u32,
    pub response: Vec<Id>,
    pub deps: Set<Id>,
}

/// Sends chits for a query once the queried container arrives.
pub(crate) struct Convincer {
    pub node: NodeId,
    pub request_id: u32,
    pub deps: Set<Id>,
}

/// A task parked in the wait graph.
pub(crate) enum Task {
    Issue(Issuer),
    Vote(Voter),
    Convince(Convincer),
}

impl Task {
    fn deps_mut(&mut self) -> &mut Set<Id> {
        match self {
            Task::Issue(t) => &mut t.deps,
            Task::Vote(t) => &mut t.deps,
            Task::Convince(t) => &mut t.deps,
        }
    }

    fn deps(&self) -> &Set<Id> {
        match self {
            Task::Issue(t) => &t.deps,
            Task::Vote(t) => &t.deps,
            Task::Convince(t) => &t.deps,
        }
    }
}

/// How a dependency resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The decision was issued.
    Fulfilled,
    /// The decision will never arrive.
    Abandoned,
}

/// The arena of blocked tasks.
#[derive(Default)]
pub(crate) struct Blocker {
    tasks: HashMap<u64, Task>,
    waiting: HashMap<Id, Vec<u64>>,
    next: u64,
}

impl Blocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of blocked tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Parks a task, or hands it straight back if nothing blocks it.
    pub fn register(&mut self, task: Task) -> Option<Task> {
        if task.deps().is_empty() {
            return Some(task);
        }
        let tid = self.next;
        self.next += 1;
        for dep in task.deps().iter() {
            self.waiting.entry(*dep).or_default().push(tid);
        }
        self.tasks.insert(tid, task);
        None
    }

    /// Resolves `id`, returning the tasks that became runnable (in the
    /// order they unblocked) and the decision ids whose issuers were
    /// abandoned along the way.
    pub fn notify(&mut self, id: Id, outcome: Outcome) -> (Vec<Task>, Vec<Id>) {
        let mut ready = Vec::new();
        let mut abandoned_ids = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((id, outcome));

        while let Some((id, outcome)) = queue.pop_front() {
            let Some(waiters) = self.waiting.remove(&id) else {
                continue;
            };
            for tid in waiters {
                // Stale entries remain in other waiting lists after a task
                // resolves; skip them.
                let Some(task) = self.tasks.get_mut(&tid) else {
                    continue;
                };

                if outcome == Outcome::Abandoned {
                    if let Task::Issue(issuer) = task {
                        // The issuer can never run; its own decision is now
                        // unreachable too.
                        let blocked_id = issuer.decision.id();
                        abandoned_ids.push(blocked_id);
                        queue.push_back((blocked_id, Outcome::Abandoned));
                        self.tasks.remove(&tid);
                        continue;
                    }
                    if let Task::Convince(_) = task {
                        self.tasks.remove(&tid);
                        continue;
                    }
                    // A voter treats an abandoned vote id like a fulfilled
                    // one: the vote simply will not bubble anywhere.
                }

                let deps = task.deps_mut();
                deps.remove(&id);
                if deps.is_empty() {
                    if let Some(task) = self.tasks.remove(&tid) {
                        ready.push(task);
                    }
                }
            }
        }
        (ready, abandoned_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id_of, node_of, TestDecision};

    fn issuer(byte: u8, deps: &[u8]) -> Task {
        Task::Issue(Issuer {
            decision: TestDecision::new(byte, vec![id_of(0)], 1),
            deps: Set::of(deps.iter().map(|b| id_of(*b))),
        })
    }

    fn voter(deps: &[u8]) -> Task {
        Task::Vote(Voter {
            node: node_of(1),
            request_id: 1,
            response: vec![id_of(9)],
            deps: Set::of(deps.iter().map(|b| id_of(*b))),
        })
    }

    #[test]
    fn unblocked_task_is_returned_immediately() {
        let mut blocker = Blocker::new();
        assert!(blocker.register(issuer(1, &[])).is_some());
        assert!(blocker.is_empty());
    }

    #[test]
    fn fulfillment_releases_when_last_dep_arrives() {
        let mut blocker = Blocker::new();
        assert!(blocker.register(issuer(3, &[1, 2])).is_none());

        let (ready, _) = blocker.notify(id_of(1), Outcome::Fulfilled);
        assert!(ready.is_empty());

        let (ready, _) = blocker.notify(id_of(2), Outcome::Fulfilled);
        assert_eq!(ready.len(), 1);
        assert!(blocker.is_empty());
    }

    #[test]
    fn abandonment_cascades_through_issuers() {
        // 2 waits on 1; 3 waits on 2; a voter waits on 3.
        let mut blocker = Blocker::new();
        blocker.register(issuer(2, &[1]));
        blocker.register(issuer(3, &[2]));
        blocker.register(voter(&[3]));

        let (ready, abandoned) = blocker.notify(id_of(1), Outcome::Abandoned);
        assert_eq!(abandoned, vec![id_of(2), id_of(3)]);
        // The voter unblocks (its vote will just be dropped).
        assert_eq!(ready.len(), 1);
        assert!(matches!(ready[0], Task::Vote(_)));
        assert!(blocker.is_empty());
    }

    #[test]
    fn abandoned_convincer_never_runs() {
        let mut blocker = Blocker::new();
        blocker.register(Task::Convince(Convincer {
            node: node_of(1),
            request_id: 1,
            deps: Set::of([id_of(5)]),
        }));

        let (ready, _) = blocker.notify(id_of(5), Outcome::Abandoned);
        assert!(ready.is_empty());
        assert!(blocker.is_empty());
    }

    #[test]
    fn notify_unknown_id_is_noop() {
        let mut blocker = Blocker::new();
        blocker.register(issuer(2, &[1]));
        let (ready, abandoned) = blocker.notify(id_of(9), Outcome::Fulfilled);
        assert!(ready.is_empty());
        assert!(abandoned.is_empty());
        assert_eq!(blocker.len(), 1);
    }
}
