// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The work queue (§4.1): a three-tier store of test identities plus
//! per-supervisor assignment bookkeeping, serialized by a single lock.
//!
//! Every public method here is a short critical section -- nothing here
//! awaits or blocks on I/O, so holding the lock across a call is always
//! cheap. Supervisors coordinate with each other only through this queue,
//! the batch-size controller, and the outcome sink.

pub use crate::test_id::TestId;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};
use tracing::trace;

/// Identifies one logical worker supervisor slot. Stable for the lifetime of
/// a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SupervisorId(pub usize);

/// Which of the three tiers a test currently sits in, returned by
/// [`WorkQueue::tier_of`] for diagnostics and tests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tier {
    Pending,
    Suspicious,
    Confirmed,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<TestId>,
    suspicious: VecDeque<TestId>,
    confirmed: VecDeque<TestId>,
    assigned: HashMap<SupervisorId, HashSet<TestId>>,
}

/// The shared, mutable work queue described in §4.1.
///
/// # Invariants
///
/// 1. The union of `pending`, `suspicious`, `confirmed`, and every
///    supervisor's assigned set equals the set of not-yet-completed tests.
/// 2. A test is in exactly one tier or assigned to exactly one supervisor,
///    never both.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
}

impl WorkQueue {
    /// Creates a queue with every test in `tests` starting out `Pending`.
    pub fn new(tests: impl IntoIterator<Item = TestId>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: tests.into_iter().collect(),
                suspicious: VecDeque::new(),
                confirmed: VecDeque::new(),
                assigned: HashMap::new(),
            }),
        }
    }

    /// Removes up to `max_size` tests from `Pending` and assigns them to
    /// `supervisor`.
    ///
    /// If `max_size == 1` and `Pending` is empty, pulls one test from
    /// `Confirmed` instead. Returns an empty vec if there is nothing to
    /// take from either tier.
    pub fn take_batch(&self, supervisor: SupervisorId, max_size: usize) -> Vec<TestId> {
        debug_assert!(max_size > 0, "batch size must be positive");
        let mut state = self.state.lock().unwrap();

        let mut batch = Vec::new();
        while batch.len() < max_size {
            match state.pending.pop_front() {
                Some(test) => batch.push(test),
                None => break,
            }
        }

        if batch.is_empty() && max_size == 1 {
            if let Some(test) = state.confirmed.pop_front() {
                batch.push(test);
            }
        }

        if !batch.is_empty() {
            trace!(?supervisor, count = batch.len(), "took batch from queue");
            state
                .assigned
                .entry(supervisor)
                .or_default()
                .extend(batch.iter().cloned());
        }

        batch
    }

    /// Removes `test_id` from `supervisor`'s assigned set. Must be called
    /// before an outcome is recorded for that test in the sink.
    pub fn mark_completed(&self, supervisor: SupervisorId, test_id: &TestId) {
        let mut state = self.state.lock().unwrap();
        if let Some(set) = state.assigned.get_mut(&supervisor) {
            set.remove(test_id);
        }
    }

    /// Moves `tests` from `supervisor`'s assigned set into `Suspicious`.
    pub fn mark_suspicious(&self, supervisor: SupervisorId, tests: impl IntoIterator<Item = TestId>) {
        let mut state = self.state.lock().unwrap();
        Self::demote(&mut state, supervisor, tests, |state, id| {
            state.suspicious.push_back(id)
        });
    }

    /// Moves `tests` from `supervisor`'s assigned set into `Confirmed`.
    pub fn mark_confirmed(&self, supervisor: SupervisorId, tests: impl IntoIterator<Item = TestId>) {
        let mut state = self.state.lock().unwrap();
        Self::demote(&mut state, supervisor, tests, |state, id| {
            state.confirmed.push_back(id)
        });
    }

    fn demote(
        state: &mut QueueState,
        supervisor: SupervisorId,
        tests: impl IntoIterator<Item = TestId>,
        mut push: impl FnMut(&mut QueueState, TestId),
    ) {
        if let Some(set) = state.assigned.get_mut(&supervisor) {
            for id in tests {
                set.remove(&id);
                push(state, id);
            }
        }
    }

    /// Transfers the supervisor's entire assigned set into `Suspicious` and
    /// returns it, for logging. Used when the supervisor loop itself fails
    /// out-of-protocol, with no per-test attribution possible.
    pub fn worker_crashed(&self, supervisor: SupervisorId) -> Vec<TestId> {
        let mut state = self.state.lock().unwrap();
        let residue: Vec<TestId> = state
            .assigned
            .get_mut(&supervisor)
            .map(|set| set.drain().collect())
            .unwrap_or_default();
        state.suspicious.extend(residue.iter().cloned());
        residue
    }

    /// A snapshot of `supervisor`'s currently assigned tests.
    pub fn get_assigned(&self, supervisor: SupervisorId) -> HashSet<TestId> {
        self.state
            .lock()
            .unwrap()
            .assigned
            .get(&supervisor)
            .cloned()
            .unwrap_or_default()
    }

    /// Moves all of `Suspicious` into `Pending`, returning the count moved.
    ///
    /// Callers (the tier promotion monitor) must ensure this is only called
    /// while `Pending` is empty and no supervisor has any assigned tests; see
    /// [`WorkQueue::can_promote`].
    pub fn promote_suspicious(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let count = state.suspicious.len();
        state.pending.extend(state.suspicious.drain(..));
        count
    }

    /// Whether a promotion may currently happen: `Pending` is empty and no
    /// supervisor has any assigned tests.
    pub fn can_promote(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.pending.is_empty() && state.assigned.values().all(HashSet::is_empty)
    }

    /// `true` once all three tiers and every supervisor's assigned set are
    /// empty.
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.pending.is_empty()
            && state.suspicious.is_empty()
            && state.confirmed.is_empty()
            && state.assigned.values().all(HashSet::is_empty)
    }

    /// The number of tests still outstanding across all tiers and
    /// assignments (for diagnostics).
    pub fn remaining_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.pending.len()
            + state.suspicious.len()
            + state.confirmed.len()
            + state.assigned.values().map(HashSet::len).sum::<usize>()
    }

    #[cfg(test)]
    pub(crate) fn tier_of(&self, test_id: &TestId) -> Option<Tier> {
        let state = self.state.lock().unwrap();
        if state.pending.contains(test_id) {
            Some(Tier::Pending)
        } else if state.suspicious.contains(test_id) {
            Some(Tier::Suspicious)
        } else if state.confirmed.contains(test_id) {
            Some(Tier::Confirmed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<TestId> {
        names.iter().map(|n| TestId::new(*n)).collect()
    }

    #[test]
    fn take_batch_respects_max_size_and_order() {
        let queue = WorkQueue::new(ids(&["a", "b", "c"]));
        let sup = SupervisorId(0);
        let batch = queue.take_batch(sup, 2);
        assert_eq!(batch, ids(&["a", "b"]));
        assert_eq!(queue.get_assigned(sup).len(), 2);
        let batch = queue.take_batch(sup, 2);
        assert_eq!(batch, ids(&["c"]));
    }

    #[test]
    fn take_batch_of_size_one_falls_back_to_confirmed_when_pending_empty() {
        let queue = WorkQueue::new(Vec::new());
        let sup = SupervisorId(0);
        queue.mark_confirmed(sup, Vec::new()); // no-op, nothing assigned yet
        // Simulate a test already demoted into Confirmed by another supervisor.
        queue.state.lock().unwrap().confirmed.push_back(TestId::new("x"));

        assert!(queue.take_batch(sup, 5).is_empty(), "size>1 never pulls from Confirmed");
        let batch = queue.take_batch(sup, 1);
        assert_eq!(batch, vec![TestId::new("x")]);
    }

    #[test]
    fn mark_completed_removes_from_assigned_without_touching_tiers() {
        let queue = WorkQueue::new(ids(&["a"]));
        let sup = SupervisorId(0);
        queue.take_batch(sup, 1);
        queue.mark_completed(sup, &TestId::new("a"));
        assert!(queue.get_assigned(sup).is_empty());
        assert!(queue.is_complete());
    }

    #[test]
    fn mark_suspicious_then_confirmed_moves_through_tiers() {
        let queue = WorkQueue::new(ids(&["a", "b"]));
        let sup = SupervisorId(0);
        queue.take_batch(sup, 2);
        queue.mark_suspicious(sup, ids(&["a", "b"]));
        assert_eq!(queue.tier_of(&TestId::new("a")), Some(Tier::Suspicious));

        assert!(queue.can_promote());
        assert_eq!(queue.promote_suspicious(), 2);
        assert_eq!(queue.tier_of(&TestId::new("a")), Some(Tier::Pending));

        let batch = queue.take_batch(sup, 2);
        queue.mark_confirmed(sup, batch);
        assert_eq!(queue.tier_of(&TestId::new("a")), Some(Tier::Confirmed));
    }

    #[test]
    fn worker_crashed_salvages_entire_assigned_set_to_suspicious() {
        let queue = WorkQueue::new(ids(&["a", "b", "c"]));
        let sup = SupervisorId(0);
        queue.take_batch(sup, 3);
        let residue = queue.worker_crashed(sup);
        assert_eq!(residue.len(), 3);
        assert!(queue.get_assigned(sup).is_empty());
        for id in ids(&["a", "b", "c"]) {
            assert_eq!(queue.tier_of(&id), Some(Tier::Suspicious));
        }
    }

    #[test]
    fn can_promote_is_false_while_a_supervisor_has_assigned_tests() {
        let queue = WorkQueue::new(ids(&["a"]));
        let sup = SupervisorId(0);
        queue.take_batch(sup, 1);
        assert!(!queue.can_promote(), "pending is empty but assigned is not");
        queue.mark_completed(sup, &TestId::new("a"));
        assert!(queue.can_promote());
    }

    #[test]
    fn is_complete_only_once_every_tier_and_assignment_drains() {
        let queue = WorkQueue::new(ids(&["a", "b"]));
        assert!(!queue.is_complete());
        let sup = SupervisorId(0);
        let batch = queue.take_batch(sup, 2);
        assert!(!queue.is_complete());
        for id in &batch {
            queue.mark_completed(sup, id);
        }
        assert!(queue.is_complete());
    }
}
