//! Work queue for the controller
//!
//! Deduplicates pending references, keeps at most one pass per reference in
//! flight and folds triggers for a busy reference into one follow-up pass.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::model::ObjectRef;

#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    /// Ready to run, in arrival order
    ready: VecDeque<ObjectRef>,

    /// Members of `ready`
    queued: HashSet<ObjectRef>,

    /// Currently being reconciled
    in_flight: HashSet<ObjectRef>,

    /// Triggered while in flight; re-queued when the pass finishes
    dirty: HashSet<ObjectRef>,

    /// Scheduled retries
    delayed: HashMap<ObjectRef, Instant>,
}

impl WorkQueue {
    /// Queue a reference for an immediate pass
    ///
    /// A fresh pass supersedes any scheduled retry for the same reference.
    pub(crate) fn add(&mut self, object_ref: ObjectRef) {
        self.delayed.remove(&object_ref);

        if self.in_flight.contains(&object_ref) {
            self.dirty.insert(object_ref);
            return;
        }
        if self.queued.insert(object_ref.clone()) {
            self.ready.push_back(object_ref);
        }
    }

    /// Schedule a pass after `delay`; the earliest schedule wins
    pub(crate) fn add_after(&mut self, object_ref: ObjectRef, delay: Duration) {
        let at = Instant::now() + delay;
        self.delayed
            .entry(object_ref)
            .and_modify(|existing| {
                if at < *existing {
                    *existing = at;
                }
            })
            .or_insert(at);
    }

    /// Earliest scheduled retry
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    /// Move every retry due at `now` to the ready queue
    pub(crate) fn promote_due(&mut self, now: Instant) {
        let due: Vec<ObjectRef> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(r, _)| r.clone())
            .collect();
        for object_ref in due {
            self.add(object_ref);
        }
    }

    /// Take the next ready reference and mark it in flight
    pub(crate) fn pop(&mut self) -> Option<ObjectRef> {
        let object_ref = self.ready.pop_front()?;
        self.queued.remove(&object_ref);
        self.in_flight.insert(object_ref.clone());
        Some(object_ref)
    }

    /// Mark a pass finished; returns whether a follow-up pass was queued
    pub(crate) fn done(&mut self, object_ref: &ObjectRef) -> bool {
        self.in_flight.remove(object_ref);
        if self.dirty.remove(object_ref) {
            self.add(object_ref.clone());
            return true;
        }
        false
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty() && self.delayed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str) -> ObjectRef {
        ObjectRef::new("root", "default", name)
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut queue = WorkQueue::default();
        queue.add(r("alice"));
        queue.add(r("alice"));
        queue.add(r("bob"));

        assert_eq!(queue.pop(), Some(r("alice")));
        assert_eq!(queue.pop(), Some(r("bob")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_busy_key_is_coalesced_into_one_follow_up() {
        let mut queue = WorkQueue::default();
        queue.add(r("alice"));
        let running = queue.pop().unwrap();

        queue.add(r("alice"));
        queue.add(r("alice"));
        assert_eq!(queue.pop(), None, "no second pass while one is in flight");

        assert!(queue.done(&running));
        assert_eq!(queue.pop(), Some(r("alice")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_delayed_retry_promotes_when_due() {
        let mut queue = WorkQueue::default();
        queue.add_after(r("alice"), Duration::from_secs(300));
        queue.add_after(r("alice"), Duration::from_secs(5));
        assert!(queue.pop().is_none());

        let deadline = queue.next_deadline().unwrap();
        queue.promote_due(deadline - Duration::from_secs(1));
        assert!(queue.pop().is_none());

        queue.promote_due(deadline);
        assert_eq!(queue.pop(), Some(r("alice")));
        queue.done(&r("alice"));
        assert!(queue.is_idle());
    }

    #[test]
    fn test_trigger_supersedes_scheduled_retry() {
        let mut queue = WorkQueue::default();
        queue.add_after(r("alice"), Duration::from_secs(300));
        queue.add(r("alice"));

        assert!(queue.next_deadline().is_none());
        assert_eq!(queue.pop(), Some(r("alice")));
    }
}
