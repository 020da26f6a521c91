//! Effect scheduler: queues dirty watches and drains them on an explicit
//! `flush`, rather than hooking into any particular async runtime.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::graph::NodeId;
use crate::watch::WatchInner;

/// What a scheduler needs to do: track every live watch (the *active* set),
/// accept one that became dirty (the *queued* set), and be told to drain
/// whatever is pending.
pub trait Scheduler {
    /// Register a newly created watch. Registration is distinct from
    /// queuing — a watch is active from the moment it's created until it's
    /// destroyed, whether or not it currently has a pending run.
    fn register(&self, id: NodeId, watch: Weak<WatchInner>);
    /// Remove a destroyed watch from the active set (and, if present, the
    /// queue).
    fn unregister(&self, id: NodeId);
    fn enqueue(&self, watch: Weak<WatchInner>);
    fn flush(&self);
    /// Number of watches currently queued, for introspection/tests.
    fn pending_count(&self) -> usize;
    /// Number of watches currently registered (created, not yet destroyed).
    fn active_count(&self) -> usize;
}

/// The default scheduler: a FIFO queue of dirty watches, drained only when
/// `flush()` is called. A watch already queued (its `queued` flag set) is
/// not queued twice, so repeated invalidation between flushes collapses to
/// one run — matching the "runs: [0, 2]" behaviour in the effect-batching
/// scenario.
#[derive(Default)]
pub struct DeferredScheduler {
    active: RefCell<FxHashMap<NodeId, Weak<WatchInner>>>,
    queue: RefCell<VecDeque<Weak<WatchInner>>>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything queued and forget every registered watch. Used
    /// between tests so unrelated scenarios don't leak dirty or active
    /// watches into each other via the thread-local default scheduler.
    pub fn reset(&self) {
        let mut queue = self.queue.borrow_mut();
        for weak in queue.drain(..) {
            if let Some(watch) = weak.upgrade() {
                watch.clear_queued();
            }
        }
        self.active.borrow_mut().clear();
    }
}

impl Scheduler for DeferredScheduler {
    fn register(&self, id: NodeId, watch: Weak<WatchInner>) {
        self.active.borrow_mut().insert(id, watch);
    }

    fn unregister(&self, id: NodeId) {
        self.active.borrow_mut().remove(&id);
    }

    fn enqueue(&self, watch: Weak<WatchInner>) {
        self.queue.borrow_mut().push_back(watch);
    }

    fn flush(&self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(weak) = next else { break };
            if let Some(watch) = weak.upgrade() {
                if watch.take_queued() {
                    watch.run();
                }
            }
        }
    }

    fn pending_count(&self) -> usize {
        self.queue.borrow().len()
    }

    fn active_count(&self) -> usize {
        self.active.borrow().len()
    }
}

thread_local! {
    static DEFAULT_SCHEDULER: Rc<DeferredScheduler> = Rc::new(DeferredScheduler::new());
}

pub(crate) fn with_default_scheduler<R>(f: impl FnOnce(&Rc<DeferredScheduler>) -> R) -> R {
    DEFAULT_SCHEDULER.with(f)
}

/// Run every watch queued on the default scheduler, in FIFO order.
pub fn flush() {
    with_default_scheduler(|s| s.flush());
}

/// Drop everything queued on the default scheduler without running it.
pub fn reset() {
    with_default_scheduler(|s| s.reset());
}

/// Number of watches currently queued on the default scheduler.
pub fn pending_count() -> usize {
    with_default_scheduler(|s| s.pending_count())
}

/// Number of watches currently registered on the default scheduler (created,
/// not yet destroyed).
pub fn active_count() -> usize {
    with_default_scheduler(|s| s.active_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_flush_is_a_no_op() {
        // The interesting "collapse reentrant enqueues to one run" behaviour
        // needs a live `WatchInner`, so it's exercised in `watch.rs` and at
        // the integration level (scenario S4); this is just a scheduler-local
        // smoke test for the empty-queue path.
        let scheduler = DeferredScheduler::new();
        assert_eq!(scheduler.pending_count(), 0);
        scheduler.flush();
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn reset_clears_queue() {
        let scheduler = DeferredScheduler::new();
        scheduler.reset();
        assert_eq!(scheduler.pending_count(), 0);
    }
}
