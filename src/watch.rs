//! Watches (effects): consumers that run a side-effecting callback whenever
//! a tracked dependency changes, via the scheduler rather than inline.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::graph::{self, AnyConsumer, Edge, NodeId};
use crate::scheduler::with_default_scheduler;

/// Construction options for [`effect`].
#[derive(Default)]
pub struct EffectOptions {
    pub(crate) id: Option<String>,
    /// §6: by construction a watch callback running inside a notification
    /// pass (the push phase) would violate I5 if it wrote a signal it also
    /// reads; this flag is reserved for callers who have proven their
    /// effect's writes are disjoint from its reads and want to bypass the
    /// default disallow. Unused by the scheduler today — the scheduler
    /// never runs a watch synchronously from inside `notify_consumers`, so
    /// there is nothing to bypass yet, but the knob is part of the public
    /// surface so it can be wired up without a breaking change later.
    pub(crate) allow_signal_writes: bool,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_allow_signal_writes(mut self, allow: bool) -> Self {
        self.allow_signal_writes = allow;
        self
    }
}

pub(crate) struct WatchInner {
    id: NodeId,
    label: String,
    callback: RefCell<Box<dyn FnMut()>>,
    tracking_version: Cell<u64>,
    producers: RefCell<FxHashMap<NodeId, Rc<Edge>>>,
    queued: Cell<bool>,
    destroyed: Cell<bool>,
    run_count: Cell<u64>,
    self_weak: RefCell<Weak<WatchInner>>,
}

impl AnyConsumer for WatchInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn tracking_version(&self) -> u64 {
        self.tracking_version.get()
    }

    fn begin_tracking_pass(&self) -> u64 {
        let next = self.tracking_version.get() + 1;
        self.tracking_version.set(next);
        next
    }

    fn producers_map(&self) -> &RefCell<FxHashMap<NodeId, Rc<Edge>>> {
        &self.producers
    }

    fn on_dependency_change(&self) {
        if self.destroyed.get() {
            return;
        }
        if !self.queued.replace(true) {
            let weak = self.self_weak.borrow().clone();
            with_default_scheduler(|s| {
                use crate::scheduler::Scheduler;
                s.enqueue(weak);
            });
        }
    }
}

impl WatchInner {
    pub(crate) fn take_queued(&self) -> bool {
        self.queued.replace(false)
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.set(false);
    }

    /// Actually invoke the callback under tracking, catching any panic and
    /// logging it rather than propagating — a watch callback failing must
    /// never take down the scheduler drain loop.
    pub(crate) fn run(self: &Rc<Self>) {
        if self.destroyed.get() {
            return;
        }
        let label = &self.label;
        let callback = &self.callback;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            graph::run_tracked(self, || (callback.borrow_mut())())
        }));
        self.run_count.set(self.run_count.get() + 1);
        if let Err(payload) = result {
            let err = graph::extract_reactive_error(payload);
            tracing::error!(id = %label, error = %err, "effect callback failed");
        }
    }

    pub(crate) fn destroy(&self) {
        self.destroyed.set(true);
        for edge in self.producers.borrow_mut().drain() {
            if let Some(producer) = edge.1.producer.upgrade() {
                producer.consumers_map().borrow_mut().remove(&self.id);
            }
        }
        self.queued.set(false);
        with_default_scheduler(|s| {
            use crate::scheduler::Scheduler;
            s.unregister(self.id);
        });
    }
}

/// A handle to a running watch. Dropping it does not stop the watch — use
/// [`EffectHandle::destroy`] for that, matching the explicit-disposal
/// pattern the teacher's `dispose_effect` uses.
pub struct EffectHandle {
    inner: Rc<WatchInner>,
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.inner.label)
            .field("run_count", &self.inner.run_count.get())
            .finish()
    }
}

impl EffectHandle {
    /// Detach the watch: it stops tracking and will never run again, and
    /// its edges to upstream producers are torn down immediately rather
    /// than waiting for lazy pruning.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Total number of times this watch's callback has actually run.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.get()
    }

    pub fn id(&self) -> &str {
        &self.inner.label
    }

    /// Number of live producers this watch currently depends on, for
    /// debugging/telemetry.
    pub fn producer_count(&self) -> usize {
        self.inner.producers.borrow().len()
    }
}

/// Registers `callback` to run once now — synchronously, so its first run
/// establishes the initial dependency set — and again via the scheduler
/// every time a tracked dependency subsequently changes (after the next
/// `flush`).
pub fn effect(callback: impl FnMut() + 'static) -> EffectHandle {
    effect_with_options(callback, EffectOptions::default())
}

/// [`effect`] with explicit options.
pub fn effect_with_options(callback: impl FnMut() + 'static, options: EffectOptions) -> EffectHandle {
    let id = graph::next_node_id();
    let label = options.id.unwrap_or_else(|| format!("watch-{id}"));
    let inner = Rc::new_cyclic(|weak: &Weak<WatchInner>| WatchInner {
        id,
        label,
        callback: RefCell::new(Box::new(callback)),
        tracking_version: Cell::new(0),
        producers: RefCell::new(FxHashMap::default()),
        queued: Cell::new(false),
        destroyed: Cell::new(false),
        run_count: Cell::new(0),
        self_weak: RefCell::new(weak.clone()),
    });
    with_default_scheduler(|s| {
        use crate::scheduler::Scheduler;
        s.register(id, Rc::downgrade(&inner));
    });
    inner.run();
    EffectHandle { inner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use crate::signal::WritableSignal;
    use std::cell::RefCell as StdRefCell;

    fn with_clean_scheduler(f: impl FnOnce()) {
        scheduler::reset();
        f();
        scheduler::reset();
    }

    #[test]
    fn effect_runs_immediately_then_on_flush() {
        with_clean_scheduler(|| {
            let s = WritableSignal::new(0);
            let seen = Rc::new(StdRefCell::new(Vec::new()));
            let seen2 = Rc::clone(&seen);
            let s2 = s.clone();
            let _handle = effect(move || {
                seen2.borrow_mut().push(s2.get());
            });
            assert_eq!(*seen.borrow(), vec![0]);

            s.set(1);
            s.set(2);
            scheduler::flush();
            assert_eq!(*seen.borrow(), vec![0, 2]);
        });
    }

    #[test]
    fn destroy_unregisters_from_scheduler_active_set() {
        with_clean_scheduler(|| {
            let before = scheduler::active_count();
            let handle = effect(move || {});
            assert_eq!(scheduler::active_count(), before + 1);
            handle.destroy();
            assert_eq!(scheduler::active_count(), before);
        });
    }

    #[test]
    fn destroyed_effect_does_not_run_again() {
        with_clean_scheduler(|| {
            let s = WritableSignal::new(0);
            let runs = Rc::new(StdRefCell::new(0));
            let runs2 = Rc::clone(&runs);
            let s2 = s.clone();
            let handle = effect(move || {
                *runs2.borrow_mut() += 1;
                let _ = s2.get();
            });
            assert_eq!(*runs.borrow(), 1);
            handle.destroy();
            s.set(1);
            scheduler::flush();
            assert_eq!(*runs.borrow(), 1);
        });
    }
}
