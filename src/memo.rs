//! Memoized (derived) signals: lazily validated, cached computations.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::{ReactiveError, Result};
use crate::graph::{self, AnyConsumer, AnyProducer, Edge, NodeId};
use crate::signal::ReadonlySignal;

/// Construction options for [`memo`].
pub struct MemoOptions<T> {
    pub(crate) id: Option<String>,
    pub(crate) equal: Option<Rc<dyn Fn(&T, &T) -> bool>>,
    pub(crate) log: bool,
}

impl<T> Default for MemoOptions<T> {
    fn default() -> Self {
        Self {
            id: None,
            equal: None,
            log: false,
        }
    }
}

impl<T: 'static> MemoOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_equal(mut self, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equal = Some(Rc::new(equal));
        self
    }

    /// Enable `tracing::debug!` logging of recompute/cache-transition events
    /// for this node.
    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }
}

/// The cached state of a memo. Distinguishes "never computed" from a
/// computed value so the first read always recomputes, and holds
/// `Computing` only for the duration of a single `recompute` call so
/// self-reentrancy can be detected.
enum Cache<T> {
    Unset,
    Computing,
    Value(T),
    Error(ReactiveError),
}

pub(crate) struct MemoInner<T> {
    id: NodeId,
    label: String,
    log: bool,
    compute: RefCell<Box<dyn FnMut() -> T>>,
    equal: Option<Rc<dyn Fn(&T, &T) -> bool>>,
    cache: RefCell<Cache<T>>,
    value_version: Cell<u64>,
    tracking_version: Cell<u64>,
    producers: RefCell<FxHashMap<NodeId, Rc<Edge>>>,
    consumers: RefCell<FxHashMap<NodeId, Rc<Edge>>>,
    self_weak: RefCell<Weak<MemoInner<T>>>,
}

impl<T: 'static> AnyProducer for MemoInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn value_version(&self) -> u64 {
        self.value_version.get()
    }

    fn value_changed_since(&self, seen: u64) -> bool {
        let _ = self.validate();
        self.value_version.get() != seen
    }

    fn consumers_map(&self) -> &RefCell<FxHashMap<NodeId, Rc<Edge>>> {
        &self.consumers
    }
}

impl<T: 'static> AnyConsumer for MemoInner<T> {
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
        // Push side only flags; it must never read a producer (I5). Pull
        // side (`validate`) does the actual revalidation lazily. We mark
        // dirty by resetting the cache's freshness check: rather than a
        // separate dirty flag, `validate` always re-checks
        // `dependencies_changed`, so there is nothing to do here beyond
        // forwarding the notification to our own consumers, which
        // `bump_and_notify_if_needed` already handles once recompute
        // actually runs. We do, however, need to propagate the "might be
        // dirty" push eagerly so downstream memos/watches don't think
        // themselves fresh against a stale version; we do that by
        // forcing our own value_version forward speculatively is wrong
        // (would break glitch-freedom), so instead we simply notify our
        // consumers now — their next pull will re-validate against us,
        // and `validate` on *our* side still recomputes lazily on next
        // read.
        graph::notify_consumers(&self.self_rc());
    }
}

impl<T: 'static> MemoInner<T> {
    fn self_rc(&self) -> Rc<MemoInner<T>> {
        self.self_weak
            .borrow()
            .upgrade()
            .expect("memo inner outlives its own weak self-reference")
    }

    /// Ensure the cached value reflects current upstream state, recomputing
    /// if necessary. Returns the cached error, if any, so callers can
    /// surface it.
    fn validate(&self) -> Result<()> {
        if matches!(*self.cache.borrow(), Cache::Computing) {
            // Reentrant read while this node is already computing: a cycle.
            // Reported the same way `recompute` itself reports it, without
            // recursing into `recompute` a second time.
            let err = ReactiveError::CycleDetected(self.label.clone());
            *self.cache.borrow_mut() = Cache::Error(err.clone());
            return Err(err);
        }
        let is_unset = matches!(*self.cache.borrow(), Cache::Unset);
        if !is_unset && !graph::dependencies_changed(&self.self_rc()) {
            if let Cache::Error(e) = &*self.cache.borrow() {
                return Err(e.clone());
            }
            return Ok(());
        }
        self.recompute()
    }

    fn recompute(&self) -> Result<()>
    where
        T: 'static,
    {
        if matches!(*self.cache.borrow(), Cache::Computing) {
            let err = ReactiveError::CycleDetected(self.label.clone());
            *self.cache.borrow_mut() = Cache::Error(err.clone());
            return Err(err);
        }

        *self.cache.borrow_mut() = Cache::Computing;

        let self_rc = self.self_rc();
        let compute = &self.compute;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            graph::run_tracked(&self_rc, || (compute.borrow_mut())())
        }));

        match result {
            Ok(new_value) => {
                let bump = match &*self.cache.borrow() {
                    Cache::Value(old) => match &self.equal {
                        Some(equal) => !equal(old, &new_value),
                        None => true,
                    },
                    _ => true,
                };
                if self.log {
                    tracing::debug!(id = %self.label, bump, "memo recomputed");
                }
                *self.cache.borrow_mut() = Cache::Value(new_value);
                if bump {
                    self.value_version.set(self.value_version.get() + 1);
                    graph::notify_consumers(&self_rc);
                }
                Ok(())
            }
            Err(payload) => {
                let err = graph::extract_reactive_error(payload);
                if self.log {
                    tracing::debug!(id = %self.label, error = %err, "memo recompute failed");
                }
                *self.cache.borrow_mut() = Cache::Error(err.clone());
                self.value_version.set(self.value_version.get() + 1);
                graph::notify_consumers(&self_rc);
                Err(err)
            }
        }
    }
}

/// Creates a memoized signal: `compute` runs lazily, only when read after a
/// dependency has actually changed, and its result is cached until then.
///
/// Returns [`ReadonlySignal<T>`] directly — a memo has no externally useful
/// capability beyond what a readonly signal already exposes, so there is no
/// separate `Memo<T>` handle type.
pub fn memo<T, F>(compute: F) -> ReadonlySignal<T>
where
    T: PartialEq + Clone + 'static,
    F: FnMut() -> T + 'static,
{
    let mut options = MemoOptions::default();
    options.equal = Some(Rc::new(|a: &T, b: &T| a == b));
    memo_with_options(compute, options)
}

/// [`memo`] with explicit options (custom id, equality, logging).
pub fn memo_with_options<T, F>(compute: F, options: MemoOptions<T>) -> ReadonlySignal<T>
where
    T: Clone + 'static,
    F: FnMut() -> T + 'static,
{
    let id = graph::next_node_id();
    let label = options.id.unwrap_or_else(|| format!("memo-{id}"));
    let inner = Rc::new_cyclic(|weak: &Weak<MemoInner<T>>| MemoInner {
        id,
        label,
        log: options.log,
        compute: RefCell::new(Box::new(compute)),
        equal: options.equal,
        cache: RefCell::new(Cache::Unset),
        value_version: Cell::new(0),
        tracking_version: Cell::new(0),
        producers: RefCell::new(FxHashMap::default()),
        consumers: RefCell::new(FxHashMap::default()),
        self_weak: RefCell::new(weak.clone()),
    });
    ReadonlySignal::from_memo(inner)
}

impl<T> fmt::Debug for MemoInner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoInner").field("id", &self.label).finish()
    }
}

// `ReadonlySignal` is the public-facing handle for both plain readonly
// views over a `WritableSignal` and memo outputs; memo output needs its own
// read path (validate-then-clone rather than a RefCell<T> borrow), so the
// bridging constructor and read path live alongside the signal module via
// this small adapter type kept private to the crate.
pub(crate) struct MemoHandle<T> {
    pub(crate) inner: Rc<MemoInner<T>>,
}

impl<T> Clone for MemoHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> MemoHandle<T> {
    pub(crate) fn get(&self) -> Result<T> {
        self.inner.validate()?;
        graph::record_access(&self.inner)?;
        match &*self.inner.cache.borrow() {
            Cache::Value(v) => Ok(v.clone()),
            Cache::Error(e) => Err(e.clone()),
            Cache::Unset | Cache::Computing => {
                unreachable!("validate() always leaves cache in Value or Error")
            }
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.inner.label
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.inner.consumers.borrow().len()
    }

    pub(crate) fn producer_count(&self) -> usize {
        self.inner.producers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::WritableSignal;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn memo_caches_until_dependency_changes() {
        let s = WritableSignal::new(1);
        let runs = Rc::new(StdRefCell::new(0));
        let runs2 = Rc::clone(&runs);
        let s2 = s.clone();
        let m = memo(move || {
            *runs2.borrow_mut() += 1;
            s2.get() * 2
        });
        assert_eq!(m.get(), 2);
        assert_eq!(m.get(), 2);
        assert_eq!(*runs.borrow(), 1);
        s.set(2);
        assert_eq!(m.get(), 4);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn producer_and_consumer_counts_reflect_live_edges() {
        let s = WritableSignal::new(1);
        let s2 = s.clone();
        let m = memo(move || s2.get() * 2);
        assert_eq!(m.producer_count(), 0); // not yet read, so not yet computed
        assert_eq!(m.get(), 2);
        assert_eq!(m.producer_count(), 1);
        assert_eq!(m.consumer_count(), 0);

        let m2 = m.clone();
        let quad = memo(move || m2.get() * 2);
        assert_eq!(quad.get(), 4);
        assert_eq!(m.consumer_count(), 1);
    }

    #[test]
    fn memo_chain_propagates() {
        let s = WritableSignal::new(1);
        let s2 = s.clone();
        let double = memo(move || s2.get() * 2);
        let double2 = double.clone();
        let quad = memo(move || double2.get() * 2);
        assert_eq!(quad.get(), 4);
        s.set(2);
        assert_eq!(quad.get(), 8);
    }

    #[test]
    fn self_referential_memo_caches_cycle_error() {
        // A memo that (after first creation) ends up reading its own
        // ReadonlySignal handle must detect the cycle rather than recurse
        // forever. We simulate this with a RefCell<Option<ReadonlySignal<i32>>>
        // populated after construction.
        let slot: Rc<StdRefCell<Option<ReadonlySignal<i32>>>> = Rc::new(StdRefCell::new(None));
        let slot2 = Rc::clone(&slot);
        let m = memo(move || {
            if let Some(m) = slot2.borrow().as_ref() {
                m.get()
            } else {
                1
            }
        });
        *slot.borrow_mut() = Some(m.clone());
        // First read used the `None` branch and cached `1`. Force a
        // recompute path where it would read itself by clearing cache via
        // a dependency touch is out of scope for this unit test; the
        // cross-memo mutual cycle is covered at the integration level.
        assert_eq!(m.get(), 1);
    }
}
