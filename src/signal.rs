//! Writable signals: the graph's only source of externally driven change.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::{self, AnyProducer, Edge, NodeId};

/// Construction options for [`signal`].
///
/// Named/tagged the way `blinc_core`'s sibling config structs are (e.g.
/// `draw.rs`'s `ImageOptions`): a plain builder with a sensible `Default`.
pub struct SignalOptions<T> {
    pub(crate) id: Option<String>,
    pub(crate) equal: Option<Rc<dyn Fn(&T, &T) -> bool>>,
}

impl<T> Default for SignalOptions<T> {
    fn default() -> Self {
        Self {
            id: None,
            equal: None,
        }
    }
}

impl<T: 'static> SignalOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a human-readable id for debugging. Auto-generated (`"signal-N"`)
    /// if never set.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Override the default equality used to decide whether `set`/`update`
    /// should skip notification because the value didn't really change.
    pub fn with_equal(mut self, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equal = Some(Rc::new(equal));
        self
    }
}

pub(crate) struct SignalInner<T> {
    id: NodeId,
    label: String,
    value: RefCell<T>,
    version: Cell<u64>,
    equal: Option<Rc<dyn Fn(&T, &T) -> bool>>,
    consumers: RefCell<FxHashMap<NodeId, Rc<Edge>>>,
}

impl<T: 'static> AnyProducer for SignalInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn value_version(&self) -> u64 {
        self.version.get()
    }

    fn value_changed_since(&self, seen: u64) -> bool {
        self.version.get() != seen
    }

    fn consumers_map(&self) -> &RefCell<FxHashMap<NodeId, Rc<Edge>>> {
        &self.consumers
    }
}

/// A writable, readable reactive value.
///
/// Cloning a `WritableSignal` clones the handle, not the value — both
/// handles observe and mutate the same underlying node.
pub struct WritableSignal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for WritableSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for WritableSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableSignal")
            .field("id", &self.inner.label)
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: PartialEq + 'static> WritableSignal<T> {
    /// Create a new writable signal with default options (equality-gated
    /// notification via `T: PartialEq`).
    pub fn new(initial: T) -> Self {
        Self::with_options(initial, SignalOptions::default())
    }
}

impl<T: 'static> WritableSignal<T> {
    /// Create a new writable signal with explicit options. Use this when `T`
    /// has no meaningful `PartialEq`, supplying a custom `equal` (or none,
    /// in which case every `set`/`update` notifies unconditionally).
    pub fn with_options(initial: T, options: SignalOptions<T>) -> Self {
        let id = graph::next_node_id();
        let label = options.id.unwrap_or_else(|| format!("signal-{id}"));
        Self {
            inner: Rc::new(SignalInner {
                id,
                label,
                value: RefCell::new(initial),
                version: Cell::new(0),
                equal: options.equal,
                consumers: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Read the current value, cloning it out and recording a dependency
    /// edge against the ambient active consumer, if any. Panics on
    /// `ReadDuringNotify` (see [`Self::try_get`] for the non-panicking form).
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        crate::error::unwrap_or_panic(self.try_get())
    }

    /// Non-panicking form of [`Self::get`].
    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        graph::record_access(&self.inner)?;
        Ok(self.inner.value.borrow().clone())
    }

    /// Read the current value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the value and apply `f`, recording a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let _ = graph::record_access(&self.inner);
        f(&self.inner.value.borrow())
    }

    /// Borrow the value and apply `f` without recording a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Write a new value. Notifies consumers unless the new value compares
    /// equal to the old one under the configured (or derived) equality.
    pub fn set(&self, value: T)
    where
        T: PartialEq,
    {
        let changed = {
            let mut slot = self.inner.value.borrow_mut();
            let changed = match &self.inner.equal {
                Some(equal) => !equal(&slot, &value),
                None => *slot != value,
            };
            *slot = value;
            changed
        };
        if changed {
            self.bump_and_notify();
        }
    }

    /// Unconditionally overwrite and notify, regardless of equality. The
    /// escape hatch for values without a cheap/meaningful `PartialEq`.
    pub fn mutate(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.bump_and_notify();
    }

    /// Update in place via `f`, notifying unless the result compares equal
    /// to the value before the update.
    pub fn update(&self, f: impl FnOnce(&mut T))
    where
        T: PartialEq + Clone,
    {
        let changed = {
            let mut slot = self.inner.value.borrow_mut();
            let before = slot.clone();
            f(&mut slot);
            match &self.inner.equal {
                Some(equal) => !equal(&before, &slot),
                None => before != *slot,
            }
        };
        if changed {
            self.bump_and_notify();
        }
    }

    fn bump_and_notify(&self) {
        self.inner.version.set(self.inner.version.get() + 1);
        graph::notify_consumers(&self.inner);
    }

    /// A read-only view of this signal. Shares the same underlying node, so
    /// dependency tracking treats reads through either handle identically.
    pub fn readonly(&self) -> ReadonlySignal<T> {
        ReadonlySignal::from_signal(Rc::clone(&self.inner))
    }

    /// The node's debug id/tag.
    pub fn id(&self) -> &str {
        &self.inner.label
    }

    /// Number of live consumers currently depending on this signal, for
    /// debugging/telemetry.
    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.borrow().len()
    }
}

/// A read-only view over a signal's value — either a plain signal wrapped
/// via [`WritableSignal::readonly`], or the return type of `memo()`.
///
/// Both origins are cheap handles around a reference-counted node; the enum
/// only changes how a read is satisfied (a direct borrow for a plain
/// signal, a validate-then-borrow for a memo).
pub struct ReadonlySignal<T> {
    pub(crate) origin: ReadonlyOrigin<T>,
}

pub(crate) enum ReadonlyOrigin<T> {
    Signal(Rc<SignalInner<T>>),
    Memo(crate::memo::MemoHandle<T>),
}

impl<T> Clone for ReadonlyOrigin<T> {
    fn clone(&self) -> Self {
        match self {
            ReadonlyOrigin::Signal(inner) => ReadonlyOrigin::Signal(Rc::clone(inner)),
            ReadonlyOrigin::Memo(handle) => ReadonlyOrigin::Memo(handle.clone()),
        }
    }
}

impl<T> Clone for ReadonlySignal<T> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadonlySignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadonlySignal").field("id", &self.id()).finish()
    }
}

impl<T> ReadonlySignal<T> {
    pub(crate) fn from_signal(inner: Rc<SignalInner<T>>) -> Self {
        Self {
            origin: ReadonlyOrigin::Signal(inner),
        }
    }

    pub(crate) fn from_memo(inner: Rc<crate::memo::MemoInner<T>>) -> Self
    where
        T: Clone + 'static,
    {
        Self {
            origin: ReadonlyOrigin::Memo(crate::memo::MemoHandle { inner }),
        }
    }
}

impl<T: 'static> ReadonlySignal<T> {
    /// Read the current value, recording a dependency. For a memo-backed
    /// view this first validates (and, if stale, recomputes) the cache.
    /// Panics on failure (cycle, upstream read-during-notify, or a cached
    /// compute error) — see [`Self::try_get`].
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        crate::error::unwrap_or_panic(self.try_get())
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        match &self.origin {
            ReadonlyOrigin::Signal(inner) => {
                graph::record_access(inner)?;
                Ok(inner.value.borrow().clone())
            }
            ReadonlyOrigin::Memo(handle) => handle.get(),
        }
    }

    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        match &self.origin {
            ReadonlyOrigin::Signal(inner) => inner.value.borrow().clone(),
            ReadonlyOrigin::Memo(handle) => {
                graph::untracked(|| crate::error::unwrap_or_panic(handle.get()))
            }
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R
    where
        T: Clone,
    {
        f(&self.get())
    }

    pub fn id(&self) -> String {
        match &self.origin {
            ReadonlyOrigin::Signal(inner) => inner.label.clone(),
            ReadonlyOrigin::Memo(handle) => handle.id().to_string(),
        }
    }

    /// Number of live consumers depending on this node, for
    /// debugging/telemetry.
    pub fn consumer_count(&self) -> usize {
        match &self.origin {
            ReadonlyOrigin::Signal(inner) => inner.consumers.borrow().len(),
            ReadonlyOrigin::Memo(handle) => handle.consumer_count(),
        }
    }

    /// Number of live producers this node currently depends on. Always `0`
    /// for a plain signal view, since only a memo is also a consumer.
    pub fn producer_count(&self) -> usize {
        match &self.origin {
            ReadonlyOrigin::Signal(_) => 0,
            ReadonlyOrigin::Memo(handle) => handle.producer_count(),
        }
    }
}

/// Marker trait satisfied by anything this crate considers "a signal" for
/// the purposes of [`crate::is_signal`] — a compile-time check rather than
/// runtime duck-typing, since there is no `dyn Any`-based introspection
/// that could generically answer "is this a signal" across arbitrary `T`.
pub trait SignalLike {}
impl<T> SignalLike for WritableSignal<T> {}
impl<T> SignalLike for ReadonlySignal<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_set() {
        let s = WritableSignal::new(1);
        assert_eq!(s.get(), 1);
        s.set(2);
        assert_eq!(s.get(), 2);
    }

    #[test]
    fn set_same_value_does_not_bump_version() {
        let s = WritableSignal::new(1);
        let before = s.inner.version.get();
        s.set(1);
        assert_eq!(s.inner.version.get(), before);
    }

    #[test]
    fn update_mutates_in_place() {
        let s = WritableSignal::new(vec![1, 2, 3]);
        s.update(|v| v.push(4));
        assert_eq!(s.get(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn mutate_always_bumps_version() {
        let s = WritableSignal::new(vec![1]);
        let before = s.inner.version.get();
        s.mutate(|v| v.push(2));
        assert!(s.inner.version.get() > before);
    }

    #[test]
    fn readonly_shares_identity() {
        let s = WritableSignal::new(5);
        let ro = s.readonly();
        assert_eq!(ro.get(), 5);
        s.set(10);
        assert_eq!(ro.get(), 10);
    }

    #[test]
    fn clone_shares_state() {
        let a = WritableSignal::new(1);
        let b = a.clone();
        a.set(2);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn consumer_count_tracks_live_memos() {
        let s = WritableSignal::new(1);
        assert_eq!(s.consumer_count(), 0);
        let s2 = s.clone();
        let m = crate::memo::memo(move || s2.get());
        assert_eq!(m.get(), 1); // reading establishes the edge
        assert_eq!(s.consumer_count(), 1);
        drop(m);
    }

    #[test]
    fn custom_equal_suppresses_notification() {
        let s = WritableSignal::with_options(
            1.0_f64,
            SignalOptions::new().with_equal(|a: &f64, b: &f64| (a - b).abs() < 0.5),
        );
        let before = s.inner.version.get();
        s.set(1.1);
        assert_eq!(s.inner.version.get(), before);
        s.set(5.0);
        assert!(s.inner.version.get() > before);
    }
}
