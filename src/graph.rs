//! Graph core: the producer/consumer bookkeeping shared by every node variant.
//!
//! A reactive node is never owned by a central arena. Producers and
//! consumers hold each other only through [`Edge`]s, which store weak
//! back-references on both ends (I4 in the design notes) — a signal that
//! nothing external still holds is dropped like any other `Rc`, and any
//! edge still pointing at it is pruned the next time something tries to
//! use it.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{ReactiveError, Result};

/// Dense, monotonically assigned node identifier.
///
/// Ids are never reused: the ambient `next_id` counter only grows, so a
/// stale [`NodeId`] can never alias a live, unrelated node the way a reused
/// arena slot could.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
    static ACTIVE_CONSUMER: RefCell<Option<Weak<dyn AnyConsumer>>> = const { RefCell::new(None) };
    static NOTIFYING: Cell<bool> = const { Cell::new(false) };
}

/// Allocate the next dense node id. Internal; node constructors call this
/// once and stash the result.
pub(crate) fn next_node_id() -> NodeId {
    NEXT_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        NodeId(id)
    })
}

/// A producer: anything that can be read and whose output may change.
///
/// Implemented by the inner state of writable signals and memos. Object-safe
/// so that edges can hold a type-erased `Weak<dyn AnyProducer>` regardless of
/// the producer's value type.
pub(crate) trait AnyProducer {
    fn node_id(&self) -> NodeId;
    fn value_version(&self) -> u64;
    /// Ask the producer to validate itself (recomputing if it is a lazily
    /// validated memo) and report whether its `value_version` now differs
    /// from `seen`. For a writable signal this is just a version compare.
    fn value_changed_since(&self, seen: u64) -> bool;
    fn consumers_map(&self) -> &RefCell<FxHashMap<NodeId, Rc<Edge>>>;
    /// Number of live consumer edges, for debugging/telemetry. Not pruned on
    /// demand — a dead edge still counts until the next traversal notices it.
    fn consumer_count(&self) -> usize {
        self.consumers_map().borrow().len()
    }
}

/// A consumer: anything that tracks dependencies during a computation.
///
/// Implemented by the inner state of memos (which are also producers) and
/// watches.
pub(crate) trait AnyConsumer {
    fn node_id(&self) -> NodeId;
    fn tracking_version(&self) -> u64;
    /// Begin a new tracking pass: bump `tracking_version` and return the new
    /// value. Producers touched before this call keep stale
    /// `consumer_version_seen` markers and are pruned lazily (I2).
    fn begin_tracking_pass(&self) -> u64;
    fn producers_map(&self) -> &RefCell<FxHashMap<NodeId, Rc<Edge>>>;
    /// Number of live producer edges, for debugging/telemetry.
    fn producer_count(&self) -> usize {
        self.producers_map().borrow().len()
    }
    /// Push-side notification: a producer this consumer depends on may have
    /// changed. Must never read a signal (I5) — only flag state and
    /// schedule further work.
    fn on_dependency_change(&self);
}

/// A dependency edge, shared by `Rc` between the producer's `consumers` map
/// and the consumer's `producers` map so both sides observe the same
/// version stamps without re-syncing them.
pub(crate) struct Edge {
    pub(crate) producer_id: NodeId,
    pub(crate) consumer_id: NodeId,
    pub(crate) producer: Weak<dyn AnyProducer>,
    pub(crate) consumer: Weak<dyn AnyConsumer>,
    pub(crate) producer_version_seen: Cell<u64>,
    pub(crate) consumer_version_seen: Cell<u64>,
}

/// Restores the ambient `active_consumer` slot on every exit path, including
/// unwinding — this is the "scoped acquisition with guaranteed restoration"
/// §5 requires for the ambient globals.
struct RestoreActiveConsumer(Option<Weak<dyn AnyConsumer>>);

impl Drop for RestoreActiveConsumer {
    fn drop(&mut self) {
        ACTIVE_CONSUMER.with(|slot| *slot.borrow_mut() = self.0.take());
    }
}

fn check_not_notifying() -> Result<()> {
    if NOTIFYING.with(Cell::get) {
        Err(ReactiveError::ReadDuringNotify)
    } else {
        Ok(())
    }
}

/// Producer-side kernel operation: called from a producer's read path after
/// any internal validation. Records a dependency edge against the ambient
/// active consumer, if any.
pub(crate) fn record_access<P>(producer: &Rc<P>) -> Result<()>
where
    P: AnyProducer + 'static,
{
    check_not_notifying()?;

    let active = ACTIVE_CONSUMER.with(|slot| slot.borrow().clone());
    let Some(consumer_weak) = active else {
        return Ok(());
    };
    let Some(consumer) = consumer_weak.upgrade() else {
        return Ok(());
    };

    let producer_id = producer.node_id();
    let consumer_id = consumer.node_id();

    let edge = {
        let mut producers = consumer.producers_map().borrow_mut();
        producers
            .entry(producer_id)
            .or_insert_with(|| {
                Rc::new(Edge {
                    producer_id,
                    consumer_id,
                    producer: Rc::downgrade(producer) as Weak<dyn AnyProducer>,
                    consumer: consumer_weak.clone(),
                    producer_version_seen: Cell::new(0),
                    consumer_version_seen: Cell::new(0),
                })
            })
            .clone()
    };

    edge.producer_version_seen.set(producer.value_version());
    edge.consumer_version_seen.set(consumer.tracking_version());

    producer
        .consumers_map()
        .borrow_mut()
        .entry(consumer_id)
        .or_insert(edge);

    Ok(())
}

/// Producer-side kernel operation: called after a producer's `value_version`
/// bumps. Walks a snapshot of its consumers, pruning dead or stale edges and
/// pushing `on_dependency_change` to the rest.
pub(crate) fn notify_consumers<P>(producer: &Rc<P>)
where
    P: AnyProducer + 'static,
{
    NOTIFYING.with(|n| n.set(true));
    struct RestoreNotifying;
    impl Drop for RestoreNotifying {
        fn drop(&mut self) {
            NOTIFYING.with(|n| n.set(false));
        }
    }
    let _restore = RestoreNotifying;

    let snapshot: Vec<Rc<Edge>> = producer.consumers_map().borrow().values().cloned().collect();

    for edge in snapshot {
        match edge.consumer.upgrade() {
            None => {
                producer.consumers_map().borrow_mut().remove(&edge.consumer_id);
            }
            Some(consumer) => {
                if edge.consumer_version_seen.get() != consumer.tracking_version() {
                    producer.consumers_map().borrow_mut().remove(&edge.consumer_id);
                    consumer.producers_map().borrow_mut().remove(&edge.producer_id);
                    continue;
                }
                consumer.on_dependency_change();
            }
        }
    }
}

/// Consumer-side kernel operation, used during pull-based revalidation: has
/// any producer this consumer depends on actually changed since last seen?
/// Short-circuits (and stops revalidating the rest) on the first `true`, per
/// spec.
pub(crate) fn dependencies_changed<C>(consumer: &Rc<C>) -> bool
where
    C: AnyConsumer + 'static,
{
    let snapshot: Vec<Rc<Edge>> = consumer.producers_map().borrow().values().cloned().collect();

    for edge in snapshot {
        match edge.producer.upgrade() {
            None => {
                consumer.producers_map().borrow_mut().remove(&edge.producer_id);
                continue;
            }
            Some(producer) => {
                if edge.consumer_version_seen.get() != consumer.tracking_version() {
                    consumer.producers_map().borrow_mut().remove(&edge.producer_id);
                    producer.consumers_map().borrow_mut().remove(&edge.consumer_id);
                    continue;
                }
                if producer.value_changed_since(edge.producer_version_seen.get()) {
                    return true;
                }
            }
        }
    }
    false
}

/// Runs `f` as a tracked computation for `consumer`: bumps its
/// `tracking_version`, swaps it into the ambient active-consumer slot for
/// the duration, and restores the previous slot on every exit path
/// (including a panic unwinding through `f`).
pub(crate) fn run_tracked<C, F, R>(consumer: &Rc<C>, f: F) -> R
where
    C: AnyConsumer + 'static,
    F: FnOnce() -> R,
{
    consumer.begin_tracking_pass();
    let weak: Weak<dyn AnyConsumer> = Rc::downgrade(consumer);
    let prev = ACTIVE_CONSUMER.with(|slot| slot.replace(Some(weak)));
    let _restore = RestoreActiveConsumer(prev);
    f()
}

/// Runs `f` with dependency tracking suspended: the ambient active consumer
/// is swapped to `None` for the duration and restored on every exit path.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let prev = ACTIVE_CONSUMER.with(|slot| slot.replace(None));
    let _restore = RestoreActiveConsumer(prev);
    f()
}

/// Extracts a [`ReactiveError`] from a caught panic payload. If the panic
/// carries a `ReactiveError` itself (the mechanism `get()` uses to propagate
/// `try_get()` failures across a compute-closure boundary as a Rust panic),
/// that exact error is reused; otherwise the payload's message is wrapped as
/// [`ReactiveError::UserComputeFailure`].
pub(crate) fn extract_reactive_error(payload: Box<dyn std::any::Any + Send>) -> ReactiveError {
    match payload.downcast::<ReactiveError>() {
        Ok(err) => *err,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "compute function panicked with a non-string payload".to_string()
            };
            ReactiveError::UserComputeFailure(message.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_dense_and_monotonic() {
        let a = next_node_id();
        let b = next_node_id();
        let c = next_node_id();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn untracked_restores_previous_observer_on_panic() {
        // No active consumer before, none after, even though `f` panics.
        let result = std::panic::catch_unwind(|| {
            untracked(|| {
                panic!("boom");
            })
        });
        assert!(result.is_err());
        // If the ambient slot were left clobbered, a later tracked read
        // would wrongly attach to a dangling consumer; we can't observe the
        // thread_local directly from here, but a second untracked call
        // completing normally is a reasonable proxy that state is sane.
        assert_eq!(untracked(|| 1 + 1), 2);
    }
}
