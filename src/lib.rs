//! Fine-grained reactive value graph.
//!
//! This crate provides the primitives underneath reactive UI and
//! incremental-computation frameworks: writable signals, memoized
//! (derived) signals, and watches (effects), connected by a graph of
//! producer/consumer dependency edges with push-based invalidation and
//! pull-based (lazy) revalidation.
//!
//! # Example
//!
//! ```rust
//! use reactive_graph::{signal, memo, effect, flush};
//!
//! let count = signal(1);
//! let count2 = count.clone();
//! let doubled = memo(move || count2.get() * 2);
//!
//! let doubled2 = doubled.clone();
//! let _watch = effect(move || {
//!     println!("doubled is now: {}", doubled2.get());
//! });
//!
//! count.set(5);
//! flush();
//! assert_eq!(doubled.get(), 10);
//! ```

mod error;
mod graph;
mod memo;
mod promise;
mod scheduler;
mod signal;
mod watch;

pub use error::{ReactiveError, Result};
pub use graph::untracked;
pub use memo::{memo, memo_with_options, MemoOptions};
pub use promise::{from_promise, PromiseOptions, PromiseState};
pub use scheduler::{active_count, flush, pending_count, reset, DeferredScheduler, Scheduler};
pub use signal::{ReadonlySignal, SignalLike, SignalOptions, WritableSignal};
pub use watch::{effect, effect_with_options, EffectHandle, EffectOptions};

/// Create a new writable signal. Equivalent to [`WritableSignal::new`],
/// exposed at crate level as the public façade's entry point.
pub fn signal<T: PartialEq + 'static>(initial: T) -> WritableSignal<T> {
    WritableSignal::new(initial)
}

/// Returns `true` for any type this crate considers a reactive value
/// handle — a writable signal or a readonly/memo view. Implemented as a
/// compile-time bound check (`T: SignalLike`) rather than runtime
/// introspection, since nothing at runtime distinguishes "a signal handle"
/// from any other `Rc`-backed type without that static guarantee.
pub fn is_signal<T: SignalLike>(_value: &T) -> bool {
    true
}
