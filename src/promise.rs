//! Promise adapter: a two-line bridge from a one-shot async result into a
//! readonly signal, with no dependency on any particular async runtime.

use std::fmt;

use crate::memo::memo_with_options;
use crate::signal::{ReadonlySignal, WritableSignal};

/// The state of an adapted promise/future, observed through a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState<T, E> {
    Pending,
    Ready(T),
    Failed(E),
}

/// Options for [`from_promise`] — currently just an id for debugging,
/// following the same builder shape as the other node option structs.
#[derive(Default)]
pub struct PromiseOptions {
    pub(crate) id: Option<String>,
}

impl PromiseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Adapts a one-shot asynchronous result into a [`ReadonlySignal`] over its
/// [`PromiseState`]. `register` is called once, immediately, with a
/// completion callback; whatever scheduled the real async work (a runtime's
/// spawn, a platform callback, a test harness) should invoke that callback
/// exactly once when the result is ready.
///
/// This performs no polling and owns no runtime — it is the same shape as
/// the teacher's other "bridge an external event into the graph" adapters
/// (e.g. `native_bridge.rs`'s callback registration), just specialized to a
/// one-shot result instead of a repeating event stream.
pub fn from_promise<T, E>(
    register: impl FnOnce(Box<dyn FnOnce(Result<T, E>)>),
) -> ReadonlySignal<PromiseState<T, E>>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    from_promise_with_options(register, PromiseOptions::default())
}

/// [`from_promise`] with explicit options.
pub fn from_promise_with_options<T, E>(
    register: impl FnOnce(Box<dyn FnOnce(Result<T, E>)>),
    options: PromiseOptions,
) -> ReadonlySignal<PromiseState<T, E>>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    let id = options
        .id
        .unwrap_or_else(|| format!("promise-{}", crate::graph::next_node_id()));

    let state = WritableSignal::with_options(
        PromiseState::Pending,
        crate::signal::SignalOptions::new().with_id(id.clone()),
    );

    let settle = state.clone();
    register(Box::new(move |result: Result<T, E>| match result {
        Ok(value) => settle.set(PromiseState::Ready(value)),
        Err(error) => settle.set(PromiseState::Failed(error)),
    }));

    // A memo rather than `state.readonly()` directly so a future version can
    // layer transformation without changing the public return type; today it
    // is a pure passthrough.
    let read = state.clone();
    memo_with_options(
        move || read.get(),
        crate::memo::MemoOptions::new()
            .with_id(id)
            .with_equal(|a: &PromiseState<T, E>, b: &PromiseState<T, E>| a == b),
    )
}

impl<T, E> PromiseState<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            PromiseState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn failed(&self) -> Option<&E> {
        match self {
            PromiseState::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Display for PromiseState<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseState::Pending => write!(f, "pending"),
            PromiseState::Ready(value) => write!(f, "ready({value:?})"),
            PromiseState::Failed(error) => write!(f, "failed({error:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pending_and_settles_on_callback() {
        let mut deferred: Option<Box<dyn FnOnce(Result<i32, String>)>> = None;
        let promise = from_promise::<i32, String>(|complete| {
            deferred = Some(complete);
        });
        assert_eq!(promise.get(), PromiseState::Pending);

        (deferred.take().unwrap())(Ok(42));
        assert_eq!(promise.get(), PromiseState::Ready(42));
    }

    #[test]
    fn settles_to_failed_on_error() {
        let mut deferred: Option<Box<dyn FnOnce(Result<i32, String>)>> = None;
        let promise = from_promise::<i32, String>(|complete| {
            deferred = Some(complete);
        });
        (deferred.take().unwrap())(Err("boom".to_string()));
        assert_eq!(promise.get(), PromiseState::Failed("boom".to_string()));
    }
}
