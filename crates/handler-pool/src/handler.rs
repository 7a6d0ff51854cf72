//! Handler and factory traits.

use std::future::Future;

use async_trait::async_trait;

use crate::completion::Completion;
use crate::notifier::Notifier;

/// Creation ordinal of a handler within its pool. The first handler is `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct HandlerId(usize);

impl HandlerId {
    pub fn new(ordinal: usize) -> Self {
        Self(ordinal)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A reusable asynchronous worker.
///
/// The pool calls `handle` with one request at a time. The handler reports
/// to its caller through `notifier` and must eventually call
/// [`Completion::complete`] exactly once to return itself to the pool; until
/// then it counts as busy. Completion may happen before, during or after the
/// returned future finishes.
#[async_trait]
pub trait Handler<P: Send + 'static, E: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, notifier: Notifier<E>, done: Completion, payload: P);
}

#[async_trait]
impl<P, E, F, Fut> Handler<P, E> for F
where
    P: Send + 'static,
    E: Send + 'static,
    F: Fn(Notifier<E>, Completion, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, notifier: Notifier<E>, done: Completion, payload: P) {
        (self)(notifier, done, payload).await
    }
}

/// Produces handlers on demand. Called at most `limit` times per pool, only
/// when a request is waiting and no idle handler exists.
///
/// The factory runs while the pool's state is locked: it must not dispatch
/// into the same pool.
pub trait HandlerFactory<H>: Send + 'static {
    fn create(&mut self) -> anyhow::Result<H>;
}

impl<H, F> HandlerFactory<H> for F
where
    F: FnMut() -> anyhow::Result<H> + Send + 'static,
{
    fn create(&mut self) -> anyhow::Result<H> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_id_display_and_index() {
        let id = HandlerId::new(2);
        assert_eq!(id.index(), 2);
        assert_eq!(id.to_string(), "handler-2");
        assert!(HandlerId::new(0) < id);
    }

    #[test]
    fn closures_are_factories() {
        let mut made = 0;
        let mut factory = move || -> anyhow::Result<usize> {
            made += 1;
            Ok(made)
        };

        assert_eq!(<_ as HandlerFactory<usize>>::create(&mut factory).unwrap(), 1);
        assert_eq!(<_ as HandlerFactory<usize>>::create(&mut factory).unwrap(), 2);
    }
}
