//! Pool state and the scheduling decision.
//!
//! Pure bookkeeping: no locking and no task spawning. The pool owns one
//! `PoolState` behind its mutex and turns each [`Assignment`] into a spawned
//! handler invocation.
//!
//! Request removal is from the tail of the queue, the same end requests are
//! appended to. While handlers are available the queue never holds more than
//! the request just added, so this only shows under overload: once every
//! handler is busy and the budget is spent, the newest waiting request is
//! served first.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::PoolError;
use crate::handler::{HandlerFactory, HandlerId};
use crate::notifier::{CallId, Notifier};
use crate::stats::PoolStats;

/// A dispatched call waiting for a handler.
pub(crate) struct CallRequest<P, E> {
    pub(crate) notifier: Notifier<E>,
    pub(crate) payload: P,
}

impl<P, E> CallRequest<P, E> {
    pub(crate) fn new(notifier: Notifier<E>, payload: P) -> Self {
        Self { notifier, payload }
    }

    pub(crate) fn call_id(&self) -> CallId {
        self.notifier.call_id()
    }
}

/// A request bound to the handler that will serve it.
pub(crate) struct Assignment<H, P, E> {
    pub(crate) handler_id: HandlerId,
    pub(crate) handler: Arc<H>,
    pub(crate) request: CallRequest<P, E>,
    /// True when the handler was created for this request rather than reused.
    pub(crate) created: bool,
}

pub(crate) struct PoolState<H, P, E> {
    limit: usize,
    /// Remaining creations. Spent only once the factory has returned a handler.
    budget: usize,
    /// Every handler created so far, indexed by `HandlerId`.
    handlers: Vec<Arc<H>>,
    /// Returned handlers, longest-idle first.
    idle: VecDeque<HandlerId>,
    queue: Vec<CallRequest<P, E>>,
}

impl<H, P, E> PoolState<H, P, E> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            budget: limit,
            handlers: Vec::new(),
            idle: VecDeque::new(),
            queue: Vec::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, request: CallRequest<P, E>) {
        self.queue.push(request);
    }

    /// Remove a still-queued request. Used to back out a dispatch whose
    /// scheduling pass failed.
    pub(crate) fn withdraw(&mut self, call: CallId) -> Option<CallRequest<P, E>> {
        let pos = self.queue.iter().rposition(|r| r.call_id() == call)?;
        Some(self.queue.remove(pos))
    }

    /// Put a handler back in the idle area.
    pub(crate) fn release(&mut self, handler: HandlerId) {
        debug_assert!(
            handler.index() < self.handlers.len(),
            "released a handler this pool never created"
        );
        debug_assert!(
            !self.idle.contains(&handler),
            "released a handler that is already idle"
        );
        self.idle.push_back(handler);
    }

    /// One scheduling pass: reuse the longest-idle handler, else create one
    /// if budget remains, else leave the queue alone.
    ///
    /// A failed or panicking creation spends no budget and leaves the request queued.
    pub(crate) fn next_assignment<F>(
        &mut self,
        factory: &mut F,
    ) -> Result<Option<Assignment<H, P, E>>, PoolError>
    where
        F: HandlerFactory<H> + ?Sized,
    {
        if self.queue.is_empty() {
            return Ok(None);
        }

        if let Some(handler_id) = self.idle.pop_front() {
            let Some(request) = self.queue.pop() else {
                self.idle.push_front(handler_id);
                return Ok(None);
            };
            return Ok(Some(Assignment {
                handler_id,
                handler: Arc::clone(&self.handlers[handler_id.index()]),
                request,
                created: false,
            }));
        }

        if self.budget == 0 {
            return Ok(None);
        }

        let handler = Arc::new(create(factory)?);
        self.budget -= 1;

        let handler_id = HandlerId::new(self.handlers.len());
        self.handlers.push(Arc::clone(&handler));

        let Some(request) = self.queue.pop() else {
            // Unreachable: the queue was checked above and the factory cannot touch it.
            self.idle.push_back(handler_id);
            return Ok(None);
        };

        Ok(Some(Assignment {
            handler_id,
            handler,
            request,
            created: true,
        }))
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let created = self.handlers.len();
        PoolStats {
            limit: self.limit,
            budget: self.budget,
            created,
            busy: created - self.idle.len(),
            idle: self.idle.len(),
            queued: self.queue.len(),
        }
    }
}

/// Run the factory once. A panic is reported as a factory error so it never
/// unwinds through the pool lock.
fn create<H, F>(factory: &mut F) -> Result<H, PoolError>
where
    F: HandlerFactory<H> + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(|| factory.create())) {
        Ok(result) => result.map_err(PoolError::factory),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(reason = %reason, "Handler factory panicked");
            Err(PoolError::factory(anyhow::anyhow!("panicked: {reason}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type State = PoolState<&'static str, &'static str, ()>;

    fn request(payload: &'static str) -> CallRequest<&'static str, ()> {
        CallRequest::new(Notifier::new(), payload)
    }

    fn names() -> impl FnMut() -> anyhow::Result<&'static str> + Send + 'static {
        let mut next = ["h0", "h1", "h2", "h3"].into_iter();
        move || next.next().ok_or_else(|| anyhow::anyhow!("out of names"))
    }

    fn assign(
        state: &mut State,
        factory: &mut dyn HandlerFactory<&'static str>,
    ) -> Option<(usize, &'static str, bool)> {
        state
            .next_assignment(factory)
            .unwrap()
            .map(|a| (a.handler_id.index(), a.request.payload, a.created))
    }

    #[test]
    fn empty_queue_does_nothing() {
        let mut state = State::new(2);
        let mut factory = || -> anyhow::Result<&'static str> {
            panic!("factory called with nothing queued");
        };

        assert!(assign(&mut state, &mut factory).is_none());
        assert_eq!(state.stats().created, 0);
    }

    #[test]
    fn creates_lazily_up_to_limit() {
        let mut state = State::new(2);
        let mut factory = names();

        state.enqueue(request("a"));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "a", true)));
        state.enqueue(request("b"));
        assert_eq!(assign(&mut state, &mut factory), Some((1, "b", true)));
        state.enqueue(request("c"));
        assert_eq!(assign(&mut state, &mut factory), None);

        let stats = state.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.busy, 2);
        assert_eq!(stats.queued, 1);
    }

    #[test]
    fn idle_handler_is_reused_before_creating() {
        let mut state = State::new(3);
        let mut factory = names();

        state.enqueue(request("a"));
        assign(&mut state, &mut factory);
        state.release(HandlerId::new(0));

        state.enqueue(request("b"));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "b", false)));
        assert_eq!(state.stats().created, 1);
    }

    #[test]
    fn idle_area_is_first_returned_first_reused() {
        let mut state = State::new(3);
        let mut factory = names();

        for payload in ["a", "b", "c"] {
            state.enqueue(request(payload));
            assign(&mut state, &mut factory);
        }
        state.release(HandlerId::new(2));
        state.release(HandlerId::new(0));

        state.enqueue(request("d"));
        assert_eq!(assign(&mut state, &mut factory), Some((2, "d", false)));
        state.enqueue(request("e"));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "e", false)));
    }

    #[test]
    fn overflow_serves_newest_request_first() {
        let mut state = State::new(1);
        let mut factory = names();

        for payload in ["a", "b", "c"] {
            state.enqueue(request(payload));
            assign(&mut state, &mut factory);
        }
        assert_eq!(state.stats().queued, 2);

        state.release(HandlerId::new(0));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "c", false)));
        state.release(HandlerId::new(0));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "b", false)));
    }

    #[test]
    fn zero_limit_never_creates() {
        let mut state = State::new(0);
        let mut factory = names();

        state.enqueue(request("a"));
        assert_eq!(assign(&mut state, &mut factory), None);

        let stats = state.stats();
        assert_eq!(stats.created, 0);
        assert_eq!(stats.queued, 1);
    }

    #[test]
    fn failed_creation_restores_budget() {
        let mut state = State::new(1);
        let mut fail = true;
        let mut factory = move || -> anyhow::Result<&'static str> {
            if fail {
                fail = false;
                anyhow::bail!("not a handler");
            }
            Ok("h0")
        };

        let req = request("a");
        let call = req.call_id();
        state.enqueue(req);

        let err = state.next_assignment(&mut factory).err().unwrap();
        assert!(err.is_factory());
        assert_eq!(state.stats().created, 0);
        assert_eq!(state.stats().budget, 1);

        assert_eq!(state.withdraw(call).map(|r| r.payload), Some("a"));
        assert_eq!(state.stats().queued, 0);

        state.enqueue(request("b"));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "b", true)));
    }

    #[test]
    fn panicking_factory_spends_no_budget() {
        let mut state = State::new(1);
        let mut panicked = false;
        let mut factory = move || -> anyhow::Result<&'static str> {
            if !panicked {
                panicked = true;
                panic!("factory blew up");
            }
            Ok("h0")
        };

        let req = request("a");
        let call = req.call_id();
        state.enqueue(req);

        let err = state.next_assignment(&mut factory).err().unwrap();
        assert!(err.is_factory());
        assert_eq!(err.to_string(), "handler factory failed: panicked: factory blew up");

        let stats = state.stats();
        assert_eq!(stats.budget, 1);
        assert_eq!(stats.created, 0);
        assert_eq!(stats.queued, 1);
        assert!(state.withdraw(call).is_some());

        state.enqueue(request("b"));
        assert_eq!(assign(&mut state, &mut factory), Some((0, "b", true)));
        assert_eq!(state.stats().budget, 0);
    }

    #[test]
    fn withdraw_unknown_call_is_none() {
        let mut state = State::new(1);
        state.enqueue(request("a"));
        assert!(state.withdraw(CallId::new()).is_none());
        assert_eq!(state.stats().queued, 1);
    }
}
