//! The handler pool: dispatcher plus assignment wiring.
//!
//! Flow:
//! 1. `invoke` appends a request and runs one scheduling pass
//! 2. The pass reuses an idle handler or creates one while budget remains
//! 3. The assigned handler is spawned on the runtime with a fresh `Completion`
//! 4. `Completion::complete` returns the handler to the idle area and runs another pass
//!
//! Every step above happens under a single mutex, so pool state changes one
//! transition at a time regardless of how many runtime threads are involved.
//! Handler bodies always start on their own task, never inside `invoke` or
//! inside the completion that freed them.
//!
//! On a current-thread runtime a synchronous burst of `invoke` calls is fully
//! queued before any handler body runs, so overload order is strictly
//! newest-first. On a multi-thread runtime a handler may complete mid-burst
//! and pick up the request queued at that moment; the limit and the
//! reuse-before-create rule still hold, but the order across the burst does not.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;

use crate::completion::{Completion, Release};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handler::{Handler, HandlerFactory, HandlerId};
use crate::notifier::Notifier;
use crate::state::{Assignment, CallRequest, PoolState};
use crate::stats::PoolStats;

struct Inner<H, P, E> {
    state: PoolState<H, P, E>,
    factory: Box<dyn HandlerFactory<H>>,
}

struct Shared<H, P, E> {
    inner: Mutex<Inner<H, P, E>>,
    runtime: Handle,
    this: Weak<Shared<H, P, E>>,
}

/// Bounded pool of lazily-created, reusable handlers.
///
/// Cloning is cheap and every clone dispatches into the same pool.
pub struct HandlerPool<H, P, E> {
    shared: Arc<Shared<H, P, E>>,
}

impl<H, P, E> Clone for HandlerPool<H, P, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H, P, E> HandlerPool<H, P, E>
where
    H: Handler<P, E>,
    P: Send + 'static,
    E: Send + 'static,
{
    /// Build a pool around a factory closure. No handler is created until the
    /// first dispatch needs one.
    ///
    /// Must be called inside a tokio runtime; handlers are spawned onto it.
    pub fn new<F>(factory: F, config: PoolConfig) -> Result<Self, PoolError>
    where
        F: FnMut() -> anyhow::Result<H> + Send + 'static,
    {
        Self::with_factory(factory, config)
    }

    /// Build a pool around any [`HandlerFactory`].
    pub fn with_factory<F>(factory: F, config: PoolConfig) -> Result<Self, PoolError>
    where
        F: HandlerFactory<H>,
    {
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        if config.limit == 0 {
            tracing::warn!("Handler pool limit is 0 - no handler can ever be created");
        }

        let shared = Arc::new_cyclic(|this| Shared {
            inner: Mutex::new(Inner {
                state: PoolState::new(config.limit),
                factory: Box::new(factory),
            }),
            runtime,
            this: this.clone(),
        });

        Ok(Self { shared })
    }

    /// Dispatch a call. Returns the call's notifier immediately; the handler
    /// runs later on its own task.
    ///
    /// Fails only if this call needed a new handler and the factory could not
    /// produce one. The call is then discarded and no budget is consumed.
    pub fn invoke(&self, payload: P) -> Result<Notifier<E>, PoolError> {
        let notifier = Notifier::new();
        let call = notifier.call_id();

        let mut inner = self.shared.lock();
        inner.state.enqueue(CallRequest::new(notifier.clone(), payload));

        if let Err(e) = self.shared.schedule(&mut inner) {
            inner.state.withdraw(call);
            tracing::error!(call = %call, error = %e, "Dispatch failed");
            return Err(e);
        }

        Ok(notifier)
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().state.stats()
    }

    pub fn limit(&self) -> usize {
        self.stats().limit
    }
}

impl<H, P, E> Shared<H, P, E> {
    fn lock(&self) -> MutexGuard<'_, Inner<H, P, E>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Handler pool mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl<H, P, E> Shared<H, P, E>
where
    H: Handler<P, E>,
    P: Send + 'static,
    E: Send + 'static,
{
    fn schedule(&self, inner: &mut Inner<H, P, E>) -> Result<(), PoolError> {
        let Inner { state, factory } = inner;
        if let Some(assignment) = state.next_assignment(factory.as_mut())? {
            self.dispatch(assignment, state.stats());
        }
        Ok(())
    }

    fn dispatch(&self, assignment: Assignment<H, P, E>, stats: PoolStats) {
        let Assignment {
            handler_id,
            handler,
            request,
            created,
        } = assignment;
        let CallRequest { notifier, payload } = request;
        let call = notifier.call_id();

        // `self` is always reached through the pool's Arc, so this only fails mid-drop.
        let Some(pool) = self.this.upgrade() else {
            tracing::error!(handler = %handler_id, call = %call, "Pool dropped during dispatch");
            return;
        };
        let done = Completion::new(handler_id, call, pool);

        tracing::debug!(
            handler = %handler_id,
            call = %call,
            created,
            busy = stats.busy,
            queued = stats.queued,
            "Assigning request"
        );

        self.runtime.spawn(async move {
            handler.handle(notifier, done, payload).await;
        });
    }
}

impl<H, P, E> Release for Shared<H, P, E>
where
    H: Handler<P, E>,
    P: Send + 'static,
    E: Send + 'static,
{
    fn release(&self, handler: HandlerId) {
        let mut inner = self.lock();
        inner.state.release(handler);

        if let Err(e) = self.schedule(&mut inner) {
            // Only creation can fail, and a pass right after a release always reuses.
            tracing::error!(handler = %handler, error = %e, "Scheduling after release failed");
        }
    }
}
