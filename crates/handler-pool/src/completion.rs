//! One-shot completion token handed to a handler with each request.
//!
//! State transitions mirror a permit: a busy handler holds a `Completion`;
//! consuming it with [`Completion::complete`] returns the handler to the idle
//! area and triggers the next scheduling pass. Dropping it unconsumed leaves
//! the handler busy forever.

use std::sync::Arc;

use crate::handler::HandlerId;
use crate::notifier::CallId;

/// Where a completed handler goes back to.
pub(crate) trait Release: Send + Sync {
    fn release(&self, handler: HandlerId);
}

/// Token a handler consumes to signal it has finished its current request.
#[must_use = "the handler stays busy until its Completion is consumed"]
pub struct Completion {
    handler: HandlerId,
    call: CallId,
    pool: Option<Arc<dyn Release>>,
}

impl Completion {
    pub(crate) fn new(handler: HandlerId, call: CallId, pool: Arc<dyn Release>) -> Self {
        Self {
            handler,
            call,
            pool: Some(pool),
        }
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    /// Return the handler to the pool. A waiting request, if any, is assigned
    /// to it; that invocation starts on a fresh task, never inside this call.
    pub fn complete(mut self) {
        if let Some(pool) = self.pool.take() {
            tracing::debug!(handler = %self.handler, call = %self.call, "Handler completed");
            pool.release(self.handler);
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("handler", &self.handler)
            .field("call", &self.call)
            .field("pending", &self.pool.is_some())
            .finish()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.pool.is_some() {
            tracing::error!(
                handler = %self.handler,
                call = %self.call,
                "Completion dropped without being consumed - handler will not return to the pool"
            );
        }
    }
}
