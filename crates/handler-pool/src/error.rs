//! Pool error taxonomy.

/// Errors surfaced synchronously by pool construction and dispatch.
///
/// Handler misuse (never completing, or completing a call twice) is not an
/// error variant: the first cannot be observed and the second cannot be
/// expressed, since [`Completion::complete`](crate::Completion::complete)
/// consumes the token.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The factory failed to produce a handler. The creation budget it would
    /// have consumed is given back.
    #[error("handler factory failed: {message}")]
    Factory { message: String },

    /// The pool was built outside a tokio runtime, so handlers have nowhere to run.
    #[error("handler pool must be created inside a tokio runtime")]
    NoRuntime,
}

impl PoolError {
    pub fn factory(err: anyhow::Error) -> Self {
        Self::Factory {
            message: format!("{err:#}"),
        }
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, Self::Factory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_error_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("opening session");
        let err = PoolError::factory(err);

        assert!(err.is_factory());
        assert_eq!(
            err.to_string(),
            "handler factory failed: opening session: connection refused"
        );
    }

    #[test]
    fn no_runtime_message() {
        assert!(!PoolError::NoRuntime.is_factory());
        assert_eq!(
            PoolError::NoRuntime.to_string(),
            "handler pool must be created inside a tokio runtime"
        );
    }
}
