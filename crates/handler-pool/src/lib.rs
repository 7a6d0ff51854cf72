//! handler-pool: a bounded, lazily-growing pool of reusable async handlers.
//!
//! Throttles calls into an expensive resource (process spawns, connections)
//! to at most `limit` concurrently-busy handlers without creating them up front.
//!
//! - [`HandlerPool::invoke`] queues a call and returns its [`Notifier`] at once
//! - handlers are created by a factory on first need, at most `limit` times
//! - a handler signals it is free again by consuming its [`Completion`]
//! - freed handlers are reused longest-idle first
//!
//! ```rust,no_run
//! use handler_pool::{Completion, HandlerPool, Notifier, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool: HandlerPool<_, String, String> = HandlerPool::new(
//!         || {
//!             Ok(|notifier: Notifier<String>, done: Completion, name: String| async move {
//!                 notifier.emit(format!("hello, {name}"));
//!                 done.complete();
//!             })
//!         },
//!         PoolConfig::new().with_limit(2),
//!     )?;
//!
//!     let mut events = pool.invoke("world".to_string())?.subscribe();
//!     println!("{:?}", events.recv().await);
//!     Ok(())
//! }
//! ```

mod completion;
mod config;
mod error;
mod handler;
mod notifier;
mod pool;
mod state;
mod stats;

pub use completion::Completion;
pub use config::{LIMIT_ENV, PoolConfig};
pub use error::PoolError;
pub use handler::{Handler, HandlerFactory, HandlerId};
pub use notifier::{CallId, Notifier, Subscription};
pub use pool::HandlerPool;
pub use stats::PoolStats;

/// Crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
