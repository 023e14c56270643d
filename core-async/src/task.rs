//! Task spawning and execution.
//!
//! Thin wrappers over `tokio::task` so downstream crates never name the
//! executor directly.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handle = task::spawn(async { 42 });
//! assert_eq!(handle.await.unwrap(), 42);
//! # }
//! ```

pub use tokio::task::{yield_now, AbortHandle, JoinError, JoinHandle};

/// Spawns a new asynchronous task on the current runtime.
///
/// The spawned task may run on a different thread.
///
/// # Panics
///
/// Panics when called outside of a Tokio runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
