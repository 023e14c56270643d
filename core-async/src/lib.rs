//! Runtime abstraction layer for the Lab Desk core.
//!
//! Every `core-*` and `bridge-*` crate depends on this crate instead of reaching
//! for Tokio directly, so the executor stays swappable in one place.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Sleep, timeouts, intervals
//! - `sync`: Synchronization primitives and cancellation tokens
//! - `timer`: Scoped one-shot and recurring timers that disarm on drop
//!
//! # Examples
//!
//! ```rust
//! use core_async::timer::Delay;
//! use core_async::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let redirect = Delay::after(Duration::from_secs(3), || async {
//!     println!("navigating");
//! });
//!
//! // Leaving the view disarms the pending callback.
//! drop(redirect);
//! # }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;
pub mod timer;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
pub use timer::{Delay, Ticker};

/// Waits on several branches and runs the first that completes.
pub use tokio::select;
