//! Time-related abstractions.
//!
//! Re-exports `tokio::time` so sleeps, timeouts and intervals follow the
//! runtime clock. Tests that pause the Tokio clock therefore drive every
//! timer in the workspace deterministically.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let start = Instant::now();
//! sleep(Duration::from_millis(5)).await;
//! assert!(start.elapsed() >= Duration::from_millis(5));
//! # }
//! ```

pub use tokio::time::{
    interval, interval_at, sleep, sleep_until, timeout, Interval, MissedTickBehavior, Sleep,
    Timeout,
};

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Monotonic instant driven by the runtime clock.
pub use tokio::time::Instant;

/// Error returned by [`timeout`] when the deadline elapses first.
pub use tokio::time::error::Elapsed;
