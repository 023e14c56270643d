//! Scoped timers.
//!
//! A timer is a resource: it is armed when constructed and disarmed when its
//! handle is cancelled or dropped. Both kinds run on a spawned task and race
//! their schedule against a [`CancellationToken`], so once a handle is gone
//! no new callback invocation can start.
//!
//! - [`Delay`] fires a callback once after a fixed delay. Once the callback
//!   has started it runs to completion.
//! - [`Ticker`] fires a callback on a fixed period, first tick one period
//!   after creation. An in-flight tick is abandoned at its next await point
//!   when the ticker is cancelled.
//!
//! # Examples
//!
//! ```rust
//! use core_async::timer::Ticker;
//! use core_async::time::Duration;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ticks = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&ticks);
//! let ticker = Ticker::every(Duration::from_millis(10), move || {
//!     let counter = Arc::clone(&counter);
//!     async move {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }
//! });
//!
//! core_async::sleep(Duration::from_millis(35)).await;
//! ticker.cancel();
//! assert!(ticks.load(Ordering::SeqCst) >= 1);
//! # }
//! ```

use crate::sync::CancellationToken;
use crate::task::{self, JoinHandle};
use crate::time::{self, Duration, Instant, MissedTickBehavior};
use std::fmt;
use std::future::Future;

/// One-shot delayed callback, disarmed on drop.
pub struct Delay {
    token: CancellationToken,
    handle: JoinHandle<()>,
    delay: Duration,
    deadline: Instant,
}

impl Delay {
    /// Arms a timer that runs `callback` once after `delay`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn after<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let armed = token.clone();
        let deadline = Instant::now() + delay;

        let handle = task::spawn(async move {
            tokio::select! {
                biased;
                _ = armed.cancelled() => {}
                _ = time::sleep_until(deadline) => callback().await,
            }
        });

        Self {
            token,
            handle,
            delay,
            deadline,
        }
    }

    /// Disarms the timer. Has no effect once the callback has started.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called or the handle dropped.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` when the timer task has exited, fired or not.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Returns `true` while the callback can still fire.
    pub fn is_pending(&self) -> bool {
        !self.is_cancelled() && !self.is_finished()
    }

    /// The delay this timer was armed with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Time left until the callback fires, zero once the deadline passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Recurring callback, stopped on drop.
pub struct Ticker {
    token: CancellationToken,
    handle: JoinHandle<()>,
    period: Duration,
}

impl Ticker {
    /// Starts a ticker that runs `callback` every `period`.
    ///
    /// Ticks never overlap: a slow callback delays the next tick instead of
    /// bursting to catch up.
    ///
    /// # Panics
    ///
    /// Panics when `period` is zero or when called outside of a Tokio runtime.
    pub fn every<F, Fut>(period: Duration, callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::every_until(period, CancellationToken::new(), callback)
    }

    /// Like [`every`](Self::every), but stops as soon as `token` is cancelled.
    ///
    /// Pass a child token to let an owner stop many tickers at once while each
    /// handle still stops only its own ticker.
    ///
    /// # Panics
    ///
    /// Panics when `period` is zero or when called outside of a Tokio runtime.
    pub fn every_until<F, Fut>(period: Duration, token: CancellationToken, mut callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let running = token.clone();

        let handle = task::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = running.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = running.cancelled() => break,
                    _ = callback() => {}
                }
            }
        });

        Self {
            token,
            handle,
            period,
        }
    }

    /// Stops the ticker.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the ticker was stopped.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` while ticks can still fire.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// The tick period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("period", &self.period)
            .field("running", &self.is_running())
            .finish()
    }
}
