//! Session refresh scheduler
//!
//! Keeps a linked external session alive by calling the refresh endpoint on a
//! fixed period. Failures are logged and counted but never touch the link
//! phase; reaching the failure threshold emits a single degraded signal.
//!
//! One scheduler exists per platform; clones share the failure streak. Each
//! linked callback processor owns its own [`KeepAlive`] ticker, and dropping
//! that handle stops only that ticker. Unlinking stops every ticker of the
//! platform at once through [`RefreshScheduler::stop_all`].

use crate::api::PlatformApi;
use crate::credential::PrimaryCredential;
use crate::error::Result;
use crate::types::PlatformKind;
use core_async::sync::CancellationToken;
use core_async::timer::Ticker;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<RefreshInner>,
}

struct RefreshInner {
    platform: PlatformKind,
    api: PlatformApi,
    events: EventBus,
    interval: Duration,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    /// Parent of every live keep-alive ticker; replaced on `stop_all`.
    linked: Mutex<CancellationToken>,
}

impl RefreshInner {
    fn linked(&self) -> MutexGuard<'_, CancellationToken> {
        match self.linked.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn refresh_once(&self, credential: &PrimaryCredential) -> Result<()> {
        let platform = self.platform.slug().to_string();

        match self.api.refresh(credential).await {
            Ok(()) => {
                let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
                if previous > 0 {
                    info!(platform = %platform, previous_failures = previous, "Session refresh recovered");
                }
                self.events
                    .emit(CoreEvent::Session(SessionEvent::RefreshSucceeded { platform }))
                    .ok();
                Ok(())
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    platform = %platform,
                    consecutive_failures = failures,
                    error = %e,
                    "Session refresh failed"
                );
                self.events
                    .emit(CoreEvent::Session(SessionEvent::RefreshFailed {
                        platform: platform.clone(),
                        consecutive_failures: failures,
                        message: e.to_string(),
                    }))
                    .ok();

                if failures == self.failure_threshold {
                    warn!(
                        platform = %platform,
                        consecutive_failures = failures,
                        "External session degraded, refresh keeps failing"
                    );
                    self.events
                        .emit(CoreEvent::Session(SessionEvent::RefreshDegraded {
                            platform,
                            consecutive_failures: failures,
                        }))
                        .ok();
                }
                Err(e)
            }
        }
    }
}

impl RefreshScheduler {
    pub fn new(
        platform: PlatformKind,
        api: PlatformApi,
        events: EventBus,
        interval: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                platform,
                api,
                events,
                interval,
                failure_threshold,
                consecutive_failures: AtomicU32::new(0),
                linked: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Starts a keep-alive ticker for one linked session.
    ///
    /// The first tick fires one interval after this call. The ticker runs
    /// until the returned handle is stopped or dropped, or until
    /// [`stop_all`](Self::stop_all).
    #[instrument(skip(self, credential), fields(platform = self.inner.platform.slug()))]
    pub fn start(&self, credential: PrimaryCredential) -> KeepAlive {
        let token = self.inner.linked().child_token();
        let weak: Weak<RefreshInner> = Arc::downgrade(&self.inner);
        let ticker = Ticker::every_until(self.inner.interval, token, move || {
            let weak = weak.clone();
            let credential = credential.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    let _ = inner.refresh_once(&credential).await;
                }
            }
        });

        info!(interval_secs = self.inner.interval.as_secs(), "Keep-alive ticker started");
        KeepAlive {
            platform: self.inner.platform,
            ticker,
        }
    }

    /// Stops every keep-alive ticker started so far for this platform.
    /// Tickers started afterwards are unaffected.
    pub fn stop_all(&self) {
        let previous = std::mem::replace(&mut *self.inner.linked(), CancellationToken::new());
        previous.cancel();
        debug!(platform = self.inner.platform.slug(), "All keep-alive tickers stopped");
    }

    /// Performs a single refresh outside the schedule.
    pub async fn refresh_once(&self, credential: &PrimaryCredential) -> Result<()> {
        self.inner.refresh_once(credential).await
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn platform(&self) -> PlatformKind {
        self.inner.platform
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("platform", &self.inner.platform)
            .field("interval", &self.inner.interval)
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

/// Keep-alive ticker of one linked session. Dropping it stops the ticker.
#[derive(Debug)]
pub struct KeepAlive {
    platform: PlatformKind,
    ticker: Ticker,
}

impl KeepAlive {
    /// Stops the ticker. Returns `true` if it was still running.
    pub fn stop(&self) -> bool {
        let was_running = self.ticker.is_running();
        self.ticker.cancel();
        if was_running {
            debug!(platform = self.platform.slug(), "Keep-alive ticker stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn platform(&self) -> PlatformKind {
        self.platform
    }
}
