//! Auth status cache
//!
//! Holds the last known linking status of one platform. Reads return the
//! cached value immediately; revalidation happens on a poll interval, when
//! the host window regains focus, and on demand. Only one status request is
//! in flight at a time.
//!
//! Local changes (`unlink`, `refresh`) advance a generation counter. A status
//! reply issued under an older generation is discarded, so a slow poll can
//! never overwrite the outcome of an action the operator just took.

use crate::api::PlatformApi;
use crate::credential::CredentialSource;
use crate::error::Result;
use crate::refresh::RefreshScheduler;
use crate::types::{AuthStatusSnapshot, PlatformKind};
use bridge_traits::{Clock, LifecycleObserver, LifecycleState, WindowHost};
use chrono::{DateTime, Utc};
use core_async::sync::{watch, CancellationToken, Notify};
use core_async::timer::Ticker;
use core_runtime::events::{CoreEvent, EventBus, LinkEvent, SessionEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Everything the cache knows about a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusState {
    pub snapshot: AuthStatusSnapshot,
    /// When `snapshot` was last written
    pub fetched_at: Option<DateTime<Utc>>,
    pub is_validating: bool,
    /// Error of the last failed revalidation, cleared on success
    pub last_error: Option<String>,
}

/// Collaborators of a status cache.
pub struct StatusCacheDeps {
    pub api: PlatformApi,
    pub credentials: CredentialSource,
    pub refresh: RefreshScheduler,
    pub window: Arc<dyn WindowHost>,
    pub lifecycle: Option<Arc<dyn LifecycleObserver>>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub poll_interval: Duration,
}

struct CacheInner {
    platform: PlatformKind,
    api: PlatformApi,
    credentials: CredentialSource,
    refresh: RefreshScheduler,
    window: Arc<dyn WindowHost>,
    lifecycle: Option<Arc<dyn LifecycleObserver>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    poll_interval: Duration,
    state: watch::Sender<StatusState>,
    validating: AtomicBool,
    /// Signalled whenever an in-flight revalidation ends
    idle: Notify,
    generation: AtomicU64,
    poller: Mutex<Option<Ticker>>,
    focus: Mutex<Option<CancellationToken>>,
}

/// Resets the validating flag even if the revalidation future is dropped.
struct ValidatingGuard<'a> {
    inner: &'a CacheInner,
}

impl Drop for ValidatingGuard<'_> {
    fn drop(&mut self) {
        self.inner.validating.store(false, Ordering::SeqCst);
        self.inner.state.send_modify(|state| state.is_validating = false);
        self.inner.idle.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CacheInner {
    fn snapshot(&self) -> AuthStatusSnapshot {
        self.state.borrow().snapshot.clone()
    }

    /// Publishes a fetched snapshot, unless a local change superseded the
    /// request that produced it. Returns whether it was written.
    fn publish_fetched(&self, snapshot: AuthStatusSnapshot, issued: u64) -> bool {
        self.write(snapshot, Some(issued))
    }

    /// Writes a locally known snapshot and supersedes in-flight requests.
    fn publish_local(&self, snapshot: AuthStatusSnapshot) {
        self.write(snapshot, None);
    }

    fn write(&self, snapshot: AuthStatusSnapshot, issued: Option<u64>) -> bool {
        let now = self.clock.now();
        let mut changed = false;

        // The generation check runs under the channel's write lock, so a
        // local write and a late reply cannot interleave.
        let written = self.state.send_if_modified(|state| {
            match issued {
                Some(generation) if generation != self.generation.load(Ordering::SeqCst) => {
                    return false;
                }
                Some(_) => {}
                None => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                }
            }
            changed = state.snapshot.authenticated != snapshot.authenticated;
            state.snapshot = snapshot;
            state.fetched_at = Some(now);
            state.last_error = None;
            true
        });

        if !written {
            debug!(platform = self.platform.slug(), "Discarding superseded status reply");
            return false;
        }

        if changed {
            let authenticated = self.state.borrow().snapshot.authenticated;
            info!(platform = self.platform.slug(), authenticated, "Link status changed");
            self.events
                .emit(CoreEvent::Session(SessionEvent::StatusChanged {
                    platform: self.platform.slug().to_string(),
                    authenticated,
                }))
                .ok();
        }
        true
    }

    /// Revalidates unless a request is already in flight, in which case the
    /// cached snapshot is returned.
    async fn revalidate(&self) -> Result<AuthStatusSnapshot> {
        if self.validating.swap(true, Ordering::SeqCst) {
            debug!(platform = self.platform.slug(), "Revalidation already in flight");
            return Ok(self.snapshot());
        }
        self.fetch_status().await
    }

    /// Supersedes any in-flight request, waits for it to end, then issues a
    /// request of its own.
    async fn revalidate_now(&self) -> Result<AuthStatusSnapshot> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        loop {
            let idle = self.idle.notified();
            let mut idle = std::pin::pin!(idle);
            idle.as_mut().enable();
            if !self.validating.swap(true, Ordering::SeqCst) {
                break;
            }
            debug!(platform = self.platform.slug(), "Waiting for in-flight revalidation");
            idle.await;
        }
        self.fetch_status().await
    }

    /// Must be called with `validating` already claimed.
    async fn fetch_status(&self) -> Result<AuthStatusSnapshot> {
        let _guard = ValidatingGuard { inner: self };
        let issued = self.generation.load(Ordering::SeqCst);
        self.state.send_modify(|state| state.is_validating = true);

        let result = match self.credentials.resolve().await {
            Ok(credential) => self.api.status(&credential).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(snapshot) => {
                if self.publish_fetched(snapshot.clone(), issued) {
                    Ok(snapshot)
                } else {
                    Ok(self.snapshot())
                }
            }
            Err(e) => {
                warn!(platform = self.platform.slug(), error = %e, "Status revalidation failed");
                let message = e.to_string();
                self.state
                    .send_modify(|state| state.last_error = Some(message));
                Err(e)
            }
        }
    }
}

/// Status cache for one platform. Dropping it stops polling.
pub struct AuthStatusCache {
    inner: Arc<CacheInner>,
}

impl AuthStatusCache {
    pub fn new(deps: StatusCacheDeps) -> Self {
        let (state, _) = watch::channel(StatusState::default());
        Self {
            inner: Arc::new(CacheInner {
                platform: deps.api.platform(),
                api: deps.api,
                credentials: deps.credentials,
                refresh: deps.refresh,
                window: deps.window,
                lifecycle: deps.lifecycle,
                clock: deps.clock,
                events: deps.events,
                poll_interval: deps.poll_interval,
                state,
                validating: AtomicBool::new(false),
                idle: Notify::new(),
                generation: AtomicU64::new(0),
                poller: Mutex::new(None),
                focus: Mutex::new(None),
            }),
        }
    }

    pub fn platform(&self) -> PlatformKind {
        self.inner.platform
    }

    /// Starts polling and focus revalidation, then revalidates once.
    ///
    /// Calling it again while running has no effect beyond the revalidation.
    /// A failed first revalidation is recorded in [`StatusState::last_error`].
    #[instrument(skip(self), fields(platform = self.inner.platform.slug()))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut poller = lock(&self.inner.poller);
            if poller.is_none() {
                let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
                *poller = Some(Ticker::every(self.inner.poll_interval, move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            let _ = inner.revalidate().await;
                        }
                    }
                }));
            }
        }

        if let Some(observer) = &self.inner.lifecycle {
            if lock(&self.inner.focus).is_none() {
                let mut changes = observer.subscribe_changes().await?;
                let token = CancellationToken::new();
                let stopped = token.clone();
                let weak = Arc::downgrade(&self.inner);
                core_async::spawn(async move {
                    loop {
                        let next = core_async::select! {
                            biased;
                            _ = stopped.cancelled() => break,
                            next = changes.next() => next,
                        };
                        match next {
                            Some(LifecycleState::Foreground) => {
                                let Some(inner) = weak.upgrade() else { break };
                                debug!(platform = inner.platform.slug(), "Focus regained, revalidating");
                                let _ = inner.revalidate().await;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                });
                *lock(&self.inner.focus) = Some(token);
            }
        }

        let _ = self.inner.revalidate().await;
        Ok(())
    }

    /// Stops polling and focus revalidation.
    pub fn stop(&self) {
        if let Some(ticker) = lock(&self.inner.poller).take() {
            ticker.cancel();
        }
        if let Some(token) = lock(&self.inner.focus).take() {
            token.cancel();
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller)
            .as_ref()
            .is_some_and(Ticker::is_running)
    }

    /// Last known status. Never waits for a revalidation.
    pub fn snapshot(&self) -> AuthStatusSnapshot {
        self.inner.snapshot()
    }

    pub fn state(&self) -> StatusState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusState> {
        self.inner.state.subscribe()
    }

    pub fn is_validating(&self) -> bool {
        self.inner.state.borrow().is_validating
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.borrow().last_error.clone()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().fetched_at
    }

    /// Fetches the status now. A concurrent call returns the cached value
    /// instead of issuing a second request.
    pub async fn revalidate(&self) -> Result<AuthStatusSnapshot> {
        self.inner.revalidate().await
    }

    /// Starts authorization: fetches the platform login URL, stashes the
    /// primary credential for the redirect round-trip, then navigates.
    #[instrument(skip(self), fields(platform = self.inner.platform.slug()))]
    pub async fn initiate(&self) -> Result<Url> {
        let inner = &self.inner;
        let credential = inner.credentials.resolve().await?;
        let auth_url = inner.api.login_url(&credential).await?;

        inner.credentials.stash(&credential).await?;
        inner.window.navigate(auth_url.as_str())?;

        info!(host = auth_url.host_str().unwrap_or_default(), "Authorization started");
        inner
            .events
            .emit(CoreEvent::Session(SessionEvent::AuthorizationStarted {
                platform: inner.platform.slug().to_string(),
            }))
            .ok();
        Ok(auth_url)
    }

    /// Refreshes the external session, then revalidates.
    ///
    /// The revalidation is always a new request: a status call already in
    /// flight is awaited and its reply discarded. It runs even when the
    /// refresh failed; the refresh error is returned in that case.
    #[instrument(skip(self), fields(platform = self.inner.platform.slug()))]
    pub async fn refresh(&self) -> Result<AuthStatusSnapshot> {
        let credential = self.inner.credentials.resolve().await?;
        let refreshed = self.inner.refresh.refresh_once(&credential).await;
        let snapshot = self.inner.revalidate_now().await;
        refreshed?;
        snapshot
    }

    /// Unlinks the platform and marks it unauthenticated without waiting
    /// for the next revalidation. A status reply still on the wire is
    /// discarded. Stops every keep-alive ticker of the platform.
    #[instrument(skip(self), fields(platform = self.inner.platform.slug()))]
    pub async fn unlink(&self) -> Result<()> {
        let inner = &self.inner;
        let credential = inner.credentials.resolve().await?;
        inner.api.logout(&credential).await?;

        inner.refresh.stop_all();
        inner.publish_local(AuthStatusSnapshot::unauthenticated());

        inner
            .events
            .emit(CoreEvent::Link(LinkEvent::Unlinked {
                platform: inner.platform.slug().to_string(),
            }))
            .ok();
        Ok(())
    }
}

impl Drop for AuthStatusCache {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AuthStatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStatusCache")
            .field("platform", &self.inner.platform)
            .field("state", &self.state())
            .finish()
    }
}
