//! Callback processor
//!
//! Drives one platform's return redirect to a terminal phase:
//!
//! ```text
//!            ┌──── 401, attempt < max ────┐
//!            v                            │
//! Loading ─ exchange ─┬─ success ─> Success ─> warm-up refresh ─> ticker + completion
//!            ^        └─ failure ─> Error
//!            └──────── manual retry ──────┘
//! ```
//!
//! At most one exchange is in flight per processor. A guard moves between
//! `NotStarted`, `InFlight` and `Settled` with compare-and-swap; only a
//! transition from `NotStarted` may start an exchange.
//!
//! Retry delays, the completion redirect and the refresh ticker are timer
//! handles owned by the processor. [`CallbackProcessor::teardown`], or
//! dropping the processor, cancels all of them and discards any exchange
//! result still on the wire.

use crate::api::{ExchangeOutcome, PlatformApi};
use crate::completion::CompletionRouter;
use crate::credential::{CredentialSource, PrimaryCredential};
use crate::error::LinkError;
use crate::refresh::{KeepAlive, RefreshScheduler};
use crate::types::{
    normalize_state, CallbackParams, FlowId, LinkPhase, LinkSession, LinkedUser, PlatformKind,
    StatusCard,
};
use core_async::sync::{watch, CancellationToken};
use core_async::timer::Delay;
use core_runtime::events::{CoreEvent, EventBus, LinkEvent};
use core_runtime::LinkTimings;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, instrument, warn};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    NotStarted = 0,
    InFlight = 1,
    Settled = 2,
}

impl GuardState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GuardState::NotStarted,
            1 => GuardState::InFlight,
            _ => GuardState::Settled,
        }
    }
}

struct ProcessingGuard(AtomicU8);

impl ProcessingGuard {
    fn new() -> Self {
        Self(AtomicU8::new(GuardState::NotStarted as u8))
    }

    fn load(&self) -> GuardState {
        GuardState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: GuardState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: GuardState, to: GuardState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn enter(&self) -> Option<InFlight<'_>> {
        self.transition(GuardState::NotStarted, GuardState::InFlight)
            .then_some(InFlight { guard: self })
    }
}

/// Held for the duration of one exchange. Dropping it while still in flight
/// (the exchange future was abandoned) reopens the guard.
struct InFlight<'a> {
    guard: &'a ProcessingGuard,
}

impl InFlight<'_> {
    fn release(self) {
        self.guard.store(GuardState::NotStarted);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.guard
            .transition(GuardState::InFlight, GuardState::NotStarted);
    }
}

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct ProcessorInner {
    platform: PlatformKind,
    flow_id: FlowId,
    api: PlatformApi,
    credentials: CredentialSource,
    refresh: RefreshScheduler,
    completion: CompletionRouter,
    events: EventBus,
    timings: LinkTimings,
    guard: ProcessingGuard,
    redirect_seen: AtomicBool,
    retry: Mutex<Option<Delay>>,
    keep_alive: Mutex<Option<KeepAlive>>,
    session: watch::Sender<LinkSession>,
    shutdown: CancellationToken,
}

impl ProcessorInner {
    fn snapshot(&self) -> LinkSession {
        self.session.borrow().clone()
    }

    fn update(&self, modify: impl FnOnce(&mut LinkSession)) {
        self.session.send_modify(modify);
    }

    fn retry_slot(&self) -> MutexGuard<'_, Option<Delay>> {
        match self.retry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn keep_alive_slot(&self) -> MutexGuard<'_, Option<KeepAlive>> {
        match self.keep_alive.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stop_keep_alive(&self) {
        if let Some(keep_alive) = self.keep_alive_slot().take() {
            keep_alive.stop();
        }
    }

    fn cancel_retry(&self) {
        if let Some(delay) = self.retry_slot().take() {
            delay.cancel();
        }
    }

    fn emit(&self, event: LinkEvent) {
        self.events.emit(CoreEvent::Link(event)).ok();
    }

    fn slug(&self) -> String {
        self.platform.slug().to_string()
    }

    fn fail(&self, error: LinkError) {
        self.guard.store(GuardState::Settled);

        warn!(
            platform = self.platform.slug(),
            flow_id = %self.flow_id,
            kind = error.kind().as_str(),
            error = %error,
            "Linking failed"
        );

        let message = error.to_string();
        let retryable = error.is_retryable();
        let kind = error.kind().as_str().to_string();
        self.update(|session| {
            session.phase = LinkPhase::Error;
            session.message = message.clone();
            session.error = Some(error);
            session.linked_user = None;
        });

        self.emit(LinkEvent::LinkFailed {
            platform: self.slug(),
            flow_id: self.flow_id.to_string(),
            kind,
            message,
            retryable,
        });
    }

    async fn attempt_exchange(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let Some(in_flight) = self.guard.enter() else {
            debug!(
                platform = self.platform.slug(),
                guard = ?self.guard.load(),
                "Exchange skipped, processor busy or settled"
            );
            return;
        };

        let (code, state, attempt) = {
            let session = self.session.borrow();
            (session.code.clone(), session.state.clone(), session.attempt)
        };

        let Some(code) = code else {
            self.fail(LinkError::MalformedCallback);
            return;
        };

        let credential = match self.credentials.resolve().await {
            Ok(credential) => credential,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        self.emit(LinkEvent::ExchangeStarted {
            platform: self.slug(),
            flow_id: self.flow_id.to_string(),
            attempt,
        });

        let outcome = core_async::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(platform = self.platform.slug(), "Processor torn down, discarding exchange");
                return;
            }
            outcome = self.api.exchange(&credential, &code, state.as_deref()) => outcome,
        };

        match outcome {
            Ok(ExchangeOutcome::Linked(user)) => self.succeed(user, credential).await,
            Ok(ExchangeOutcome::Unauthorized) if attempt < self.timings.max_retries => {
                in_flight.release();
                self.schedule_retry(attempt + 1);
            }
            Ok(ExchangeOutcome::Unauthorized) => {
                self.fail(LinkError::TransientAuth {
                    attempts: self.timings.max_retries,
                });
            }
            Ok(ExchangeOutcome::Rejected { status, reason }) => {
                self.fail(LinkError::ExchangeRejected {
                    status: Some(status),
                    reason,
                });
            }
            Err(e) => self.fail(e.into_exchange_failure()),
        }
    }

    fn schedule_retry(self: &Arc<Self>, attempt: u32) {
        let delay = self.timings.retry_delay;
        let name = self.platform.display_name();
        let max = self.timings.max_retries;

        self.update(|session| {
            session.attempt = attempt;
            session.message = format!(
                "Waiting for {} to accept the session (retry {} of {})...",
                name, attempt, max
            );
        });

        info!(
            platform = self.platform.slug(),
            flow_id = %self.flow_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Exchange not yet authorized, retrying"
        );
        self.emit(LinkEvent::RetryScheduled {
            platform: self.slug(),
            flow_id: self.flow_id.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let weak = Arc::downgrade(self);
        *self.retry_slot() = Some(Delay::after(delay, move || retry_exchange(weak)));

        if self.shutdown.is_cancelled() {
            self.cancel_retry();
        }
    }

    async fn succeed(self: &Arc<Self>, user: Option<LinkedUser>, credential: PrimaryCredential) {
        self.guard.store(GuardState::Settled);

        let name = self.platform.display_name();
        let message = match &user {
            Some(user) => format!("{} linked as {}", name, user.name),
            None => format!("{} account linked", name),
        };
        let group_name = user.as_ref().and_then(|u| u.group_name.clone());

        self.update(|session| {
            session.phase = LinkPhase::Success;
            session.linked_user = user;
            session.message = message;
            session.error = None;
        });

        info!(
            platform = self.platform.slug(),
            flow_id = %self.flow_id,
            group = ?group_name,
            "Platform linked"
        );
        self.emit(LinkEvent::Linked {
            platform: self.slug(),
            flow_id: self.flow_id.to_string(),
            group_name,
        });

        if let Err(e) = self.credentials.clear_stash().await {
            warn!(platform = self.platform.slug(), error = %e, "Could not clear credential stash");
        }

        core_async::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            _ = self.refresh.refresh_once(&credential) => {}
        }

        if self.shutdown.is_cancelled() {
            return;
        }

        let keep_alive = self.refresh.start(credential);
        *self.keep_alive_slot() = Some(keep_alive);
        self.completion.complete();

        // Teardown may have raced the two starts above.
        if self.shutdown.is_cancelled() {
            self.stop_keep_alive();
            self.completion.cancel();
        }
    }
}

fn retry_exchange(inner: Weak<ProcessorInner>) -> BoxedTask {
    Box::pin(async move {
        if let Some(inner) = inner.upgrade() {
            inner.attempt_exchange().await;
        }
    })
}

/// Processes one platform's OAuth return redirect.
///
/// Owns every timer the flow creates; dropping it tears the flow down.
pub struct CallbackProcessor {
    inner: Arc<ProcessorInner>,
}

impl CallbackProcessor {
    pub fn new(
        flow_id: FlowId,
        api: PlatformApi,
        credentials: CredentialSource,
        refresh: RefreshScheduler,
        completion: CompletionRouter,
        events: EventBus,
        timings: LinkTimings,
    ) -> Self {
        let platform = api.platform();
        let (session, _) = watch::channel(LinkSession::new(platform));
        Self {
            inner: Arc::new(ProcessorInner {
                platform,
                flow_id,
                api,
                credentials,
                refresh,
                completion,
                events,
                timings,
                guard: ProcessingGuard::new(),
                redirect_seen: AtomicBool::new(false),
                retry: Mutex::new(None),
                keep_alive: Mutex::new(None),
                session,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn platform(&self) -> PlatformKind {
        self.inner.platform
    }

    pub fn flow_id(&self) -> FlowId {
        self.inner.flow_id
    }

    /// Handles the return redirect. Only the first call per processor has an
    /// effect; later calls return the current snapshot.
    ///
    /// Returns once the first exchange attempt resolved. A 401 leaves the
    /// session in `Loading` with a retry scheduled; use
    /// [`wait_until_settled`](Self::wait_until_settled) to await the outcome.
    #[instrument(skip(self, params), fields(platform = self.inner.platform.slug(), flow_id = %self.inner.flow_id))]
    pub async fn handle_redirect(&self, params: CallbackParams) -> LinkSession {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return inner.snapshot();
        }
        if inner.redirect_seen.swap(true, Ordering::SeqCst) {
            debug!("Redirect already observed");
            return inner.snapshot();
        }

        inner.emit(LinkEvent::CallbackReceived {
            platform: inner.slug(),
            flow_id: inner.flow_id.to_string(),
            has_code: params.code.is_some(),
            has_error: params.error.is_some(),
        });

        if let Some(reason) = params.error {
            debug!(
                reason = %reason,
                description = ?params.error_description,
                "Platform reported an authorization error"
            );
            inner.fail(LinkError::RejectedByUser { reason });
            return inner.snapshot();
        }

        let Some(code) = params.code.filter(|code| !code.trim().is_empty()) else {
            inner.fail(LinkError::MalformedCallback);
            return inner.snapshot();
        };

        let state = normalize_state(params.state);
        inner.update(|session| {
            session.code = Some(code);
            session.state = state;
        });

        inner.attempt_exchange().await;
        inner.snapshot()
    }

    /// Restarts a failed flow from attempt zero.
    ///
    /// Returns `false` when the flow is not in a retryable error, when a
    /// completion redirect is already scheduled, or after teardown.
    #[instrument(skip(self), fields(platform = self.inner.platform.slug(), flow_id = %self.inner.flow_id))]
    pub async fn retry(&self) -> bool {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() || inner.completion.is_scheduled() {
            return false;
        }

        let session = inner.snapshot();
        if session.phase != LinkPhase::Error {
            debug!(phase = ?session.phase, "Retry ignored outside of error phase");
            return false;
        }
        if !session.error.as_ref().is_some_and(LinkError::is_retryable) {
            debug!("Retry not offered for this error");
            return false;
        }
        if !inner
            .guard
            .transition(GuardState::Settled, GuardState::NotStarted)
        {
            return false;
        }

        inner.cancel_retry();
        let name = inner.platform.display_name();
        inner.update(|session| {
            session.phase = LinkPhase::Loading;
            session.attempt = 0;
            session.error = None;
            session.message = format!("Finalizing {} link...", name);
        });

        info!("Manual retry");
        inner.attempt_exchange().await;
        true
    }

    /// Navigates to the dashboard without waiting for the redirect delay.
    pub fn continue_now(&self) -> bool {
        self.inner.snapshot().phase == LinkPhase::Success && self.inner.completion.continue_now()
    }

    /// Cancels every timer the flow owns and discards in-flight results.
    /// Idempotent.
    pub fn teardown(&self) {
        let inner = &self.inner;
        let first = !inner.shutdown.is_cancelled();
        inner.shutdown.cancel();
        inner.cancel_retry();
        inner.completion.cancel();
        inner.stop_keep_alive();

        if first {
            debug!(
                platform = inner.platform.slug(),
                flow_id = %inner.flow_id,
                "Callback processor torn down"
            );
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn session(&self) -> LinkSession {
        self.inner.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkSession> {
        self.inner.session.subscribe()
    }

    /// Waits for `Success` or `Error`, or for teardown.
    pub async fn wait_until_settled(&self) -> LinkSession {
        let mut rx = self.inner.session.subscribe();
        core_async::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => {}
            _ = rx.wait_for(|session| session.phase.is_settled()) => {}
        }
        self.inner.snapshot()
    }

    /// `true` while an automatic retry is waiting to fire.
    pub fn retry_pending(&self) -> bool {
        self.inner
            .retry_slot()
            .as_ref()
            .is_some_and(Delay::is_pending)
    }

    /// `true` while this flow's keep-alive ticker runs.
    pub fn keep_alive_running(&self) -> bool {
        self.inner
            .keep_alive_slot()
            .as_ref()
            .is_some_and(KeepAlive::is_running)
    }

    pub fn redirect_pending(&self) -> bool {
        self.inner.completion.is_scheduled()
    }

    pub fn status_card(&self) -> StatusCard {
        StatusCard::compose(&self.inner.snapshot(), self.redirect_pending())
    }
}

impl Drop for CallbackProcessor {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for CallbackProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackProcessor")
            .field("platform", &self.inner.platform)
            .field("flow_id", &self.inner.flow_id)
            .field("guard", &self.inner.guard.load())
            .field("session", &self.inner.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{stash_key, StaticSessionHolder};
    use crate::error::LinkErrorKind;
    use crate::types::CardAction;
    use async_trait::async_trait;
    use bridge_desktop::{HeadlessWindow, MemorySessionStorage};
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use bridge_traits::SessionStorage;
    use core_async::time::Instant;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use url::Url;

    #[derive(Clone)]
    enum Reply {
        Status(u16, &'static str),
        Fail,
        Hang,
    }

    struct Call {
        action: String,
        authorization: Option<String>,
        at: Instant,
    }

    /// Answers each `{slug}/auth/{action}` endpoint from its own script,
    /// repeating the last reply once the script runs out.
    #[derive(Default)]
    struct ScriptedBackend {
        scripts: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedBackend {
        fn on(self, action: &'static str, replies: Vec<Reply>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(action, replies.into_iter().collect());
            self
        }

        fn calls_to(&self, action: &str) -> Vec<(Option<String>, Instant)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| call.action == action)
                .map(|call| (call.authorization.clone(), call.at))
                .collect()
        }

        fn count(&self, action: &str) -> usize {
            self.calls_to(action).len()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedBackend {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            let action = request.url.rsplit('/').next().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(Call {
                action: action.clone(),
                authorization: request.headers.get("Authorization").cloned(),
                at: Instant::now(),
            });

            let reply = {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.get_mut(action.as_str()) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };

            match reply {
                Some(Reply::Status(status, body)) => Ok(HttpResponse::new(status, body)),
                Some(Reply::Fail) => Err(BridgeError::Timeout("request timed out".to_string())),
                Some(Reply::Hang) => std::future::pending().await,
                None => Ok(HttpResponse::new(404, "")),
            }
        }
    }

    const LINKED: Reply = Reply::Status(
        200,
        r#"{"success":true,"user":{"name":"Jane Doe","email":"jane@lab.example","group":"Smile Lab"}}"#,
    );
    const OK: Reply = Reply::Status(200, "{}");
    const UNAUTHORIZED: Reply = Reply::Status(401, "");

    struct Harness {
        processor: CallbackProcessor,
        backend: Arc<ScriptedBackend>,
        window: Arc<HeadlessWindow>,
        storage: Arc<MemorySessionStorage>,
        events: EventBus,
    }

    fn harness_with(
        backend: ScriptedBackend,
        window: HeadlessWindow,
        holder: StaticSessionHolder,
    ) -> Harness {
        let platform = PlatformKind::MeditLink;
        let timings = LinkTimings::default();
        let backend = Arc::new(backend);
        let window = Arc::new(window);
        let storage = Arc::new(MemorySessionStorage::new());
        let events = EventBus::default();
        let flow_id = FlowId::new();

        let api = PlatformApi::new(
            platform,
            Url::parse("https://api.lab.example/").unwrap(),
            backend.clone(),
            timings.request_timeout,
        );
        let refresh = RefreshScheduler::new(
            platform,
            api.clone(),
            events.clone(),
            timings.refresh_interval,
            timings.refresh_failure_threshold,
        );
        let completion = CompletionRouter::new(
            platform,
            flow_id,
            window.clone(),
            events.clone(),
            "/dashboard/meditlink".to_string(),
            timings.redirect_delay,
        );
        let credentials = CredentialSource::new(
            platform,
            Arc::new(holder),
            storage.clone(),
            timings.credential_stash_ttl,
        );

        let processor = CallbackProcessor::new(
            flow_id,
            api,
            credentials,
            refresh,
            completion,
            events.clone(),
            timings,
        );

        Harness {
            processor,
            backend,
            window,
            storage,
            events,
        }
    }

    fn harness(backend: ScriptedBackend) -> Harness {
        harness_with(
            backend,
            HeadlessWindow::new(),
            StaticSessionHolder::signed_in("primary-token"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_link_schedules_redirect_and_ticker() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
        );

        let session = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;

        assert_eq!(session.phase, LinkPhase::Success);
        assert_eq!(session.linked_user.as_ref().unwrap().name, "Jane Doe");
        assert_eq!(h.backend.count("refresh"), 1, "warm-up refresh");
        assert!(h.processor.redirect_pending());
        assert!(h.processor.keep_alive_running());
        assert_eq!(h.processor.status_card().actions, vec![CardAction::ContinueNow]);

        tokio::time::sleep(Duration::from_millis(2_999)).await;
        assert!(h.window.navigations().is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(h.window.navigations(), vec!["/dashboard/meditlink".to_string()]);

        tokio::time::sleep(Duration::from_millis(27_000)).await;
        assert_eq!(h.backend.count("refresh"), 2, "first tick at 30s");

        for (authorization, _) in h
            .backend
            .calls_to("callback")
            .into_iter()
            .chain(h.backend.calls_to("refresh"))
        {
            assert_eq!(authorization.as_deref(), Some("Bearer primary-token"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_unauthorized_retries_three_times() {
        let h = harness(ScriptedBackend::default().on("callback", vec![UNAUTHORIZED]));

        let first = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;
        assert_eq!(first.phase, LinkPhase::Loading);
        assert_eq!(first.attempt, 1);
        assert!(h.processor.retry_pending());

        let settled = h.processor.wait_until_settled().await;
        assert_eq!(settled.phase, LinkPhase::Error);
        assert_eq!(settled.error, Some(LinkError::TransientAuth { attempts: 3 }));
        assert!(settled.message.contains("3 attempts"));

        let calls = h.backend.calls_to("callback");
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert_eq!(pair[1].1 - pair[0].1, Duration::from_secs(1));
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.backend.count("callback"), 4);
        assert_eq!(
            h.processor.status_card().actions,
            vec![CardAction::Retry, CardAction::ReturnToDashboard]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_then_success() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![UNAUTHORIZED, UNAUTHORIZED, LINKED])
                .on("refresh", vec![OK]),
        );

        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;
        let settled = h.processor.wait_until_settled().await;

        assert_eq!(settled.phase, LinkPhase::Success);
        assert_eq!(settled.attempt, 2);
        assert_eq!(h.backend.count("callback"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorization_error_makes_no_calls() {
        let h = harness(ScriptedBackend::default().on("callback", vec![LINKED]));

        let session = h
            .processor
            .handle_redirect(CallbackParams::with_error("access_denied"))
            .await;

        assert_eq!(session.phase, LinkPhase::Error);
        assert_eq!(session.message, "authorization rejected");
        assert_eq!(session.error.unwrap().kind(), LinkErrorKind::RejectedByUser);
        assert!(h.backend.calls.lock().unwrap().is_empty());
        assert_eq!(
            h.processor.status_card().actions,
            vec![CardAction::ReturnToDashboard]
        );
        assert!(!h.processor.retry().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_code_is_malformed() {
        let h = harness(ScriptedBackend::default());

        let session = h
            .processor
            .handle_redirect(CallbackParams::default().state("xyz"))
            .await;

        assert_eq!(session.phase, LinkPhase::Error);
        assert_eq!(session.message, "missing authorization code");
        assert!(h.backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_make_one_call() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
        );

        let (a, b) = tokio::join!(
            h.processor.handle_redirect(CallbackParams::with_code("abc123")),
            h.processor.handle_redirect(CallbackParams::with_code("abc123")),
        );

        assert_eq!(h.backend.count("callback"), 1);
        assert!(a.phase == LinkPhase::Success || b.phase == LinkPhase::Success);
        assert_eq!(h.processor.session().phase, LinkPhase::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_terminal() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
        );

        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;
        let linked = h.processor.session();

        let again = h
            .processor
            .handle_redirect(CallbackParams::with_error("access_denied"))
            .await;
        assert!(!h.processor.retry().await);

        assert_eq!(again, linked);
        assert_eq!(h.processor.session(), linked);
        assert_eq!(h.backend.count("callback"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_then_manual_retry() {
        let h = harness(
            ScriptedBackend::default()
                .on(
                    "callback",
                    vec![Reply::Status(400, r#"{"error":"invalid_grant"}"#), LINKED],
                )
                .on("refresh", vec![OK]),
        );

        let failed = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123").state("xyz"))
            .await;
        assert_eq!(failed.phase, LinkPhase::Error);
        assert!(failed.message.contains("invalid_grant"));

        assert!(h.processor.retry().await);
        let session = h.processor.session();
        assert_eq!(session.phase, LinkPhase::Success);
        assert_eq!(session.attempt, 0);
        assert_eq!(h.backend.count("callback"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_exchange_rejected() {
        let h = harness(ScriptedBackend::default().on("callback", vec![Reply::Fail]));

        let session = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;

        assert_eq!(session.phase, LinkPhase::Error);
        assert_eq!(
            session.error.unwrap().kind(),
            LinkErrorKind::ExchangeRejected
        );
        assert_eq!(h.backend.count("callback"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_session_makes_no_calls() {
        let h = harness_with(
            ScriptedBackend::default().on("callback", vec![LINKED]),
            HeadlessWindow::new(),
            StaticSessionHolder::signed_out(),
        );

        let session = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;

        assert_eq!(session.error, Some(LinkError::SessionMissing));
        assert_eq!(session.message, "primary session unavailable");
        assert_eq!(h.backend.count("callback"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stashed_credential_used_and_cleared() {
        let h = harness_with(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
            HeadlessWindow::new(),
            StaticSessionHolder::signed_out(),
        );
        h.storage
            .set_item(&stash_key(PlatformKind::MeditLink), "stashed-token", None)
            .await
            .unwrap();

        let session = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;

        assert_eq!(session.phase, LinkPhase::Success);
        assert_eq!(
            h.backend.calls_to("callback")[0].0.as_deref(),
            Some("Bearer stashed-token")
        );
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_mid_retry_stops_everything() {
        let h = harness(ScriptedBackend::default().on("callback", vec![UNAUTHORIZED]));

        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;
        assert!(h.processor.retry_pending());

        h.processor.teardown();
        assert!(!h.processor.retry_pending());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.backend.count("callback"), 1);
        assert!(!h.processor.retry().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_mid_ticker_stops_timers() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
        );

        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;
        let Harness {
            processor,
            backend,
            window,
            ..
        } = h;
        drop(processor);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(backend.count("refresh"), 1, "only the warm-up");
        assert!(window.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_discards_in_flight_exchange() {
        let h = harness(ScriptedBackend::default().on("callback", vec![Reply::Hang]));

        let pending = h
            .processor
            .handle_redirect(CallbackParams::with_code("abc123"));
        tokio::pin!(pending);

        tokio::select! {
            _ = &mut pending => panic!("exchange should still be in flight"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }

        h.processor.teardown();
        let session = pending.await;
        assert_eq!(session.phase, LinkPhase::Loading);
        assert_eq!(h.processor.wait_until_settled().await.phase, LinkPhase::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_completion_posts_once() {
        let (popup, mut opener) = HeadlessWindow::popup();
        let h = harness_with(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
            popup,
            StaticSessionHolder::signed_in("primary-token"),
        );

        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;

        assert_eq!(
            opener.recv().await.unwrap(),
            serde_json::json!({"type": "MEDITLINK_AUTH_SUCCESS"})
        );
        assert!(opener.try_recv().is_err());
        assert!(h.window.is_closed());
        assert!(!h.processor.redirect_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.window.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_now_skips_delay() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![LINKED])
                .on("refresh", vec![OK]),
        );

        assert!(!h.processor.continue_now());
        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;

        assert!(h.processor.continue_now());
        assert_eq!(h.window.navigations().len(), 1);
        assert!(!h.processor.continue_now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_the_flow() {
        let h = harness(
            ScriptedBackend::default()
                .on("callback", vec![UNAUTHORIZED, LINKED])
                .on("refresh", vec![OK]),
        );
        let mut rx = h.events.subscribe();

        h.processor
            .handle_redirect(CallbackParams::with_code("abc123"))
            .await;
        h.processor.wait_until_settled().await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Link(_) = event {
                seen.push(event.description().to_string());
            }
        }
        assert_eq!(
            seen,
            vec![
                "OAuth callback received",
                "Exchanging authorization code",
                "Exchange retry scheduled",
                "Exchanging authorization code",
                "Platform linked",
                "Dashboard redirect scheduled",
            ]
        );

        let mut rx = h.events.subscribe();
        h.processor.continue_now();
        assert!(matches!(
            rx.try_recv(),
            Ok(CoreEvent::Link(LinkEvent::Navigated { .. }))
        ));
    }
}
