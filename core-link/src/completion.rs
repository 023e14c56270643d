//! Completion router
//!
//! Ends a successful flow in one of two ways:
//!
//! - **Popup**: the window has a live opener. Post the platform's
//!   `<PLATFORM>_AUTH_SUCCESS` message once, then close.
//! - **Primary window**: navigate to the platform dashboard after a delay.
//!   "Continue now" skips the wait. Navigation happens at most once.

use crate::types::{FlowId, PlatformKind};
use bridge_traits::WindowHost;
use core_async::timer::Delay;
use core_runtime::events::{CoreEvent, EventBus, LinkEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a completion was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionMode {
    /// Opener notified and window closed
    Popup,
    /// Navigation to `route` scheduled after `delay`
    Redirect { route: String, delay: Duration },
}

#[derive(Serialize)]
struct OpenerMessage {
    #[serde(rename = "type")]
    kind: &'static str,
}

pub struct CompletionRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    platform: PlatformKind,
    flow_id: FlowId,
    window: Arc<dyn WindowHost>,
    events: EventBus,
    route: String,
    delay: Duration,
    completed: AtomicBool,
    navigated: AtomicBool,
    pending: Mutex<Option<Delay>>,
}

impl RouterInner {
    fn pending(&self) -> MutexGuard<'_, Option<Delay>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn navigate_once(&self) -> bool {
        if self.navigated.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Err(e) = self.window.navigate(&self.route) {
            warn!(platform = self.platform.slug(), error = %e, "Dashboard navigation failed");
            return false;
        }

        info!(platform = self.platform.slug(), route = %self.route, "Navigated to dashboard");
        self.events
            .emit(CoreEvent::Link(LinkEvent::Navigated {
                platform: self.platform.slug().to_string(),
                flow_id: self.flow_id.to_string(),
                route: self.route.clone(),
            }))
            .ok();
        true
    }

    fn notify_opener(&self) -> bool {
        let message = match serde_json::to_value(OpenerMessage {
            kind: self.platform.success_message_type(),
        }) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to encode opener message");
                return false;
            }
        };

        if let Err(e) = self.window.post_to_opener(&message) {
            warn!(platform = self.platform.slug(), error = %e, "Opener did not take the message");
            return false;
        }

        if let Err(e) = self.window.close() {
            warn!(platform = self.platform.slug(), error = %e, "Popup could not close itself");
        }

        info!(platform = self.platform.slug(), "Opener notified, popup closed");
        self.events
            .emit(CoreEvent::Link(LinkEvent::PopupCompleted {
                platform: self.platform.slug().to_string(),
                flow_id: self.flow_id.to_string(),
            }))
            .ok();
        true
    }
}

impl CompletionRouter {
    pub fn new(
        platform: PlatformKind,
        flow_id: FlowId,
        window: Arc<dyn WindowHost>,
        events: EventBus,
        route: String,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                platform,
                flow_id,
                window,
                events,
                route,
                delay,
                completed: AtomicBool::new(false),
                navigated: AtomicBool::new(false),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Finishes the flow. Returns `None` if the router already completed.
    ///
    /// A popup whose opener refuses the message falls back to the
    /// primary-window redirect.
    pub fn complete(&self) -> Option<CompletionMode> {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            debug!(platform = self.inner.platform.slug(), "Completion already handled");
            return None;
        }

        if self.inner.window.has_opener() && self.inner.notify_opener() {
            return Some(CompletionMode::Popup);
        }

        let weak: Weak<RouterInner> = Arc::downgrade(&self.inner);
        let delay = Delay::after(self.inner.delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.navigate_once();
            }
        });
        *self.inner.pending() = Some(delay);

        debug!(
            platform = self.inner.platform.slug(),
            route = %self.inner.route,
            delay_ms = self.inner.delay.as_millis() as u64,
            "Dashboard redirect scheduled"
        );
        self.inner
            .events
            .emit(CoreEvent::Link(LinkEvent::CompletionScheduled {
                platform: self.inner.platform.slug().to_string(),
                flow_id: self.inner.flow_id.to_string(),
                route: self.inner.route.clone(),
                delay_ms: self.inner.delay.as_millis() as u64,
            }))
            .ok();

        Some(CompletionMode::Redirect {
            route: self.inner.route.clone(),
            delay: self.inner.delay,
        })
    }

    /// Skips the remaining delay. Returns `false` when nothing was pending.
    pub fn continue_now(&self) -> bool {
        let pending = self.inner.pending().take();
        match pending {
            Some(delay) if delay.is_pending() => {
                delay.cancel();
                self.inner.navigate_once()
            }
            _ => false,
        }
    }

    /// Cancels a scheduled navigation.
    pub fn cancel(&self) {
        if let Some(delay) = self.inner.pending().take() {
            delay.cancel();
        }
    }

    /// `true` while a redirect is waiting to fire.
    pub fn is_scheduled(&self) -> bool {
        self.inner.pending().as_ref().is_some_and(Delay::is_pending)
    }

    /// Time left before the scheduled redirect.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .pending()
            .as_ref()
            .filter(|delay| delay.is_pending())
            .map(Delay::remaining)
    }

    pub fn route(&self) -> &str {
        &self.inner.route
    }
}

impl Drop for CompletionRouter {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::HeadlessWindow;

    fn router(window: Arc<HeadlessWindow>) -> CompletionRouter {
        CompletionRouter::new(
            PlatformKind::MeditLink,
            FlowId::new(),
            window,
            EventBus::default(),
            "/dashboard/meditlink".to_string(),
            Duration::from_secs(3),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_fires_after_delay() {
        let window = Arc::new(HeadlessWindow::new());
        let router = router(window.clone());

        assert_eq!(
            router.complete(),
            Some(CompletionMode::Redirect {
                route: "/dashboard/meditlink".to_string(),
                delay: Duration::from_secs(3),
            })
        );
        assert!(router.is_scheduled());
        assert_eq!(router.remaining(), Some(Duration::from_secs(3)));

        tokio::time::sleep(Duration::from_millis(2_999)).await;
        assert!(window.navigations().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(window.navigations(), vec!["/dashboard/meditlink".to_string()]);
        assert!(!router.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_now_navigates_once() {
        let window = Arc::new(HeadlessWindow::new());
        let router = router(window.clone());
        router.complete();

        assert!(router.continue_now());
        assert!(!router.continue_now());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(window.navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_stop_redirect() {
        let window = Arc::new(HeadlessWindow::new());
        let router = router(window.clone());
        router.complete();
        router.cancel();
        assert!(!router.is_scheduled());

        let second = self::router(window.clone());
        second.complete();
        drop(second);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(window.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_posts_once_and_closes() {
        let (popup, mut opener) = HeadlessWindow::popup();
        let window = Arc::new(popup);
        let router = router(window.clone());

        assert_eq!(router.complete(), Some(CompletionMode::Popup));
        assert_eq!(router.complete(), None);
        assert!(window.is_closed());
        assert!(!router.is_scheduled());

        let message = opener.recv().await.unwrap();
        assert_eq!(message, serde_json::json!({"type": "MEDITLINK_AUTH_SUCCESS"}));
        assert!(opener.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(window.navigations().is_empty());
    }
}
