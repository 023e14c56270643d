//! # Event Bus System
//!
//! Typed, best-effort notifications from the linking core to the host, built
//! on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`LinkEvent`] covers one callback flow from redirect to
//!   completion; [`SessionEvent`] covers the external session after linking
//!   (refresh loop, cached status).
//! - **EventBus**: cloneable broadcast sender shared by every component.
//! - **EventStream**: receiver wrapper with an optional filter.
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ CallbackProcessor├────────>│           ├────────────>│ Host UI    │
//! ├──────────────────┤         │ EventBus  │             └────────────┘
//! │ RefreshScheduler ├────────>│ (broadcast│  subscribe  ┌────────────┐
//! ├──────────────────┤         │  channel) ├────────────>│ Telemetry  │
//! │ AuthStatusCache  ├────────>│           │             └────────────┘
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LinkEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Link(LinkEvent::Unlinked {
//!         platform: "meditlink".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Link(LinkEvent::Unlinked { .. })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Emission is best-effort: `emit` fails only when nobody is subscribed, and
//! producers ignore that with `.ok()`. Subscribers that fall behind receive
//! `RecvError::Lagged(n)` and keep going; `RecvError::Closed` means every
//! sender is gone.

use serde::{Deserialize, Serialize};
use std::fmt;
use core_async::sync::broadcast;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Callback flow events
    Link(LinkEvent),
    /// External session events
    Session(SessionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Link(e) => e.description(),
            CoreEvent::Session(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Link(LinkEvent::LinkFailed { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::RefreshDegraded { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::RefreshFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Link(LinkEvent::RetryScheduled { .. }) => EventSeverity::Warning,
            CoreEvent::Link(LinkEvent::Linked { .. }) => EventSeverity::Info,
            CoreEvent::Link(LinkEvent::Unlinked { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Platform slug the event belongs to.
    pub fn platform(&self) -> &str {
        match self {
            CoreEvent::Link(e) => e.platform(),
            CoreEvent::Session(e) => e.platform(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Link Events
// ============================================================================

/// Events of one callback flow. `flow_id` correlates all events of a flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LinkEvent {
    /// A redirect was observed on the callback route.
    CallbackReceived {
        platform: String,
        flow_id: String,
        has_code: bool,
        has_error: bool,
    },
    /// An exchange request is about to be sent.
    ExchangeStarted {
        platform: String,
        flow_id: String,
        /// Retry counter at the time of the request (0 for the first call).
        attempt: u32,
    },
    /// The backend answered 401; another exchange is scheduled.
    RetryScheduled {
        platform: String,
        flow_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// The platform account is linked.
    Linked {
        platform: String,
        flow_id: String,
        group_name: Option<String>,
    },
    /// The flow reached the error phase.
    LinkFailed {
        platform: String,
        flow_id: String,
        /// Error class, e.g. `rejected_by_user`, `transient_auth`.
        kind: String,
        message: String,
        /// Whether the card offers a manual retry.
        retryable: bool,
    },
    /// Primary-window mode: navigation to the dashboard is scheduled.
    CompletionScheduled {
        platform: String,
        flow_id: String,
        route: String,
        delay_ms: u64,
    },
    /// The window navigated away from the callback view.
    Navigated {
        platform: String,
        flow_id: String,
        route: String,
    },
    /// Popup mode: the opener was notified and the popup closed.
    PopupCompleted { platform: String, flow_id: String },
    /// The platform account was unlinked.
    Unlinked { platform: String },
}

impl LinkEvent {
    fn description(&self) -> &str {
        match self {
            LinkEvent::CallbackReceived { .. } => "OAuth callback received",
            LinkEvent::ExchangeStarted { .. } => "Exchanging authorization code",
            LinkEvent::RetryScheduled { .. } => "Exchange retry scheduled",
            LinkEvent::Linked { .. } => "Platform linked",
            LinkEvent::LinkFailed { .. } => "Platform linking failed",
            LinkEvent::CompletionScheduled { .. } => "Dashboard redirect scheduled",
            LinkEvent::Navigated { .. } => "Navigated to dashboard",
            LinkEvent::PopupCompleted { .. } => "Popup flow completed",
            LinkEvent::Unlinked { .. } => "Platform unlinked",
        }
    }

    fn platform(&self) -> &str {
        match self {
            LinkEvent::CallbackReceived { platform, .. }
            | LinkEvent::ExchangeStarted { platform, .. }
            | LinkEvent::RetryScheduled { platform, .. }
            | LinkEvent::Linked { platform, .. }
            | LinkEvent::LinkFailed { platform, .. }
            | LinkEvent::CompletionScheduled { platform, .. }
            | LinkEvent::Navigated { platform, .. }
            | LinkEvent::PopupCompleted { platform, .. }
            | LinkEvent::Unlinked { platform } => platform,
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Events of the external session once a platform is linked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The user was sent to the platform's authorization page.
    AuthorizationStarted { platform: String },
    /// A keep-alive refresh succeeded.
    RefreshSucceeded { platform: String },
    /// A keep-alive refresh failed. The link phase is unaffected.
    RefreshFailed {
        platform: String,
        consecutive_failures: u32,
        message: String,
    },
    /// Consecutive refresh failures reached the degradation threshold.
    RefreshDegraded {
        platform: String,
        consecutive_failures: u32,
    },
    /// The cached `authenticated` flag changed.
    StatusChanged {
        platform: String,
        authenticated: bool,
    },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::AuthorizationStarted { .. } => "Authorization started",
            SessionEvent::RefreshSucceeded { .. } => "Session refreshed",
            SessionEvent::RefreshFailed { .. } => "Session refresh failed",
            SessionEvent::RefreshDegraded { .. } => "Session refresh degraded",
            SessionEvent::StatusChanged { .. } => "Link status changed",
        }
    }

    fn platform(&self) -> &str {
        match self {
            SessionEvent::AuthorizationStarted { platform }
            | SessionEvent::RefreshSucceeded { platform }
            | SessionEvent::RefreshFailed { platform, .. }
            | SessionEvent::RefreshDegraded { platform, .. }
            | SessionEvent::StatusChanged { platform, .. } => platform,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let meditlink_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.platform() == "meditlink");
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Receives a matching event without waiting. `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
