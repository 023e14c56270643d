//! # Host Bridge Traits
//!
//! Capability traits the linking core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to the network, the browser window or session
//! storage directly. Each capability is a trait implemented once per host
//! (desktop shell, embedded web view, test harness) and injected through
//! `core_runtime::config::LinkConfig`.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP with bearer auth and an optional cookie jar
//!
//! ### Storage
//! - [`SessionStorage`](storage::SessionStorage) - Short-lived, per-tab key/value storage
//!
//! ### Window
//! - [`WindowHost`](window::WindowHost) - Opener messaging, self-close and route navigation
//! - [`LifecycleObserver`](background::LifecycleObserver) - Foreground/background transitions
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! use core_runtime::error::Error;
//!
//! let window_host = builder.window_host.ok_or_else(|| Error::CapabilityMissing {
//!     capability: "WindowHost".to_string(),
//!     message: "No window host provided. \
//!               Desktop: use bridge_desktop::HeadlessWindow. \
//!               Web views: inject the host window adapter.".to_string(),
//! })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert host-specific failures into it and keep the message actionable.
//! The core maps bridge errors into its own taxonomy at the boundary.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! across the processor, the refresh ticker and the status cache.

pub mod background;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;
pub mod window;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::SessionStorage;
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use window::WindowHost;
