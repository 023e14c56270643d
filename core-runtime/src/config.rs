//! # Link Configuration
//!
//! Builder-based configuration for the linking core.
//!
//! ## Overview
//!
//! [`LinkConfig`] holds every host capability and timing the core needs.
//! The builder validates eagerly and reports missing capabilities with an
//! actionable message instead of failing later inside a flow.
//!
//! ## Required
//!
//! - `api_base_url` - Backend base URL, e.g. `https://api.lab.example/`
//! - `WindowHost` - Navigation and opener messaging
//!
//! ## Optional (with desktop defaults)
//!
//! - `HttpClient` - desktop default: `ReqwestHttpClient` with a cookie jar
//! - `SessionStorage` - desktop default: `MemorySessionStorage`
//! - `LifecycleObserver` - focus revalidation is disabled without one
//! - `Clock` - defaults to `SystemClock`
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::LinkConfig;
//! use bridge_desktop::HeadlessWindow;
//! use std::sync::Arc;
//!
//! let config = LinkConfig::builder()
//!     .api_base_url("https://api.lab.example/")
//!     .window_host(Arc::new(HeadlessWindow::new()))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::EventBus;
use bridge_traits::{
    Clock, HttpClient, LifecycleObserver, SessionStorage, SystemClock, WindowHost,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Placeholder substituted with the platform slug in the dashboard route.
pub const PLATFORM_PLACEHOLDER: &str = "{platform}";

/// Default dashboard route template.
pub const DEFAULT_DASHBOARD_ROUTE: &str = "/dashboard/{platform}";

/// Timings and limits of the linking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    /// Automatic retries after a 401 from the exchange endpoint
    pub max_retries: u32,
    /// Fixed delay before each automatic retry
    pub retry_delay: Duration,
    /// Delay before navigating to the dashboard in primary-window mode
    pub redirect_delay: Duration,
    /// Keep-alive refresh period once linked
    pub refresh_interval: Duration,
    /// Status revalidation period
    pub status_poll_interval: Duration,
    /// Consecutive refresh failures that mark the session degraded
    pub refresh_failure_threshold: u32,
    /// Lifetime of the stashed primary credential during authorization
    pub credential_stash_ttl: Duration,
    /// Per-request timeout for backend calls
    pub request_timeout: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            redirect_delay: Duration::from_secs(3),
            refresh_interval: Duration::from_secs(30),
            status_poll_interval: Duration::from_secs(30),
            refresh_failure_threshold: 3,
            credential_stash_ttl: Duration::from_secs(10 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl LinkTimings {
    /// Validates limits and periods.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries > 10 {
            return Err(Error::Config(
                "max_retries exceeds the limit of 10. Each retry resubmits a one-time code."
                    .to_string(),
            ));
        }

        for (name, value) in [
            ("refresh_interval", self.refresh_interval),
            ("status_poll_interval", self.status_poll_interval),
            ("request_timeout", self.request_timeout),
            ("credential_stash_ttl", self.credential_stash_ttl),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }

        if self.refresh_failure_threshold == 0 {
            return Err(Error::Config(
                "refresh_failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for the linking core.
///
/// Use [`LinkConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct LinkConfig {
    /// Backend base URL; platform endpoints are resolved against it
    pub api_base_url: Url,
    pub http_client: Arc<dyn HttpClient>,
    pub session_storage: Arc<dyn SessionStorage>,
    pub window_host: Arc<dyn WindowHost>,
    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
    pub timings: LinkTimings,
    /// Route template containing `{platform}`
    pub dashboard_route: String,
}

impl fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("http_client", &"HttpClient { ... }")
            .field("session_storage", &"SessionStorage { ... }")
            .field("window_host", &"WindowHost { ... }")
            .field(
                "lifecycle_observer",
                &self
                    .lifecycle_observer
                    .as_ref()
                    .map(|_| "LifecycleObserver { ... }"),
            )
            .field("event_bus", &self.event_bus)
            .field("timings", &self.timings)
            .field("dashboard_route", &self.dashboard_route)
            .finish()
    }
}

impl LinkConfig {
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }

    /// Dashboard route for a platform slug.
    pub fn dashboard_route_for(&self, slug: &str) -> String {
        self.dashboard_route.replace(PLATFORM_PLACEHOLDER, slug)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - `api_base_url` is http(s) and can be a base for relative paths
    /// - timings are within limits
    /// - dashboard route is an in-app path containing `{platform}`
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.api_base_url)?;
        self.timings.validate()?;

        if !self.dashboard_route.starts_with('/') {
            return Err(Error::Config(format!(
                "Dashboard route '{}' must start with '/'",
                self.dashboard_route
            )));
        }

        if !self.dashboard_route.contains(PLATFORM_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "Dashboard route '{}' must contain the {} placeholder",
                self.dashboard_route, PLATFORM_PLACEHOLDER
            )));
        }

        Ok(())
    }
}

fn validate_base_url(url: &Url) -> Result<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "API base URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!(
            "API base URL '{}' cannot be used as a base for endpoint paths",
            url
        )));
    }
    Ok(())
}

/// Parses a base URL and ensures a trailing slash so relative endpoint
/// paths are appended instead of replacing the last segment.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn window_host_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "WindowHost".to_string(),
        message: "WindowHost implementation is required to finish linking flows. \
                 Desktop: use bridge_desktop::HeadlessWindow. \
                 Web views: inject an adapter over window.opener, window.close and the router."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for backend calls. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject an adapter that honours with_credentials."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn session_storage_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SessionStorage".to_string(),
        message: "SessionStorage implementation is required to carry the primary credential \
                 across the authorization redirect. \
                 Desktop: enable the 'desktop-shims' feature to use MemorySessionStorage. \
                 Web views: inject an adapter over window.sessionStorage."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| {
        Error::Internal(format!("Failed to create default HttpClient: {}", e))
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_session_storage() -> Result<Arc<dyn SessionStorage>> {
    use bridge_desktop::MemorySessionStorage;

    let storage: Arc<dyn SessionStorage> = Arc::new(MemorySessionStorage::new());
    Ok(storage)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_session_storage() -> Result<Arc<dyn SessionStorage>> {
    Err(session_storage_missing_error())
}

/// Builder for [`LinkConfig`].
#[derive(Default)]
pub struct LinkConfigBuilder {
    api_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    session_storage: Option<Arc<dyn SessionStorage>>,
    window_host: Option<Arc<dyn WindowHost>>,
    lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
    timings: Option<LinkTimings>,
    dashboard_route: Option<String>,
}

impl LinkConfigBuilder {
    /// Sets the backend base URL (required).
    ///
    /// ```
    /// use core_runtime::config::LinkConfig;
    ///
    /// let builder = LinkConfig::builder().api_base_url("https://api.lab.example/v1");
    /// ```
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the HTTP client. Must keep a cookie jar for `with_credentials`
    /// requests.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn session_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    /// Sets the window host (required).
    pub fn window_host(mut self, window: Arc<dyn WindowHost>) -> Self {
        self.window_host = Some(window);
        self
    }

    /// Enables revalidation on focus.
    pub fn lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Shares an existing event bus instead of creating a new one.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn timings(mut self, timings: LinkTimings) -> Self {
        self.timings = Some(timings);
        self
    }

    /// Sets the dashboard route template. Default: `/dashboard/{platform}`.
    pub fn dashboard_route(mut self, template: impl Into<String>) -> Self {
        self.dashboard_route = Some(template.into());
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when `api_base_url` is missing or unusable, or a
    ///   timing/route value is invalid
    /// - `Error::InvalidUrl` when `api_base_url` does not parse
    /// - `Error::CapabilityMissing` when a required bridge is absent and no
    ///   desktop default applies
    pub fn build(self) -> Result<LinkConfig> {
        let raw_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;
        let api_base_url = parse_base_url(&raw_url)?;

        let window_host = self.window_host.ok_or_else(window_host_missing_error)?;
        let timings = self.timings.unwrap_or_default();

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(timings.request_timeout)?,
        };

        let session_storage = match self.session_storage {
            Some(storage) => storage,
            None => provide_default_session_storage()?,
        };

        let config = LinkConfig {
            api_base_url,
            http_client,
            session_storage,
            window_host,
            lifecycle_observer: self.lifecycle_observer,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_bus: self.event_bus.unwrap_or_default(),
            timings,
            dashboard_route: self
                .dashboard_route
                .unwrap_or_else(|| DEFAULT_DASHBOARD_ROUTE.to_string()),
        };

        config.validate()?;

        Ok(config)
    }
}
