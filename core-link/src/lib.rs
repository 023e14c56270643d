//! # Platform Linking Module
//!
//! Links external scan/CAD platforms (Medit Link, 3Shape) to the lab
//! dashboard through the backend's OAuth endpoints, without ever touching the
//! application's own primary session.
//!
//! ## Components
//!
//! - [`CallbackProcessor`]: completes the authorization-code exchange when
//!   the platform redirects back, retrying while the primary session
//!   propagates
//! - [`RefreshScheduler`]: keeps linked sessions alive, one [`KeepAlive`] each
//! - [`CompletionRouter`]: hands control back to the dashboard or the opener
//!   window
//! - [`AuthStatusCache`] and [`PlatformsDashboard`]: cached linking status
//!   with connect, refresh and disconnect actions
//! - [`LinkService`]: builds all of the above from a
//!   [`core_runtime::LinkConfig`]
//!
//! ## Usage
//!
//! ```no_run
//! use core_link::{LinkService, StaticSessionHolder};
//! use core_runtime::LinkConfig;
//! use std::sync::Arc;
//! # use bridge_traits::WindowHost;
//! # async fn example(window: Arc<dyn WindowHost>) -> core_link::Result<()> {
//! let config = LinkConfig::builder()
//!     .api_base_url("https://api.lab.example/v1")
//!     .window_host(window)
//!     .build()?;
//!
//! let service = LinkService::new(config, Arc::new(StaticSessionHolder::signed_in("token")))?;
//! let processor = service
//!     .handle_callback("/callback/meditlink?code=abc123&state=xyz")
//!     .await?;
//! let session = processor.wait_until_settled().await;
//! println!("{}", session.message);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod callback;
pub mod completion;
pub mod credential;
pub mod dashboard;
pub mod error;
pub mod refresh;
pub mod routes;
pub mod service;
pub mod status;
pub mod types;

pub use api::{ExchangeOutcome, PlatformApi};
pub use callback::CallbackProcessor;
pub use completion::{CompletionMode, CompletionRouter};
pub use credential::{
    resolve_credential, stash_key, CredentialSource, PrimaryCredential, PrimarySessionHolder,
    StaticSessionHolder,
};
pub use dashboard::{PlatformAction, PlatformCard, PlatformsDashboard};
pub use error::{LinkError, LinkErrorKind, Result};
pub use refresh::{KeepAlive, RefreshScheduler};
pub use routes::CallbackRoute;
pub use service::LinkService;
pub use status::{AuthStatusCache, StatusCacheDeps, StatusState};
pub use types::{
    AuthStatusSnapshot, CallbackParams, CardAction, FlowId, LinkPhase, LinkSession, LinkedUser,
    PlatformKind, StatusCard,
};
