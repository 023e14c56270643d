//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop shells and
//! headless hosts.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with a persistent cookie jar for
//!   credentialed requests
//! - `SessionStorage` as an in-memory map with per-entry expiry
//! - `WindowHost` as a headless window that records navigations and can
//!   play the popup role with an in-process opener channel
//! - `LifecycleObserver` driven by the host's focus events
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HeadlessWindow, MemorySessionStorage, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http_client = Arc::new(ReqwestHttpClient::new()?);
//!     let storage = Arc::new(MemorySessionStorage::new());
//!     let window = Arc::new(HeadlessWindow::new());
//!
//!     // Use in LinkConfig
//!     Ok(())
//! }
//! ```

mod http;
mod lifecycle;
mod session_storage;
mod window;

pub use http::ReqwestHttpClient;
pub use lifecycle::DesktopLifecycleObserver;
pub use session_storage::MemorySessionStorage;
pub use window::HeadlessWindow;
