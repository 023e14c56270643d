//! Workspace facade crate.
//!
//! Host applications can depend on `labdesk-workspace` and pick a feature
//! instead of wiring each crate individually:
//!
//! - `desktop-shims` (default): the linking core plus desktop bridge
//!   implementations (reqwest, in-memory session storage, headless window).
//! - `headless`: the linking core only; the host injects every bridge.

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_link as link;

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;
