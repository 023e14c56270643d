//! Window Host Abstraction
//!
//! The window the linking flow runs in. A flow either runs in the primary
//! application window, where it finishes by navigating to a dashboard route,
//! or in a popup opened by the primary window, where it reports back to its
//! opener and closes itself.

use crate::error::Result;

/// Window capabilities used to finish a linking flow
///
/// All methods are synchronous: they only enqueue work with the host
/// (post a message, request a close, change the route).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::window::WindowHost;
/// use serde_json::json;
///
/// fn finish(window: &dyn WindowHost) -> Result<()> {
///     if window.has_opener() {
///         window.post_to_opener(&json!({ "type": "MEDITLINK_AUTH_SUCCESS" }))?;
///         window.close()
///     } else {
///         window.navigate("/dashboard/meditlink")
///     }
/// }
/// ```
pub trait WindowHost: Send + Sync {
    /// Returns `true` when this window was opened by another live window.
    fn has_opener(&self) -> bool;

    /// Post a structured message to the opener window.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Window` when there is no opener or the opener
    /// has gone away.
    fn post_to_opener(&self, message: &serde_json::Value) -> Result<()>;

    /// Close this window.
    fn close(&self) -> Result<()>;

    /// Navigate this window to an in-app route or an absolute URL.
    fn navigate(&self, target: &str) -> Result<()>;
}
