//! Lifecycle Observation
//!
//! Foreground/background transitions of the host window. The status cache
//! revalidates whenever the window regains focus.

use async_trait::async_trait;

use crate::error::Result;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Window is visible and focused
    Foreground,
    /// Window is hidden or lost focus
    Background,
    /// Window is being torn down
    Suspended,
}

impl LifecycleState {
    pub fn is_foreground(&self) -> bool {
        matches!(self, LifecycleState::Foreground)
    }
}

/// Lifecycle observer trait
///
/// # Platform Support
///
/// - **Desktop**: window focus/minimize events
/// - **Web views**: Page Visibility API and `focus` events
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{LifecycleObserver, LifecycleState};
///
/// async fn watch_focus(observer: &dyn LifecycleObserver) -> Result<()> {
///     let mut stream = observer.subscribe_changes().await?;
///
///     while let Some(state) = stream.next().await {
///         if state == LifecycleState::Foreground {
///             revalidate().await;
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Get current lifecycle state
    async fn get_state(&self) -> Result<LifecycleState>;

    /// Subscribe to lifecycle state changes
    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>>;
}

/// Stream of lifecycle state changes
#[async_trait]
pub trait LifecycleChangeStream: Send {
    /// Get the next lifecycle state update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<LifecycleState>;
}
