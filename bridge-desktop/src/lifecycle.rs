//! Focus-driven lifecycle observer

use async_trait::async_trait;
use bridge_traits::{
    background::{LifecycleChangeStream, LifecycleObserver, LifecycleState},
    error::Result,
};
use core_async::sync::watch;
use tracing::debug;

/// Desktop lifecycle observer.
///
/// The host shell reports focus changes through [`set_state`](Self::set_state);
/// subscribers see each distinct transition. Starts in the foreground.
#[derive(Debug)]
pub struct DesktopLifecycleObserver {
    state: watch::Sender<LifecycleState>,
}

impl DesktopLifecycleObserver {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Foreground);
        Self { state }
    }

    /// Report a lifecycle transition from the host.
    pub fn set_state(&self, state: LifecycleState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(?state, "Lifecycle state changed");
        }
    }

    pub fn focus(&self) {
        self.set_state(LifecycleState::Foreground);
    }

    pub fn blur(&self) {
        self.set_state(LifecycleState::Background);
    }
}

impl Default for DesktopLifecycleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleObserver for DesktopLifecycleObserver {
    async fn get_state(&self) -> Result<LifecycleState> {
        Ok(*self.state.borrow())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>> {
        Ok(Box::new(DesktopLifecycleChangeStream {
            rx: self.state.subscribe(),
        }))
    }
}

/// Yields each state change after subscription.
struct DesktopLifecycleChangeStream {
    rx: watch::Receiver<LifecycleState>,
}

#[async_trait]
impl LifecycleChangeStream for DesktopLifecycleChangeStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.rx.changed().await.ok()?;
        let state = *self.rx.borrow_and_update();
        Some(state)
    }
}
