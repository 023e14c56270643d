//! Headless window host
//!
//! Stands in for a browser window in desktop shells and tests. Navigations
//! are recorded and published on a watch channel. A popup variant forwards
//! opener messages over an unbounded channel held by the opener side.

use bridge_traits::{
    error::{BridgeError, Result},
    window::WindowHost,
};
use core_async::sync::{mpsc, watch};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Headless [`WindowHost`] implementation
#[derive(Debug)]
pub struct HeadlessWindow {
    opener: Option<mpsc::UnboundedSender<serde_json::Value>>,
    history: Mutex<Vec<String>>,
    route: watch::Sender<Option<String>>,
    closed: AtomicBool,
}

impl HeadlessWindow {
    /// A primary window with no opener.
    pub fn new() -> Self {
        Self::with_opener(None)
    }

    /// A popup window. The returned receiver is the opener's end.
    pub fn popup() -> (Self, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_opener(Some(tx)), rx)
    }

    fn with_opener(opener: Option<mpsc::UnboundedSender<serde_json::Value>>) -> Self {
        let (route, _) = watch::channel(None);
        Self {
            opener,
            history: Mutex::new(Vec::new()),
            route,
            closed: AtomicBool::new(false),
        }
    }

    /// Every target passed to [`WindowHost::navigate`], oldest first.
    pub fn navigations(&self) -> Vec<String> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The most recent navigation target.
    pub fn current_route(&self) -> Option<String> {
        self.route.borrow().clone()
    }

    /// Observe navigations as they happen.
    pub fn subscribe_route(&self) -> watch::Receiver<Option<String>> {
        self.route.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::Window("window is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for HeadlessWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowHost for HeadlessWindow {
    fn has_opener(&self) -> bool {
        self.opener.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn post_to_opener(&self, message: &serde_json::Value) -> Result<()> {
        self.ensure_open()?;
        let opener = self
            .opener
            .as_ref()
            .ok_or_else(|| BridgeError::Window("window has no opener".to_string()))?;

        opener
            .send(message.clone())
            .map_err(|_| BridgeError::Window("opener window has gone away".to_string()))?;
        debug!("Posted message to opener");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Window closed");
        }
        Ok(())
    }

    fn navigate(&self, target: &str) -> Result<()> {
        self.ensure_open()?;
        match self.history.lock() {
            Ok(mut history) => history.push(target.to_string()),
            Err(poisoned) => poisoned.into_inner().push(target.to_string()),
        }
        self.route.send_replace(Some(target.to_string()));
        debug!(route = target, "Navigated");
        Ok(())
    }
}
