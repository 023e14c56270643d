//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the linking core:
//! - Configuration ([`config::LinkConfig`]) with fail-fast capability checks
//! - Event bus ([`events::EventBus`]) for link and session notifications
//! - Logging and tracing setup ([`logging::init_logging`])

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{LinkConfig, LinkConfigBuilder, LinkTimings};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, LinkEvent, SessionEvent};
