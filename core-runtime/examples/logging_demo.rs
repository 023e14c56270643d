//! Logging system demonstration
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run -p core-runtime --example logging_demo
//!
//! # JSON format
//! cargo run -p core-runtime --example logging_demo -- json
//!
//! # Compact format with a custom filter
//! cargo run -p core-runtime --example logging_demo -- compact "logging_demo=trace"
//! ```

use bridge_traits::time::{ConsoleLogger, LogLevel};
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::env;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let filter = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "logging_demo=trace,core_runtime=debug".to_string());

    let config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace)
        .with_filter(filter)
        .with_logger_sink(Arc::new(ConsoleLogger {
            min_level: LogLevel::Warn,
        }));

    init_logging(config)?;

    info!(format = ?format, "Logging initialized");

    simulate_callback("meditlink", "abc123").await;
    simulate_refresh_failures("3shape", 3).await;

    // Manual redaction for values logged outside of structured fields
    info!(
        user = %redact_if_sensitive("email", "jane.doe@lab.example"),
        "Linked account owner"
    );

    Ok(())
}

#[instrument(skip(code))]
async fn simulate_callback(platform: &str, code: &str) {
    info!(code_len = code.len(), "Callback received");
    for attempt in 0..2u32 {
        debug!(attempt, "Exchanging authorization code");
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
    }
    info!("Platform linked");
}

#[instrument]
async fn simulate_refresh_failures(platform: &str, failures: u32) {
    for consecutive in 1..=failures {
        warn!(consecutive_failures = consecutive, "Session refresh failed");
    }
    warn!("Session refresh degraded");
}
