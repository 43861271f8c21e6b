//! input-tracker headless host.
//!
//! Starts tracking with a consumer that writes every event to stdout as one
//! JSON object per line, then waits for Ctrl-C and shuts the session down
//! with a bounded join.  Logs go to stderr so stdout stays machine-readable.
//!
//! ```text
//! $ input-tracker
//! {"type":"key","code":65}
//! {"type":"mouse","code":0}
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- platform config file or defaults
//!  └─ Tracker::from_config()    -- picks the backend for this OS
//!  └─ start_tracking(stdout consumer)
//!       ├─ capture thread       (hooks / event tap / evdev)
//!       └─ dispatch thread      (runs the consumer)
//!  └─ ctrl_c → Tracker::shutdown()
//! ```

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tracker_agent::application::tracking::{BoxedConsumer, Tracker};
use tracker_agent::infrastructure::storage::config::{self, AppConfig};
use tracker_core::{EventKind, InputEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = config::load_config();
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.tracker.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("using default configuration: {e}");
        AppConfig::default()
    });

    info!("input-tracker starting");

    let tracker = Arc::new(Tracker::from_config(&config).context("selecting capture backend")?);
    let status = tracker
        .start_tracking(Some(stdout_consumer()))
        .context("starting capture")?;
    info!(backend = %tracker.session().backend_kind(), "{status}.  Press Ctrl-C to exit.");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown signal received");

    let shutdown = Arc::clone(&tracker);
    let status = tokio::task::spawn_blocking(move || shutdown.shutdown())
        .await
        .context("shutdown task panicked")??;
    info!("{status}");
    Ok(())
}

/// Writes each event as a JSON line.  Runs on the dispatch thread.
fn stdout_consumer() -> BoxedConsumer {
    Box::new(|kind: EventKind, code: i64| {
        let mut out = std::io::stdout().lock();
        let written = serde_json::to_writer(&mut out, &InputEvent { kind, code })
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            debug!("dropping event, stdout unavailable: {e}");
        }
    })
}
