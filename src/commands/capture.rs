// ABOUTME: Capture command - runs backfill and incremental capture, writing JSON lines to stdout
// ABOUTME: State is checkpointed to a file so an interrupted capture resumes where it stopped

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::EndpointConfig;
use crate::flashback::daemon::{CaptureDaemon, DaemonConfig};
use crate::flashback::sink::JsonLinesSink;
use crate::flashback::state::CaptureState;
use crate::oracledb;

/// Run capture until `cancel` fires, or for a single cycle when `once` is set.
pub async fn capture(
    config: &EndpointConfig,
    state_path: &Path,
    once: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let state = CaptureState::load_or_new(state_path, &config.address).await?;
    tracing::info!(
        "Using capture state {:?} ({} binding(s))",
        state_path,
        state.bindings.len()
    );

    let db = oracledb::connect(config)
        .await
        .context("Failed to connect to source database")?;
    let daemon = CaptureDaemon::new(Arc::new(db), DaemonConfig::from_endpoint(config));
    let sink = JsonLinesSink::new(tokio::io::stdout(), state.clone(), state_path.to_path_buf());

    let sessions = daemon
        .start(&state, &sink)
        .await
        .context("Failed to start capture")?;

    if !once {
        daemon.run(sessions, &sink, cancel).await?;
        return Ok(());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!("Shutdown signal received, abandoning capture cycle");
            Ok(())
        }
        stats = daemon.run_cycle(&sessions, &sink) => {
            tracing::info!(
                "Capture completed: {} tables, {} rows backfilled, {} changes in {}ms",
                stats.tables_captured,
                stats.rows_backfilled,
                stats.changes_emitted,
                stats.duration_ms
            );
            if !stats.is_success() {
                bail!(
                    "Capture failed for {} table(s): {}",
                    stats.errors.len(),
                    stats.errors.join("; ")
                );
            }
            Ok(())
        }
    }
}
