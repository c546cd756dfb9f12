// ABOUTME: CaptureDaemon - validates retention, opens table sessions, and runs capture cycles
// ABOUTME: Each cycle drains pending backfills, then reads one change window per table

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::coordinator::PhaseCoordinator;
use super::database::FlashbackDatabase;
use super::discovery::{catalog_tables, discover_tables, ensure_readable, DiscoveryOptions};
use super::retention::{validate_flashback, RetentionReport};
use super::session::{SessionState, StepOutcome, TableSession};
use super::sink::CaptureSink;
use super::snapshot;
use super::state::{CaptureState, ResourceState, SessionStatus};
use super::types::Table;
use crate::config::EndpointConfig;
use crate::error::Result;
use crate::utils::Backoff;

/// Configuration for the CaptureDaemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Interval between capture cycles
    pub poll_interval: Duration,
    /// Maximum rows per backfill query
    pub chunk_size: usize,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub skip_retention_checks: bool,
    pub discovery: DiscoveryOptions,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300), // 5 minutes
            chunk_size: 50_000,
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            skip_retention_checks: false,
            discovery: DiscoveryOptions::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_endpoint(config: &EndpointConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            chunk_size: config.advanced.backfill_chunk_size,
            max_retries: config.advanced.max_retries,
            initial_backoff: config.initial_backoff(),
            skip_retention_checks: config.advanced.skip_flashback_retention_checks,
            discovery: DiscoveryOptions {
                owners: config.owners.clone(),
                filter: config.filter.clone(),
                key_overrides: config.advanced.key_overrides.clone(),
            },
        }
    }
}

/// Statistics from a capture cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub tables_captured: usize,
    pub rows_backfilled: u64,
    pub changes_emitted: u64,
    /// Sessions skipped because they are paused or stopped.
    pub tables_inactive: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl CycleStats {
    /// Check if the cycle completed without errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
struct TableProgress {
    rows: u64,
    changes: u64,
    inactive: bool,
}

/// CaptureDaemon drives every table's session.
///
/// Startup validates undo retention, discovers tables, and snapshots the ones
/// without saved state. Each cycle then runs all tables concurrently:
/// 1. Backfill pages until the table's backfill completes
/// 2. One incremental window up to the current SCN
///
/// Tables paused by schema drift are rediscovered at the start of each cycle.
pub struct CaptureDaemon {
    db: Arc<dyn FlashbackDatabase>,
    config: DaemonConfig,
    coordinator: PhaseCoordinator<SessionState>,
}

impl CaptureDaemon {
    pub fn new(db: Arc<dyn FlashbackDatabase>, config: DaemonConfig) -> Self {
        Self {
            db,
            config,
            coordinator: PhaseCoordinator::new(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Validate retention and open a session per discovered table.
    pub async fn start(
        &self,
        state: &CaptureState,
        sink: &dyn CaptureSink,
    ) -> Result<Vec<TableSession>> {
        self.validate().await?;
        self.open_sessions(state, sink).await
    }

    pub async fn validate(&self) -> Result<RetentionReport> {
        validate_flashback(self.db.as_ref(), self.config.skip_retention_checks).await
    }

    /// Discover tables and build their sessions.
    ///
    /// Bindings found in `state` resume where they left off. New tables share
    /// one snapshot marker and are checkpointed before any data is emitted.
    pub async fn open_sessions(
        &self,
        state: &CaptureState,
        sink: &dyn CaptureSink,
    ) -> Result<Vec<TableSession>> {
        let tables = discover_tables(self.db.as_ref(), &self.config.discovery).await?;

        let fresh: Vec<Arc<Table>> = tables
            .iter()
            .filter(|t| state.get(&t.binding_name()).is_none())
            .cloned()
            .collect();

        let mut initial: HashMap<String, ResourceState> = HashMap::new();
        if !fresh.is_empty() {
            let snapshot = snapshot::initialize(self.db.as_ref(), &fresh).await?;
            tracing::info!(
                "Snapshot of {} new table(s) at SCN {}",
                fresh.len(),
                snapshot.scn
            );
            for (table, resource) in snapshot.bindings {
                let binding = table.binding_name();
                sink.checkpoint(&binding, &resource).await?;
                initial.insert(binding, resource);
            }
        }

        for binding in state.bindings.keys() {
            if !tables.iter().any(|t| &t.binding_name() == binding) {
                tracing::warn!(
                    "Saved state for {} has no matching table; leaving it untouched",
                    binding
                );
            }
        }

        let mut sessions = Vec::with_capacity(tables.len());
        for table in tables {
            let binding = table.binding_name();
            let Some(resource) = initial
                .remove(&binding)
                .or_else(|| state.get(&binding).cloned())
            else {
                continue;
            };

            if let SessionStatus::Failed { ref reason, .. } = resource.status {
                tracing::warn!(
                    "{} is stopped ({}); reset the binding to capture it again",
                    binding,
                    reason
                );
            }

            let session = self.session(table, resource);
            session.reactivate(sink).await?;
            sessions.push(session);
        }

        Ok(sessions)
    }

    /// Run one capture cycle across all sessions.
    pub async fn run_cycle(&self, sessions: &[TableSession], sink: &dyn CaptureSink) -> CycleStats {
        let start = Instant::now();
        let mut stats = CycleStats::default();

        let results = join_all(sessions.iter().map(|s| drive(s, sink))).await;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(progress) if progress.inactive => stats.tables_inactive += 1,
                Ok(progress) => {
                    stats.tables_captured += 1;
                    stats.rows_backfilled += progress.rows;
                    stats.changes_emitted += progress.changes;
                }
                Err(e) => {
                    tracing::error!("Failed to capture {}: {:?}", session.binding(), e);
                    stats
                        .errors
                        .push(format!("Failed to capture {}: {}", session.binding(), e));
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// Run capture cycles at the configured interval until cancelled.
    pub async fn run(
        &self,
        mut sessions: Vec<TableSession>,
        sink: &dyn CaptureSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        tracing::info!(
            "Starting CaptureDaemon for {} table(s) with poll_interval={:?}",
            sessions.len(),
            self.config.poll_interval
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping CaptureDaemon");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    tracing::info!("Starting capture cycle {}", cycles);

                    sessions = self.rediscover(sessions, sink).await;

                    // Dropping the cycle cancels in-flight queries; nothing is
                    // checkpointed for a chunk or window that did not finish.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::info!("Shutdown signal received during capture cycle, aborting");
                            break;
                        }
                        stats = self.run_cycle(&sessions, sink) => {
                            tracing::info!(
                                "Capture cycle {} completed: {} tables, {} rows backfilled, {} changes in {}ms",
                                cycles,
                                stats.tables_captured,
                                stats.rows_backfilled,
                                stats.changes_emitted,
                                stats.duration_ms
                            );
                            if !stats.is_success() {
                                tracing::warn!("Capture cycle had {} errors", stats.errors.len());
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Rebuild sessions paused by schema drift whose tables are discoverable again.
    pub async fn rediscover(
        &self,
        sessions: Vec<TableSession>,
        sink: &dyn CaptureSink,
    ) -> Vec<TableSession> {
        let mut paused = 0usize;
        for session in &sessions {
            if matches!(session.status().await, SessionStatus::SoftFailed { .. }) {
                paused += 1;
            }
        }
        if paused == 0 {
            return sessions;
        }

        // Only the paused tables are checked for readability; an unrelated
        // table losing its grant must not keep them paused.
        let tables = match catalog_tables(self.db.as_ref(), &self.config.discovery).await {
            Ok(tables) => tables,
            Err(e) => {
                tracing::warn!("Rediscovery failed, {} table(s) stay paused: {}", paused, e);
                return sessions;
            }
        };
        let mut by_binding: HashMap<String, Arc<Table>> = tables
            .into_iter()
            .map(|t| (t.binding_name(), t))
            .collect();

        let mut rebuilt = Vec::with_capacity(sessions.len());
        for session in sessions {
            let status = session.status().await;
            if !matches!(status, SessionStatus::SoftFailed { .. }) {
                rebuilt.push(session);
                continue;
            }

            match by_binding.remove(session.binding()) {
                Some(table) => {
                    if let Err(e) = ensure_readable(self.db.as_ref(), &table).await {
                        tracing::warn!("{} stays paused: {}", session.binding(), e);
                        rebuilt.push(session);
                        continue;
                    }
                    let resource = session.state().await;
                    let next = self.session(table, resource);
                    if let Err(e) = next.reactivate(sink).await {
                        tracing::warn!("Failed to resume {}: {}", next.binding(), e);
                    }
                    rebuilt.push(next);
                }
                None => {
                    tracing::info!("{} is still missing; staying paused", session.binding());
                    rebuilt.push(session);
                }
            }
        }
        rebuilt
    }

    fn session(&self, table: Arc<Table>, resource: ResourceState) -> TableSession {
        let binding = table.binding_name();
        let backoff = Backoff::new(self.config.initial_backoff, self.config.max_retries);
        let scope = self
            .coordinator
            .register(&binding, || SessionState::new(resource, backoff));
        TableSession::new(
            Arc::clone(&self.db),
            table,
            scope,
            self.config.chunk_size,
        )
    }
}

/// Finish the table's backfill, then read one change window.
async fn drive(session: &TableSession, sink: &dyn CaptureSink) -> Result<TableProgress> {
    let mut progress = TableProgress::default();
    loop {
        match session.step(sink).await? {
            StepOutcome::Backfilled { rows, .. } => progress.rows += rows as u64,
            StepOutcome::Changes { events, .. } => {
                progress.changes += events as u64;
                return Ok(progress);
            }
            StepOutcome::Deferred => return Ok(progress),
            StepOutcome::Inactive => {
                progress.inactive = true;
                return Ok(progress);
            }
        }
    }
}
