// ABOUTME: TableSession - one table's capture session: fetch, emit, checkpoint, classify failures
// ABOUTME: All state access happens inside the table's phase scope; backoff is session-owned

use std::sync::Arc;

use super::backfill;
use super::coordinator::{PhaseGuard, PhaseScope};
use super::database::FlashbackDatabase;
use super::incremental;
use super::sink::CaptureSink;
use super::state::{ResourceState, SessionStatus};
use super::types::{RowEvent, Scn, Table};
use crate::error::{ErrorKind, Result};
use crate::utils::Backoff;

/// What a table's phase scope protects.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub resource: ResourceState,
    /// Transient-failure counter; reset after every successful fetch.
    pub backoff: Backoff,
}

impl SessionState {
    pub fn new(resource: ResourceState, backoff: Backoff) -> Self {
        Self { resource, backoff }
    }
}

/// Result of one fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Backfilled { rows: usize, complete: bool },
    Changes { events: usize, cursor: Scn },
    /// Incremental fetch skipped because the backfill is still running.
    Deferred,
    /// The session is paused or failed; nothing was read.
    Inactive,
}

pub struct TableSession {
    db: Arc<dyn FlashbackDatabase>,
    table: Arc<Table>,
    binding: String,
    scope: PhaseScope<SessionState>,
    chunk_size: usize,
}

impl TableSession {
    pub fn new(
        db: Arc<dyn FlashbackDatabase>,
        table: Arc<Table>,
        scope: PhaseScope<SessionState>,
        chunk_size: usize,
    ) -> Self {
        Self {
            binding: scope.key().to_string(),
            db,
            table,
            scope,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Copy of the table's committed state.
    pub async fn state(&self) -> ResourceState {
        self.scope.enter().await.resource.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.scope.enter().await.resource.status.clone()
    }

    /// Fetch, emit and checkpoint the next backfill page.
    pub async fn fetch_page(&self, sink: &dyn CaptureSink) -> Result<StepOutcome> {
        let mut guard = self.scope.enter().await;
        let result = self.backfill_locked(&mut guard, sink).await;
        self.rollback_on_error(result, sink).await
    }

    /// Fetch, emit and checkpoint the changes since the incremental cursor.
    pub async fn fetch_changes(&self, sink: &dyn CaptureSink) -> Result<StepOutcome> {
        let mut guard = self.scope.enter().await;
        let result = self.changes_locked(&mut guard, sink).await;
        self.rollback_on_error(result, sink).await
    }

    /// Run whichever phase the table is in, once.
    pub async fn fetch_next(&self, sink: &dyn CaptureSink) -> Result<StepOutcome> {
        let mut guard = self.scope.enter().await;
        let result = if guard.resource.is_backfilling() {
            self.backfill_locked(&mut guard, sink).await
        } else {
            self.changes_locked(&mut guard, sink).await
        };
        self.rollback_on_error(result, sink).await
    }

    /// Run one fetch call, retrying transient failures with backoff.
    ///
    /// Schema drift pauses the session (`SoftFailed`); consistency and
    /// configuration errors stop it (`Failed`). Both transitions are
    /// checkpointed before the error is returned.
    pub async fn step(&self, sink: &dyn CaptureSink) -> Result<StepOutcome> {
        loop {
            let err = match self.fetch_next(sink).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };

            match err.kind() {
                ErrorKind::Retryable => {
                    // The scope is released while sleeping so the lock is only
                    // ever held for one query and its emission loop.
                    let (delay, attempt) = {
                        let mut guard = self.scope.enter().await;
                        let delay = guard.backoff.next_delay();
                        (delay, guard.backoff.attempts())
                    };
                    match delay {
                        Some(delay) => {
                            tracing::warn!(
                                "Transient failure on {} (attempt {}), retrying in {:?}: {}",
                                self.table.qualified_name(),
                                attempt,
                                delay,
                                err
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(
                                "Giving up on {} after {} attempts: {}",
                                self.table.qualified_name(),
                                attempt,
                                err
                            );
                            self.scope.enter().await.backoff.reset();
                            return Err(err);
                        }
                    }
                }
                ErrorKind::Disruptive => {
                    tracing::warn!(
                        "Pausing {} until it is discovered again: {}",
                        self.table.qualified_name(),
                        err
                    );
                    self.transition(sink, SessionStatus::soft_failed(err.to_string()))
                        .await;
                    return Err(err);
                }
                ErrorKind::Fatal => {
                    tracing::error!("Stopping capture of {}: {}", self.table.qualified_name(), err);
                    self.transition(sink, SessionStatus::failed(err.to_string()))
                        .await;
                    return Err(err);
                }
                ErrorKind::Cancelled => return Err(err),
            }
        }
    }

    /// Resume a session paused by schema drift. Returns whether it was paused.
    pub async fn reactivate(&self, sink: &dyn CaptureSink) -> Result<bool> {
        let mut guard = self.scope.enter().await;
        if !matches!(guard.resource.status, SessionStatus::SoftFailed { .. }) {
            return Ok(false);
        }

        let mut next = guard.resource.clone();
        next.status = SessionStatus::Active;
        sink.checkpoint(&self.binding, &next).await?;
        guard.resource = next;
        guard.backoff.reset();
        tracing::info!("Resumed capture of {}", self.table.qualified_name());
        Ok(true)
    }

    async fn backfill_locked(
        &self,
        guard: &mut PhaseGuard<SessionState>,
        sink: &dyn CaptureSink,
    ) -> Result<StepOutcome> {
        if !guard.resource.status.is_active() {
            return Ok(StepOutcome::Inactive);
        }
        let Some(backfill) = guard.resource.backfill.clone() else {
            return Ok(StepOutcome::Backfilled {
                rows: 0,
                complete: true,
            });
        };

        let page =
            backfill::fetch_page(self.db.as_ref(), &self.table, &backfill, self.chunk_size).await?;
        let rows = page.rows.len();
        let complete = page.is_complete();

        for row in page.rows {
            let event = RowEvent::backfill(&self.table, row, backfill.scn);
            sink.emit(&self.binding, &event).await?;
        }

        let mut next = guard.resource.clone();
        next.backfill = page.next;
        if complete {
            if next.inc.cursor != backfill.scn {
                tracing::warn!(
                    "Incremental cursor of {} was {} during backfill; restarting it at snapshot SCN {}",
                    self.table.qualified_name(),
                    next.inc.cursor,
                    backfill.scn
                );
            }
            next.inc.cursor = backfill.scn;
        }

        sink.checkpoint(&self.binding, &next).await?;
        guard.resource = next;
        guard.backoff.reset();

        if complete {
            tracing::info!(
                "Backfill of {} complete; incremental capture starts at SCN {}",
                self.table.qualified_name(),
                backfill.scn
            );
        }

        Ok(StepOutcome::Backfilled { rows, complete })
    }

    async fn changes_locked(
        &self,
        guard: &mut PhaseGuard<SessionState>,
        sink: &dyn CaptureSink,
    ) -> Result<StepOutcome> {
        if !guard.resource.status.is_active() {
            return Ok(StepOutcome::Inactive);
        }
        if guard.resource.is_backfilling() {
            tracing::debug!(
                "Deferring incremental fetch of {} until its backfill completes",
                self.table.qualified_name()
            );
            return Ok(StepOutcome::Deferred);
        }

        let lower = guard.resource.inc.cursor;
        let window = incremental::fetch_changes(self.db.as_ref(), &self.table, lower).await?;
        let events = window.events.len();

        for event in &window.events {
            sink.emit(&self.binding, event).await?;
        }

        if window.upper > lower {
            let mut next = guard.resource.clone();
            next.inc.cursor = window.upper;
            sink.checkpoint(&self.binding, &next).await?;
            guard.resource = next;
        }
        guard.backoff.reset();

        if events > 0 {
            tracing::info!(
                "Captured {} change(s) from {} (SCN {} -> {})",
                events,
                self.table.qualified_name(),
                lower,
                window.upper
            );
        }

        Ok(StepOutcome::Changes {
            events,
            cursor: guard.resource.inc.cursor,
        })
    }

    async fn rollback_on_error(
        &self,
        result: Result<StepOutcome>,
        sink: &dyn CaptureSink,
    ) -> Result<StepOutcome> {
        if result.is_err() {
            if let Err(e) = sink.rollback(&self.binding).await {
                tracing::warn!("Failed to roll back output of {}: {}", self.binding, e);
            }
        }
        result
    }

    async fn transition(&self, sink: &dyn CaptureSink, status: SessionStatus) {
        let mut guard = self.scope.enter().await;
        let mut next = guard.resource.clone();
        next.status = status;
        if let Err(e) = sink.checkpoint(&self.binding, &next).await {
            tracing::error!(
                "Failed to checkpoint status of {}: {}",
                self.table.qualified_name(),
                e
            );
        }
        guard.resource = next;
    }
}

impl std::fmt::Debug for TableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSession")
            .field("binding", &self.binding)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

