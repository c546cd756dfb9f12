// ABOUTME: Snapshot initializer - captures one global SCN and each table's max ROWID
// ABOUTME: Together they bound the backfill window; empty tables go straight to incremental

use std::sync::Arc;

use super::database::FlashbackDatabase;
use super::state::ResourceState;
use super::types::{Scn, Table};
use crate::error::Result;

/// Initial state for a set of tables, all pinned to the same marker.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub scn: Scn,
    pub bindings: Vec<(Arc<Table>, ResourceState)>,
}

/// Capture one marker shared by every table, then each table's max ROWID.
///
/// Pinning all backfills to one marker keeps cross-table reads consistent.
pub async fn initialize(db: &dyn FlashbackDatabase, tables: &[Arc<Table>]) -> Result<Snapshot> {
    let scn = db.current_scn().await?;
    tracing::debug!("Current SCN: {}", scn);

    let mut bindings = Vec::with_capacity(tables.len());
    for table in tables {
        let state = initial_state(db, table, scn).await?;
        bindings.push((Arc::clone(table), state));
    }

    Ok(Snapshot { scn, bindings })
}

/// Initial state of one table for a marker captured by the caller.
pub async fn initial_state(
    db: &dyn FlashbackDatabase,
    table: &Table,
    scn: Scn,
) -> Result<ResourceState> {
    let max_rowid = db
        .max_rowid(table)
        .await
        .map_err(|e| e.for_table(&table.qualified_name()))?;

    match max_rowid {
        Some(ref cutoff) => tracing::info!(
            "Snapshot of {} at SCN {}: backfill up to ROWID {}",
            table.qualified_name(),
            scn,
            cutoff
        ),
        None => tracing::info!(
            "{} is empty at SCN {}; skipping backfill",
            table.qualified_name(),
            scn
        ),
    }

    Ok(ResourceState::initial(max_rowid, scn))
}
