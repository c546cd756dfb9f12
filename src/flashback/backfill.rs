// ABOUTME: Backfill fetcher - reads pre-existing rows in ROWID order, pinned at the snapshot SCN
// ABOUTME: Each page resumes after the last emitted ROWID and stops at the captured cutoff

use super::database::FlashbackDatabase;
use super::state::BackfillState;
use super::types::{SourceRow, Table};
use crate::error::Result;

/// One chunk of backfilled rows and the state to checkpoint after emitting them.
#[derive(Debug, Clone)]
pub struct BackfillPage {
    pub rows: Vec<SourceRow>,
    /// `None` once the backfill of the table is complete.
    pub next: Option<BackfillState>,
}

impl BackfillPage {
    pub fn is_complete(&self) -> bool {
        self.next.is_none()
    }
}

/// Fetch the next page of a table's backfill.
///
/// A short page does not end the backfill. Completion is signalled only by
/// an empty page or by reaching the cutoff ROWID.
pub async fn fetch_page(
    db: &dyn FlashbackDatabase,
    table: &Table,
    state: &BackfillState,
    chunk_size: usize,
) -> Result<BackfillPage> {
    let rows = db
        .fetch_rows(
            table,
            state.next_page.as_ref(),
            &state.cutoff,
            state.scn,
            chunk_size,
        )
        .await
        .map_err(|e| e.for_table(&table.qualified_name()))?;

    let next = match rows.last() {
        None => None,
        Some(last) if last.row_id == state.cutoff => None,
        Some(last) => Some(BackfillState {
            next_page: Some(last.row_id.clone()),
            cutoff: state.cutoff.clone(),
            scn: state.scn,
        }),
    };

    tracing::debug!(
        "Backfill page for {}: {} row(s) after {:?}, complete={}",
        table.qualified_name(),
        rows.len(),
        state.next_page.as_ref().map(|r| r.as_str()),
        next.is_none()
    );

    Ok(BackfillPage { rows, next })
}
