// ABOUTME: FlashbackDatabase trait - the database-facing queries the engine relies on
// ABOUTME: Implemented by OracleDatabase for production and MemoryDatabase for tests

use async_trait::async_trait;

use super::discovery::{CatalogColumn, CatalogTable};
use super::retention::RetentionConfig;
use super::types::{RowId, RowVersion, Scn, SourceRow, Table};
use crate::error::Result;

/// Database-facing operations of the capture engine.
///
/// Every call uses one pooled connection for exactly one query and releases it
/// before returning. Dropping the returned future must abort the query.
#[async_trait]
pub trait FlashbackDatabase: Send + Sync {
    /// Name of the connected user, used in operator-facing messages.
    async fn current_user(&self) -> Result<String>;

    /// Undo and flashback configuration of the server.
    async fn retention_config(&self) -> Result<RetentionConfig>;

    /// Base tables visible to the capture user, optionally limited to `owners`.
    async fn list_tables(&self, owners: &[String]) -> Result<Vec<CatalogTable>>;

    /// Columns (with primary-key positions) of every table owned by `owners`.
    async fn list_columns(&self, owners: &[String]) -> Result<Vec<CatalogColumn>>;

    /// Check that the capture user can read `table`.
    async fn probe_table(&self, table: &Table) -> Result<()>;

    /// The database's current global commit marker.
    async fn current_scn(&self) -> Result<Scn>;

    /// Largest ROWID currently present in `table`, `None` when it is empty.
    async fn max_rowid(&self, table: &Table) -> Result<Option<RowId>>;

    /// Rows with ROWID in `(after, cutoff]` as of `scn`, ascending by ROWID,
    /// at most `limit` of them.
    async fn fetch_rows(
        &self,
        table: &Table,
        after: Option<&RowId>,
        cutoff: &RowId,
        scn: Scn,
        limit: usize,
    ) -> Result<Vec<SourceRow>>;

    /// Every row version committed in `(lower, upper]`, ascending by commit marker.
    async fn fetch_versions(&self, table: &Table, lower: Scn, upper: Scn)
        -> Result<Vec<RowVersion>>;

    /// Whether `row_id` holds a row as of `scn`.
    async fn row_exists(&self, table: &Table, row_id: &RowId, scn: Scn) -> Result<bool>;
}
