// ABOUTME: OracleDatabase - FlashbackDatabase over a pooled oracle::Connection set
// ABOUTME: Each call runs one statement on a blocking thread and breaks it if the caller goes away

use async_trait::async_trait;
use oracle::pool::Pool;
use oracle::sql_type::{OracleType, ToSql};
use oracle::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::errors::classify;
use super::{rows, sql};
use crate::error::{CaptureError, Result};
use crate::flashback::database::FlashbackDatabase;
use crate::flashback::discovery::{CatalogColumn, CatalogTable};
use crate::flashback::retention::RetentionConfig;
use crate::flashback::types::{ChangeOp, RowId, RowVersion, Scn, SourceRow, Table};

/// Failure inside a blocking query closure.
enum QueryError {
    Db(oracle::Error),
    Capture(CaptureError),
}

impl From<oracle::Error> for QueryError {
    fn from(err: oracle::Error) -> Self {
        QueryError::Db(err)
    }
}

impl From<CaptureError> for QueryError {
    fn from(err: CaptureError) -> Self {
        QueryError::Capture(err)
    }
}

/// Breaks the running statement when dropped while armed.
///
/// The blocking thread cannot be aborted, but the server can: breaking the
/// call makes it fail with ORA-01013 and return the connection to the pool.
struct BreakOnDrop {
    conn: Option<Arc<Connection>>,
}

impl BreakOnDrop {
    fn disarm(&mut self) {
        self.conn = None;
    }
}

impl Drop for BreakOnDrop {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Query abandoned, breaking execution");
            if let Err(e) = conn.break_execution() {
                tracing::warn!("Failed to break running query: {}", e);
            }
        }
    }
}

pub struct OracleDatabase {
    pool: Arc<Pool>,
    current_user: OnceCell<String>,
}

impl OracleDatabase {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool: Arc::new(pool),
            current_user: OnceCell::new(),
        }
    }

    /// Check out a connection and run `query` on it off the async runtime.
    ///
    /// `table` and `during_fetch` only shape how driver errors are classified.
    async fn run<T, F>(&self, table: &str, during_fetch: bool, query: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, QueryError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| CaptureError::transient(format!("connection task failed: {}", e)))?
            .map_err(|e| classify(e, table, false))?;

        let conn = Arc::new(conn);
        let mut guard = BreakOnDrop {
            conn: Some(Arc::clone(&conn)),
        };
        let result = tokio::task::spawn_blocking(move || query(&*conn)).await;
        guard.disarm();

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(QueryError::Db(e))) => Err(classify(e, table, during_fetch)),
            Ok(Err(QueryError::Capture(e))) => Err(e),
            Err(e) => Err(CaptureError::transient(format!("query task failed: {}", e))),
        }
    }
}

fn column_types(columns: &[oracle::ColumnInfo]) -> Vec<OracleType> {
    columns.iter().map(|c| c.oracle_type().clone()).collect()
}

#[async_trait]
impl FlashbackDatabase for OracleDatabase {
    async fn current_user(&self) -> Result<String> {
        self.current_user
            .get_or_try_init(|| async {
                self.run("", false, |conn| {
                    Ok(conn.query_row_as::<String>(sql::CURRENT_USER, &[])?)
                })
                .await
            })
            .await
            .cloned()
    }

    async fn retention_config(&self) -> Result<RetentionConfig> {
        self.run("", false, |conn| {
            let flashback_on = conn.query_row_as::<String>(sql::FLASHBACK_ON, &[])?;

            let mut params: HashMap<String, String> = HashMap::new();
            for row in conn.query_as::<(String, Option<String>)>(sql::UNDO_PARAMETERS, &[])? {
                let (name, value) = row?;
                params.insert(name.to_lowercase(), value.unwrap_or_default());
            }
            let param = |name: &str| {
                params.get(name).cloned().ok_or_else(|| {
                    CaptureError::configuration(format!("parameter {} is not set", name))
                })
            };
            let undo_tablespace = param("undo_tablespace")?;
            let undo_management = param("undo_management")?.to_uppercase();
            let undo_retention_seconds = param("undo_retention")?
                .trim()
                .parse::<u64>()
                .map_err(|e| {
                    CaptureError::configuration(format!("invalid undo_retention value: {}", e))
                })?;

            let (max_size, retention_mode) = conn.query_row_as_named::<(Option<u64>, String)>(
                sql::UNDO_TABLESPACE,
                &[("tablespace", &undo_tablespace)],
            )?;

            let mut autoextensible = false;
            for row in conn.query_as_named::<String>(
                sql::UNDO_AUTOEXTEND,
                &[("tablespace", &undo_tablespace)],
            )? {
                autoextensible |= row? == "YES";
            }

            let avg_retention_seconds = if undo_management == "AUTO" {
                conn.query_row_as::<Option<f64>>(sql::AVG_TUNED_RETENTION, &[])?
                    .map(|avg| avg.round().max(0.0) as u64)
            } else {
                None
            };

            Ok(RetentionConfig {
                undo_tablespace,
                undo_management,
                undo_retention_seconds,
                max_size,
                retention_mode,
                autoextensible,
                flashback_on: flashback_on == "YES",
                avg_retention_seconds,
            })
        })
        .await
    }

    async fn list_tables(&self, owners: &[String]) -> Result<Vec<CatalogTable>> {
        let owners = owners.to_vec();
        self.run("", false, move |conn| {
            let sql = sql::list_tables(owners.len());
            let binds = sql::owner_binds(owners.len());
            let params: Vec<(&str, &dyn ToSql)> = binds
                .iter()
                .zip(owners.iter())
                .map(|(name, owner)| (name.as_str(), owner as &dyn ToSql))
                .collect();

            let mut tables = Vec::new();
            for row in conn.query_as_named::<(String, String)>(&sql, &params)? {
                let (owner, table_name) = row?;
                tables.push(CatalogTable { owner, table_name });
            }
            Ok(tables)
        })
        .await
    }

    async fn list_columns(&self, owners: &[String]) -> Result<Vec<CatalogColumn>> {
        let owners = owners.to_vec();
        self.run("", false, move |conn| {
            let sql = sql::list_columns(owners.len());
            let binds = sql::owner_binds(owners.len());
            let params: Vec<(&str, &dyn ToSql)> = binds
                .iter()
                .zip(owners.iter())
                .map(|(name, owner)| (name.as_str(), owner as &dyn ToSql))
                .collect();

            let mut columns = Vec::new();
            for row in conn.query_as_named::<(
                String,
                String,
                String,
                String,
                String,
                u32,
                Option<u32>,
            )>(&sql, &params)?
            {
                let (owner, table_name, column_name, data_type, nullable, column_id, pk) = row?;
                columns.push(CatalogColumn {
                    owner,
                    table_name,
                    column_name,
                    data_type,
                    nullable: nullable == "Y",
                    column_id,
                    primary_key_position: pk,
                });
            }
            Ok(columns)
        })
        .await
    }

    async fn probe_table(&self, table: &Table) -> Result<()> {
        let sql = sql::probe_table(table);
        self.run(&table.qualified_name(), false, move |conn| {
            let _rows = conn.query(&sql, &[])?;
            Ok(())
        })
        .await
    }

    async fn current_scn(&self) -> Result<Scn> {
        self.run("", false, |conn| {
            Ok(Scn(conn.query_row_as::<u64>(sql::CURRENT_SCN, &[])?))
        })
        .await
    }

    async fn max_rowid(&self, table: &Table) -> Result<Option<RowId>> {
        let sql = sql::max_rowid(table);
        self.run(&table.qualified_name(), true, move |conn| {
            Ok(conn
                .query_row_as::<Option<String>>(&sql, &[])?
                .map(RowId::new))
        })
        .await
    }

    async fn fetch_rows(
        &self,
        table: &Table,
        after: Option<&RowId>,
        cutoff: &RowId,
        scn: Scn,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        let sql = sql::backfill_page(table, after.is_some());
        let columns = table.columns.clone();
        let after = after.map(|r| r.as_str().to_string());
        let cutoff = cutoff.as_str().to_string();
        let scn = scn.value();
        let limit = limit as u64;
        let name = table.qualified_name();

        self.run(&table.qualified_name(), true, move |conn| {
            let result = match after {
                Some(ref after) => conn.query_named(
                    &sql,
                    &[
                        ("scn", &scn),
                        ("after", after),
                        ("cutoff", &cutoff),
                        ("limit", &limit),
                    ],
                )?,
                None => conn.query_named(
                    &sql,
                    &[("scn", &scn), ("cutoff", &cutoff), ("limit", &limit)],
                )?,
            };
            let types = column_types(result.column_info());
            rows::check_types(&name, &columns, types.get(1..).unwrap_or(&[]))?;

            let mut out = Vec::new();
            for row in result {
                let row = row?;
                let row_id: String = row.get(0)?;
                out.push(SourceRow {
                    row_id: RowId::new(row_id),
                    values: rows::row_values(&row, 1, &columns, &types)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn fetch_versions(
        &self,
        table: &Table,
        lower: Scn,
        upper: Scn,
    ) -> Result<Vec<RowVersion>> {
        let sql = sql::versions_between(table);
        let columns = table.columns.clone();
        let (lower, upper) = (lower.value(), upper.value());
        let name = table.qualified_name();

        self.run(&table.qualified_name(), true, move |conn| {
            let result = conn.query_named(&sql, &[("lower", &lower), ("upper", &upper)])?;
            let types = column_types(result.column_info());
            rows::check_types(&name, &columns, types.get(3..).unwrap_or(&[]))?;

            let mut out = Vec::new();
            for row in result {
                let row = row?;
                let scn: u64 = row.get(0)?;
                let operation: Option<String> = row.get(1)?;
                let row_id: String = row.get(2)?;
                out.push(RowVersion {
                    scn: Scn(scn),
                    operation: operation
                        .as_deref()
                        .and_then(ChangeOp::from_versions_operation),
                    row_id: RowId::new(row_id),
                    values: rows::row_values(&row, 3, &columns, &types)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn row_exists(&self, table: &Table, row_id: &RowId, scn: Scn) -> Result<bool> {
        let sql = sql::row_exists(table);
        let row_id = row_id.as_str().to_string();
        let scn = scn.value();

        self.run(&table.qualified_name(), true, move |conn| {
            let count = conn
                .query_row_as_named::<u64>(&sql, &[("scn", &scn), ("row_id", &row_id)])?;
            Ok(count > 0)
        })
        .await
    }
}
