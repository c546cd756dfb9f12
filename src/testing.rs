// ABOUTME: In-memory FlashbackDatabase and CaptureSink for exercising the engine without Oracle
// ABOUTME: Keeps SCN-stamped row versions so AS OF and VERSIONS BETWEEN reads behave like the server

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{CaptureError, Result};
use crate::flashback::database::FlashbackDatabase;
use crate::flashback::discovery::{CatalogColumn, CatalogTable};
use crate::flashback::retention::RetentionConfig;
use crate::flashback::sink::CaptureSink;
use crate::flashback::state::ResourceState;
use crate::flashback::types::{ChangeOp, RowEvent, RowId, RowVersion, Scn, SourceRow, Table};

/// Retention settings that pass every check.
pub fn healthy_retention() -> RetentionConfig {
    RetentionConfig {
        undo_tablespace: "UNDOTBS1".to_string(),
        undo_management: "AUTO".to_string(),
        undo_retention_seconds: 700_000,
        max_size: Some(2_147_483_645),
        retention_mode: "GUARANTEE".to_string(),
        autoextensible: true,
        flashback_on: true,
        avg_retention_seconds: Some(900_000),
    }
}

/// ROWIDs are zero-padded slot numbers so string order matches slot order.
fn slot_row_id(slot: u64) -> RowId {
    RowId::new(format!("AAAMEM{:010}", slot))
}

#[derive(Debug, Clone)]
struct MemoryVersion {
    scn: u64,
    op: ChangeOp,
    /// Row image; for deletes, the image the row had before it was removed.
    values: Map<String, Value>,
}

impl MemoryVersion {
    fn is_live(&self) -> bool {
        self.op != ChangeOp::Delete
    }
}

#[derive(Debug, Clone)]
struct MemoryColumn {
    name: String,
    data_type: String,
    nullable: bool,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<MemoryColumn>,
    primary_key: Vec<String>,
    next_slot: u64,
    slots: BTreeMap<u64, Vec<MemoryVersion>>,
    unreadable: bool,
}

impl MemoryTable {
    fn visible(&self, slot: u64, scn: u64) -> Option<&MemoryVersion> {
        self.slots
            .get(&slot)?
            .iter()
            .rev()
            .find(|v| v.scn <= scn)
            .filter(|v| v.is_live())
    }

    fn latest(&self, slot: u64) -> Option<&MemoryVersion> {
        self.slots.get(&slot)?.last()
    }
}

#[derive(Debug)]
struct Inner {
    scn: u64,
    user: String,
    retention: RetentionConfig,
    tables: BTreeMap<(String, String), MemoryTable>,
    /// Oldest marker still reconstructible from undo.
    horizon: u64,
    report_operations: bool,
    faults: VecDeque<String>,
    readability_faults: VecDeque<String>,
    versions_queries: usize,
    row_queries: usize,
}

/// A multi-version table store implementing [`FlashbackDatabase`].
///
/// Every write commits immediately at a fresh SCN. Reads pinned below the
/// retention horizon fail like an expired undo segment would.
#[derive(Debug)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                scn: 1_000,
                user: "CAPTURE".to_string(),
                retention: healthy_retention(),
                tables: BTreeMap::new(),
                horizon: 0,
                report_operations: true,
                faults: VecDeque::new(),
                readability_faults: VecDeque::new(),
                versions_queries: 0,
                row_queries: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_retention(&self, retention: RetentionConfig) {
        self.lock().retention = retention;
    }

    /// Create a table. Each column is `(name, data_type)`; key columns are NOT NULL.
    pub fn create_table(&self, owner: &str, name: &str, columns: &[(&str, &str)], key: &[&str]) {
        let table = MemoryTable {
            columns: columns
                .iter()
                .map(|(c, t)| MemoryColumn {
                    name: c.to_string(),
                    data_type: t.to_string(),
                    nullable: !key.contains(c),
                })
                .collect(),
            primary_key: key.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        };
        let mut inner = self.lock();
        inner.scn += 1;
        inner
            .tables
            .insert((owner.to_string(), name.to_string()), table);
    }

    pub fn drop_table(&self, owner: &str, name: &str) {
        let mut inner = self.lock();
        inner.scn += 1;
        inner.tables.remove(&(owner.to_string(), name.to_string()));
    }

    /// Drop a column; reads that still select it fail with ORA-00904.
    pub fn drop_column(&self, owner: &str, name: &str, column: &str) {
        let mut inner = self.lock();
        inner.scn += 1;
        if let Some(table) = inner.tables.get_mut(&(owner.to_string(), name.to_string())) {
            table.columns.retain(|c| c.name != column);
        }
    }

    /// Change a column's declared type; reads still expecting the old type
    /// fail as schema drift.
    pub fn alter_column_type(&self, owner: &str, name: &str, column: &str, data_type: &str) {
        let mut inner = self.lock();
        inner.scn += 1;
        if let Some(table) = inner.tables.get_mut(&(owner.to_string(), name.to_string())) {
            for c in table.columns.iter_mut().filter(|c| c.name == column) {
                c.data_type = data_type.to_string();
            }
        }
    }

    /// Revoke the capture user's read access to a table.
    pub fn set_unreadable(&self, owner: &str, name: &str, unreadable: bool) {
        if let Some(table) = self
            .lock()
            .tables
            .get_mut(&(owner.to_string(), name.to_string()))
        {
            table.unreadable = unreadable;
        }
    }

    /// Insert a row in its own transaction and return its ROWID.
    ///
    /// # Panics
    ///
    /// Panics if the table does not exist or `values` is not a JSON object.
    pub fn insert(&self, owner: &str, name: &str, values: Value) -> RowId {
        let mut inner = self.lock();
        inner.scn += 1;
        let scn = inner.scn;
        let table = inner
            .tables
            .get_mut(&(owner.to_string(), name.to_string()))
            .unwrap_or_else(|| panic!("no table {}.{}", owner, name));
        let slot = table.next_slot;
        table.next_slot += 1;
        table.slots.insert(
            slot,
            vec![MemoryVersion {
                scn,
                op: ChangeOp::Insert,
                values: as_map(values),
            }],
        );
        slot_row_id(slot)
    }

    /// Insert a new row at the address of a deleted one, the way a block
    /// slot freed by a delete can be handed out again.
    ///
    /// # Panics
    ///
    /// Panics if the ROWID was never used or its row is still live.
    pub fn reuse_rowid(&self, owner: &str, name: &str, row_id: &RowId, values: Value) {
        let mut inner = self.lock();
        inner.scn += 1;
        let scn = inner.scn;
        let table = inner
            .tables
            .get_mut(&(owner.to_string(), name.to_string()))
            .unwrap_or_else(|| panic!("no table {}.{}", owner, name));
        let versions = slot_of(row_id)
            .and_then(|slot| table.slots.get_mut(&slot))
            .unwrap_or_else(|| panic!("no row {}", row_id));
        if versions.last().is_some_and(|v| v.is_live()) {
            panic!("row {} is still live", row_id);
        }
        versions.push(MemoryVersion {
            scn,
            op: ChangeOp::Insert,
            values: as_map(values),
        });
    }

    /// Merge `values` into an existing row in its own transaction.
    ///
    /// # Panics
    ///
    /// Panics if the row does not exist or was deleted.
    pub fn update(&self, owner: &str, name: &str, row_id: &RowId, values: Value) {
        self.write(owner, name, row_id, |current, scn| {
            let mut merged = current.clone();
            merged.extend(as_map(values));
            MemoryVersion {
                scn,
                op: ChangeOp::Update,
                values: merged,
            }
        });
    }

    pub fn delete(&self, owner: &str, name: &str, row_id: &RowId) {
        self.write(owner, name, row_id, |current, scn| MemoryVersion {
            scn,
            op: ChangeOp::Delete,
            values: current.clone(),
        });
    }

    fn write(
        &self,
        owner: &str,
        name: &str,
        row_id: &RowId,
        next: impl FnOnce(&Map<String, Value>, u64) -> MemoryVersion,
    ) {
        let mut inner = self.lock();
        inner.scn += 1;
        let scn = inner.scn;
        let table = inner
            .tables
            .get_mut(&(owner.to_string(), name.to_string()))
            .unwrap_or_else(|| panic!("no table {}.{}", owner, name));
        let slot = slot_of(row_id).unwrap_or_else(|| panic!("bad ROWID {}", row_id));
        let versions = table
            .slots
            .get_mut(&slot)
            .unwrap_or_else(|| panic!("no row {}", row_id));
        let current = versions
            .last()
            .filter(|v| v.is_live())
            .map(|v| v.values.clone())
            .unwrap_or_else(|| panic!("row {} is deleted", row_id));
        versions.push(next(&current, scn));
    }

    /// Advance the SCN without touching any table.
    pub fn advance_scn(&self, by: u64) -> Scn {
        let mut inner = self.lock();
        inner.scn += by;
        Scn(inner.scn)
    }

    pub fn scn(&self) -> Scn {
        Scn(self.lock().scn)
    }

    /// Versions older than `scn` are no longer reconstructible.
    pub fn expire_undo_before(&self, scn: Scn) {
        self.lock().horizon = scn.value();
    }

    /// Stop reporting VERSIONS_OPERATION, forcing existence checks.
    pub fn hide_operations(&self) {
        self.lock().report_operations = false;
    }

    /// Fail the next `count` row reads with a transient error.
    pub fn fail_next_reads(&self, count: usize, message: &str) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.faults.push_back(message.to_string());
        }
    }

    /// Fail the next `count` readability checks with a transient error.
    pub fn fail_next_readability_checks(&self, count: usize, message: &str) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.readability_faults.push_back(message.to_string());
        }
    }

    /// Number of versions-between queries issued so far.
    pub fn versions_queries(&self) -> usize {
        self.lock().versions_queries
    }

    /// Number of backfill page queries issued so far.
    pub fn row_queries(&self) -> usize {
        self.lock().row_queries
    }
}

fn as_map(values: Value) -> Map<String, Value> {
    match values {
        Value::Object(map) => map,
        other => panic!("row values must be a JSON object, got {}", other),
    }
}

fn slot_of(row_id: &RowId) -> Option<u64> {
    row_id.as_str().strip_prefix("AAAMEM")?.parse().ok()
}

impl Inner {
    fn table(&self, table: &Table) -> Result<&MemoryTable> {
        self.tables
            .get(&(table.owner.clone(), table.name.clone()))
            .ok_or_else(|| {
                CaptureError::schema_drift(
                    table.qualified_name(),
                    "ORA-00942: table or view does not exist",
                )
            })
    }

    /// Project `values` onto the descriptor's columns.
    fn project(&self, table: &Table, values: &Map<String, Value>) -> Map<String, Value> {
        table
            .columns
            .iter()
            .map(|c| (c.name.clone(), values.get(&c.name).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    fn check_columns(&self, table: &Table, stored: &MemoryTable) -> Result<()> {
        for column in &table.columns {
            let Some(current) = stored.columns.iter().find(|c| c.name == column.name) else {
                return Err(CaptureError::schema_drift(
                    table.qualified_name(),
                    format!("ORA-00904: \"{}\": invalid identifier", column.name),
                ));
            };
            if current.data_type != column.data_type {
                return Err(CaptureError::schema_drift(
                    table.qualified_name(),
                    format!(
                        "column {} changed type from {} to {}",
                        column.name, column.data_type, current.data_type
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_horizon(&self, table: &Table, scn: u64) -> Result<()> {
        if scn < self.horizon {
            return Err(CaptureError::consistency(
                table.qualified_name(),
                "ORA-01555: snapshot too old",
            ));
        }
        Ok(())
    }

    fn take_fault(&mut self) -> Result<()> {
        match self.faults.pop_front() {
            Some(message) => Err(CaptureError::transient(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FlashbackDatabase for MemoryDatabase {
    async fn current_user(&self) -> Result<String> {
        Ok(self.lock().user.clone())
    }

    async fn retention_config(&self) -> Result<RetentionConfig> {
        Ok(self.lock().retention.clone())
    }

    async fn list_tables(&self, owners: &[String]) -> Result<Vec<CatalogTable>> {
        Ok(self
            .lock()
            .tables
            .keys()
            .filter(|(owner, _)| owners.is_empty() || owners.contains(owner))
            .map(|(owner, table_name)| CatalogTable {
                owner: owner.clone(),
                table_name: table_name.clone(),
            })
            .collect())
    }

    async fn list_columns(&self, owners: &[String]) -> Result<Vec<CatalogColumn>> {
        let inner = self.lock();
        let mut columns = Vec::new();
        for ((owner, table_name), table) in &inner.tables {
            if !owners.contains(owner) {
                continue;
            }
            for (i, column) in table.columns.iter().enumerate() {
                columns.push(CatalogColumn {
                    owner: owner.clone(),
                    table_name: table_name.clone(),
                    column_name: column.name.clone(),
                    data_type: column.data_type.clone(),
                    nullable: column.nullable,
                    column_id: i as u32 + 1,
                    primary_key_position: table
                        .primary_key
                        .iter()
                        .position(|k| k == &column.name)
                        .map(|p| p as u32 + 1),
                });
            }
        }
        Ok(columns)
    }

    async fn probe_table(&self, table: &Table) -> Result<()> {
        let mut inner = self.lock();
        if let Some(message) = inner.readability_faults.pop_front() {
            return Err(CaptureError::transient(message));
        }
        let stored = inner.table(table)?;
        if stored.unreadable {
            return Err(CaptureError::configuration(
                "ORA-01031: insufficient privileges",
            ));
        }
        Ok(())
    }

    async fn current_scn(&self) -> Result<Scn> {
        Ok(Scn(self.lock().scn))
    }

    async fn max_rowid(&self, table: &Table) -> Result<Option<RowId>> {
        let inner = self.lock();
        let stored = inner.table(table)?;
        Ok(stored
            .slots
            .keys()
            .rev()
            .find(|slot| stored.latest(**slot).is_some_and(|v| v.is_live()))
            .map(|slot| slot_row_id(*slot)))
    }

    async fn fetch_rows(
        &self,
        table: &Table,
        after: Option<&RowId>,
        cutoff: &RowId,
        scn: Scn,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        let mut inner = self.lock();
        inner.row_queries += 1;
        inner.take_fault()?;
        inner.check_horizon(table, scn.value())?;
        let stored = inner.table(table)?;
        inner.check_columns(table, stored)?;

        let lower = after.and_then(slot_of);
        let upper = slot_of(cutoff).unwrap_or(0);

        let mut rows = Vec::new();
        for slot in stored.slots.keys().copied() {
            if lower.is_some_and(|l| slot <= l) || slot > upper {
                continue;
            }
            if let Some(version) = stored.visible(slot, scn.value()) {
                rows.push(SourceRow {
                    row_id: slot_row_id(slot),
                    values: inner.project(table, &version.values),
                });
                if rows.len() >= limit {
                    break;
                }
            }
        }
        Ok(rows)
    }

    async fn fetch_versions(
        &self,
        table: &Table,
        lower: Scn,
        upper: Scn,
    ) -> Result<Vec<RowVersion>> {
        let mut inner = self.lock();
        inner.versions_queries += 1;
        inner.take_fault()?;
        if lower.value() < inner.horizon {
            return Err(CaptureError::consistency(
                table.qualified_name(),
                "ORA-30052: invalid lower limit snapshot expression",
            ));
        }
        let stored = inner.table(table)?;
        inner.check_columns(table, stored)?;

        let mut versions = Vec::new();
        for (slot, history) in &stored.slots {
            for version in history {
                if version.scn > lower.value() && version.scn <= upper.value() {
                    versions.push(RowVersion {
                        scn: Scn(version.scn),
                        operation: inner.report_operations.then_some(version.op),
                        row_id: slot_row_id(*slot),
                        values: inner.project(table, &version.values),
                    });
                }
            }
        }
        versions.sort_by_key(|v| v.scn);
        Ok(versions)
    }

    async fn row_exists(&self, table: &Table, row_id: &RowId, scn: Scn) -> Result<bool> {
        let inner = self.lock();
        inner.check_horizon(table, scn.value())?;
        let stored = inner.table(table)?;
        Ok(slot_of(row_id)
            .and_then(|slot| stored.visible(slot, scn.value()))
            .is_some())
    }
}

#[derive(Debug, Default)]
struct SinkInner {
    pending: HashMap<String, Vec<RowEvent>>,
    committed: Vec<(String, RowEvent)>,
    states: HashMap<String, ResourceState>,
    checkpoints: usize,
    emits: usize,
    fail_emit_at: Option<usize>,
    fail_checkpoints: usize,
}

/// Records emitted events and committed state the way a host runtime would:
/// events become committed only at the checkpoint that follows them.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<SinkInner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Committed events of every binding, in commit order.
    pub fn committed(&self) -> Vec<(String, RowEvent)> {
        self.lock().committed.clone()
    }

    pub fn committed_for(&self, binding: &str) -> Vec<RowEvent> {
        self.lock()
            .committed
            .iter()
            .filter(|(b, _)| b == binding)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Events emitted since the binding's last checkpoint.
    pub fn pending_for(&self, binding: &str) -> Vec<RowEvent> {
        self.lock()
            .pending
            .get(binding)
            .cloned()
            .unwrap_or_default()
    }

    pub fn state(&self, binding: &str) -> Option<ResourceState> {
        self.lock().states.get(binding).cloned()
    }

    pub fn checkpoints(&self) -> usize {
        self.lock().checkpoints
    }

    /// Fail the emit call that would be the `n`th (1-based) from now.
    pub fn fail_emit_after(&self, n: usize) {
        let mut inner = self.lock();
        inner.fail_emit_at = Some(inner.emits + n);
    }

    pub fn fail_next_checkpoints(&self, count: usize) {
        self.lock().fail_checkpoints = count;
    }
}

#[async_trait]
impl CaptureSink for MemorySink {
    async fn emit(&self, binding: &str, event: &RowEvent) -> Result<()> {
        let mut inner = self.lock();
        inner.emits += 1;
        if inner.fail_emit_at == Some(inner.emits) {
            inner.fail_emit_at = None;
            return Err(CaptureError::transient("sink connection reset"));
        }
        inner
            .pending
            .entry(binding.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn checkpoint(&self, binding: &str, state: &ResourceState) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_checkpoints > 0 {
            inner.fail_checkpoints -= 1;
            return Err(CaptureError::transient("checkpoint rejected"));
        }
        let events = inner.pending.remove(binding).unwrap_or_default();
        inner
            .committed
            .extend(events.into_iter().map(|e| (binding.to_string(), e)));
        inner.states.insert(binding.to_string(), state.clone());
        inner.checkpoints += 1;
        Ok(())
    }

    async fn rollback(&self, binding: &str) -> Result<()> {
        self.lock().pending.remove(binding);
        Ok(())
    }
}
