// ABOUTME: SQL text for catalog, retention, and flashback queries
// ABOUTME: Identifiers come pre-quoted from the table descriptor; values are always bound

use crate::flashback::types::Table;

pub const FLASHBACK_ON: &str = "SELECT flashback_on FROM V$DATABASE";

pub const UNDO_PARAMETERS: &str = "SELECT name, value FROM V$PARAMETER \
     WHERE name IN ('undo_tablespace', 'undo_management', 'undo_retention')";

pub const UNDO_TABLESPACE: &str =
    "SELECT max_size, retention FROM DBA_TABLESPACES WHERE tablespace_name = :tablespace";

pub const UNDO_AUTOEXTEND: &str =
    "SELECT autoextensible FROM DBA_DATA_FILES WHERE tablespace_name = :tablespace";

/// V$UNDOSTAT keeps four days of ten-minute samples.
pub const AVG_TUNED_RETENTION: &str =
    "SELECT AVG(tuned_undoretention) FROM V$UNDOSTAT WHERE begin_time > SYSDATE - 4";

pub const CURRENT_SCN: &str = "SELECT current_scn FROM V$DATABASE";

pub const CURRENT_USER: &str = "SELECT USER FROM DUAL";

/// Base tables outside Oracle-maintained schemas, optionally limited by owner.
pub fn list_tables(owner_count: usize) -> String {
    format!(
        "SELECT t.owner, t.table_name FROM all_tables t \
         JOIN all_users u ON u.username = t.owner \
         WHERE u.oracle_maintained = 'N' \
         AND t.nested = 'NO' AND t.temporary = 'N' AND t.secondary = 'N' \
         AND t.dropped = 'NO' AND t.table_name NOT LIKE 'BIN$%'{} \
         ORDER BY t.owner, t.table_name",
        owner_filter("t.owner", owner_count)
    )
}

/// Columns of the given owners' tables with their primary-key positions.
pub fn list_columns(owner_count: usize) -> String {
    format!(
        "SELECT c.owner, c.table_name, c.column_name, c.data_type, c.nullable, c.column_id, pk.position \
         FROM all_tab_columns c \
         LEFT JOIN (\
             SELECT cc.owner, cc.table_name, cc.column_name, cc.position \
             FROM all_constraints k \
             JOIN all_cons_columns cc ON cc.owner = k.owner AND cc.constraint_name = k.constraint_name \
             WHERE k.constraint_type = 'P'\
         ) pk ON pk.owner = c.owner AND pk.table_name = c.table_name AND pk.column_name = c.column_name \
         WHERE 1 = 1{} \
         ORDER BY c.owner, c.table_name, c.column_id",
        owner_filter("c.owner", owner_count)
    )
}

/// Bind names `:owner0 .. :ownerN` used by the owner filters.
pub fn owner_binds(owner_count: usize) -> Vec<String> {
    (0..owner_count).map(|i| format!("owner{}", i)).collect()
}

fn owner_filter(column: &str, owner_count: usize) -> String {
    if owner_count == 0 {
        return String::new();
    }
    let binds: Vec<String> = owner_binds(owner_count)
        .iter()
        .map(|b| format!(":{}", b))
        .collect();
    format!(" AND {} IN ({})", column, binds.join(", "))
}

pub fn probe_table(table: &Table) -> String {
    format!(
        "SELECT {} FROM {} WHERE 1 = 0",
        table.select_list(),
        table.quoted_qualified_name()
    )
}

pub fn max_rowid(table: &Table) -> String {
    format!(
        "SELECT ROWIDTOCHAR(MAX(ROWID)) FROM {}",
        table.quoted_qualified_name()
    )
}

/// One backfill page: rows in `(:after, :cutoff]` as of `:scn`, by ROWID.
///
/// The first page has no lower bound.
pub fn backfill_page(table: &Table, has_after: bool) -> String {
    let lower = if has_after {
        "ROWID > CHARTOROWID(:after) AND "
    } else {
        ""
    };
    format!(
        "SELECT ROWIDTOCHAR(ROWID), {} FROM {} AS OF SCN :scn \
         WHERE {}ROWID <= CHARTOROWID(:cutoff) \
         ORDER BY ROWID FETCH FIRST :limit ROWS ONLY",
        table.select_list(),
        table.quoted_qualified_name(),
        lower
    )
}

/// Every version committed in `(:lower, :upper]`, by commit marker.
pub fn versions_between(table: &Table) -> String {
    format!(
        "SELECT VERSIONS_STARTSCN, VERSIONS_OPERATION, ROWIDTOCHAR(ROWID), {} \
         FROM {} VERSIONS BETWEEN SCN :lower AND :upper \
         WHERE VERSIONS_STARTSCN > :lower AND VERSIONS_STARTSCN <= :upper \
         ORDER BY VERSIONS_STARTSCN",
        table.select_list(),
        table.quoted_qualified_name()
    )
}

pub fn row_exists(table: &Table) -> String {
    format!(
        "SELECT COUNT(*) FROM {} AS OF SCN :scn WHERE ROWID = CHARTOROWID(:row_id)",
        table.quoted_qualified_name()
    )
}
