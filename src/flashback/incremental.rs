// ABOUTME: Incremental fetcher - reads row versions committed between two SCN markers
// ABOUTME: Collapses each row to its latest version and classifies unreported operations

use std::collections::HashMap;

use serde_json::Value;

use super::database::FlashbackDatabase;
use super::types::{ChangeOp, RowEvent, RowId, RowVersion, Scn, Table};
use crate::error::Result;

/// All changes of one table in `(lower, upper]`.
#[derive(Debug, Clone)]
pub struct ChangeWindow {
    pub lower: Scn,
    pub upper: Scn,
    /// Ascending by commit marker.
    pub events: Vec<RowEvent>,
}

impl ChangeWindow {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Read changes since `lower`, up to the marker observed right now.
pub async fn fetch_changes(
    db: &dyn FlashbackDatabase,
    table: &Table,
    lower: Scn,
) -> Result<ChangeWindow> {
    let upper = db.current_scn().await?;
    fetch_window(db, table, lower, upper).await
}

/// Read the changes of `(lower, upper]`.
///
/// Returns one event per touched row, its latest version as of `upper`.
/// An empty or inverted range yields an empty window without a query.
pub async fn fetch_window(
    db: &dyn FlashbackDatabase,
    table: &Table,
    lower: Scn,
    upper: Scn,
) -> Result<ChangeWindow> {
    if upper <= lower {
        return Ok(ChangeWindow {
            lower,
            upper: lower,
            events: Vec::new(),
        });
    }

    let versions = db
        .fetch_versions(table, lower, upper)
        .await
        .map_err(|e| e.for_table(&table.qualified_name()))?;
    let version_count = versions.len();

    let collapsed = latest_versions(table, versions);

    // Newest marker seen at each address. A ROWID freed by a delete can be
    // handed to another row within the same window.
    let mut newest_at: HashMap<&RowId, Scn> = HashMap::with_capacity(collapsed.len());
    for version in &collapsed {
        let scn = newest_at.entry(&version.row_id).or_insert(version.scn);
        *scn = (*scn).max(version.scn);
    }
    let moved_out: Vec<bool> = collapsed
        .iter()
        .map(|v| newest_at.get(&v.row_id).is_some_and(|scn| *scn > v.scn))
        .collect();

    let mut events = Vec::with_capacity(collapsed.len());
    for (version, moved_out) in collapsed.into_iter().zip(moved_out) {
        let op = match version.operation {
            // Another key holds this address now, so this key is gone
            _ if moved_out => ChangeOp::Delete,
            Some(op) => op,
            None => {
                // Without an operation the only way to tell a delete apart is
                // to check whether the row still exists at the upper bound.
                if db
                    .row_exists(table, &version.row_id, upper)
                    .await
                    .map_err(|e| e.for_table(&table.qualified_name()))?
                {
                    ChangeOp::Update
                } else {
                    ChangeOp::Delete
                }
            }
        };
        events.push(RowEvent::change(table, op, version));
    }

    tracing::debug!(
        "Change window for {} (SCN {} -> {}): {} version(s), {} event(s)",
        table.qualified_name(),
        lower,
        upper,
        version_count,
        events.len()
    );

    Ok(ChangeWindow {
        lower,
        upper,
        events,
    })
}

/// Identity of the row a version belongs to. Keyed tables use the primary-key
/// values because a ROWID can be reused once its row is deleted.
fn row_identity(table: &Table, version: &RowVersion) -> String {
    if table.has_primary_key() {
        let key = table
            .primary_key
            .iter()
            .map(|k| version.values.get(k).cloned().unwrap_or(Value::Null))
            .collect();
        Value::Array(key).to_string()
    } else {
        version.row_id.to_string()
    }
}

/// Keep only the newest version of each row, ordered by commit marker.
fn latest_versions(table: &Table, versions: Vec<RowVersion>) -> Vec<RowVersion> {
    let mut latest: HashMap<String, RowVersion> = HashMap::with_capacity(versions.len());
    for version in versions {
        let identity = row_identity(table, &version);
        match latest.get(&identity) {
            Some(existing) if existing.scn > version.scn => {}
            _ => {
                latest.insert(identity, version);
            }
        }
    }

    let mut collapsed: Vec<RowVersion> = latest.into_values().collect();
    collapsed.sort_by(|a, b| {
        a.scn
            .cmp(&b.scn)
            .then_with(|| a.row_id.as_str().cmp(b.row_id.as_str()))
    });
    collapsed
}
