// ABOUTME: Core data model for flashback capture - SCN markers, ROWIDs, table descriptors
// ABOUTME: Also defines the row images and change events emitted to the host

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::{CaptureError, Result};
use crate::utils::quote_ident;

/// JSON pointer of the synthetic key used for tables without a primary key.
pub const ROW_ID_POINTER: &str = "/_meta/source/row_id";

/// System change number: the database's global, monotonically increasing
/// commit marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scn(pub u64);

impl Scn {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Scn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque physical row address.
///
/// Ordering is defined by the database, not by this string, so the type is
/// deliberately not `Ord`. The engine only ever compares ROWIDs for equality
/// and lets the database order them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Information about a table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip)]
    pub quoted_name: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let name = name.into();
        Self {
            quoted_name: quote_ident(&name),
            name,
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Immutable descriptor of one captured table, built once per discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub owner: String,
    pub name: String,
    pub columns: Vec<Column>,
    /// Primary-key column names in key order. Empty for keyless tables.
    pub primary_key: Vec<String>,
    #[serde(skip)]
    pub quoted_owner: String,
    #[serde(skip)]
    pub quoted_name: String,
}

impl Table {
    pub fn build(
        owner: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<Column>,
        primary_key: Vec<String>,
    ) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();

        if columns.is_empty() {
            return Err(CaptureError::configuration(format!(
                "table {}.{} has no columns visible to the capture user",
                owner, name
            )));
        }
        for key in &primary_key {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(CaptureError::configuration(format!(
                    "primary key column {} is not a column of {}.{}",
                    key, owner, name
                )));
            }
        }

        Ok(Self {
            quoted_owner: quote_ident(&owner),
            quoted_name: quote_ident(&name),
            owner,
            name,
            columns,
            primary_key,
        })
    }

    /// `OWNER.TABLE`, used in logs and error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    /// `"OWNER"."TABLE"`, safe to interpolate into SQL text.
    pub fn quoted_qualified_name(&self) -> String {
        format!("{}.{}", self.quoted_owner, self.quoted_name)
    }

    /// Resource name under which the table's state is stored.
    pub fn binding_name(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }

    /// Comma-separated quoted column list for SELECT statements.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.quoted_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Collection key as JSON pointers into emitted documents.
    pub fn key_pointers(&self) -> Vec<String> {
        if self.has_primary_key() {
            self.primary_key.iter().map(|c| format!("/{}", c)).collect()
        } else {
            vec![ROW_ID_POINTER.to_string()]
        }
    }
}

/// One row read by a backfill query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub row_id: RowId,
    pub values: Map<String, Value>,
}

/// One row version returned by a versions-between query.
#[derive(Debug, Clone, PartialEq)]
pub struct RowVersion {
    /// Commit marker of the transaction that produced this version.
    pub scn: Scn,
    /// `None` when the database did not report the operation.
    pub operation: Option<ChangeOp>,
    pub row_id: RowId,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    /// Operation code carried in `_meta.op`.
    pub fn as_meta(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "c",
            ChangeOp::Update => "u",
            ChangeOp::Delete => "d",
        }
    }

    /// Parse Oracle's `VERSIONS_OPERATION` pseudo-column.
    pub fn from_versions_operation(value: &str) -> Option<Self> {
        match value.trim() {
            "I" => Some(ChangeOp::Insert),
            "U" => Some(ChangeOp::Update),
            "D" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// A row event handed to the host: a full row image or a deletion marker.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEvent {
    pub op: ChangeOp,
    pub row_id: RowId,
    pub scn: Scn,
    pub document: Map<String, Value>,
}

impl RowEvent {
    /// Row image read by the backfill, pinned at the snapshot marker.
    pub fn backfill(table: &Table, row: SourceRow, scn: Scn) -> Self {
        Self::image(table, ChangeOp::Insert, row.row_id, row.values, scn)
    }

    /// Event for a row version observed by the incremental phase.
    pub fn change(table: &Table, op: ChangeOp, version: RowVersion) -> Self {
        match op {
            ChangeOp::Delete => {
                Self::deletion(table, version.row_id, &version.values, version.scn)
            }
            _ => Self::image(table, op, version.row_id, version.values, version.scn),
        }
    }

    fn image(
        table: &Table,
        op: ChangeOp,
        row_id: RowId,
        values: Map<String, Value>,
        scn: Scn,
    ) -> Self {
        let mut document = values;
        document.insert("_meta".to_string(), meta(table, op, &row_id, scn));
        Self {
            op,
            row_id,
            scn,
            document,
        }
    }

    /// Deletion marker carrying only the key columns.
    fn deletion(table: &Table, row_id: RowId, values: &Map<String, Value>, scn: Scn) -> Self {
        let mut document: Map<String, Value> = table
            .primary_key
            .iter()
            .map(|k| (k.clone(), values.get(k).cloned().unwrap_or(Value::Null)))
            .collect();
        document.insert(
            "_meta".to_string(),
            meta(table, ChangeOp::Delete, &row_id, scn),
        );
        Self {
            op: ChangeOp::Delete,
            row_id,
            scn,
            document,
        }
    }

    /// Values of the collection key, in key order.
    pub fn key(&self, table: &Table) -> Vec<Value> {
        if table.has_primary_key() {
            table
                .primary_key
                .iter()
                .map(|k| self.document.get(k).cloned().unwrap_or(Value::Null))
                .collect()
        } else {
            vec![Value::String(self.row_id.to_string())]
        }
    }
}

fn meta(table: &Table, op: ChangeOp, row_id: &RowId, scn: Scn) -> Value {
    json!({
        "op": op.as_meta(),
        "source": {
            "schema": table.owner,
            "table": table.name,
            "row_id": row_id.as_str(),
            "scn": scn.value(),
        }
    })
}
