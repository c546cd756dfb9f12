// ABOUTME: Catalog discovery - enumerates tables, columns and primary keys from the catalog
// ABOUTME: Groups columns per (owner, table) into immutable, pre-quoted table descriptors

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::database::FlashbackDatabase;
use super::types::{Column, Table};
use crate::config::TableFilter;
use crate::error::{CaptureError, Result};

/// A base table as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub owner: String,
    pub table_name: String,
}

/// A column as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub owner: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Ordinal position within the table.
    pub column_id: u32,
    /// Position within the primary key, if the column is part of it.
    pub primary_key_position: Option<u32>,
}

/// Knobs controlling which tables become bindings.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Owners to discover; empty means every non-system owner.
    pub owners: Vec<String>,
    pub filter: TableFilter,
    /// `OWNER.TABLE` to key columns, replacing the discovered primary key.
    pub key_overrides: BTreeMap<String, Vec<String>>,
}

/// Discover every capturable table and check it is readable.
pub async fn discover_tables(
    db: &dyn FlashbackDatabase,
    options: &DiscoveryOptions,
) -> Result<Vec<Arc<Table>>> {
    let tables = catalog_tables(db, options).await?;
    for table in &tables {
        ensure_readable(db, table).await?;
    }

    tracing::info!("Discovered {} table(s)", tables.len());
    Ok(tables)
}

/// Build descriptors from the catalog alone, without touching table data.
pub async fn catalog_tables(
    db: &dyn FlashbackDatabase,
    options: &DiscoveryOptions,
) -> Result<Vec<Arc<Table>>> {
    let catalog_tables = db.list_tables(&options.owners).await?;

    let mut owners: Vec<String> = catalog_tables.iter().map(|t| t.owner.clone()).collect();
    owners.sort();
    owners.dedup();

    let catalog_columns = if owners.is_empty() {
        Vec::new()
    } else {
        db.list_columns(&owners).await?
    };

    let tables = build_tables(catalog_tables, catalog_columns, options)?;
    Ok(tables.into_iter().map(Arc::new).collect())
}

/// Check the capture user can read `table`.
///
/// Missing privileges become a configuration error naming the user. Any other
/// failure keeps its kind so callers can retry or pause.
pub async fn ensure_readable(db: &dyn FlashbackDatabase, table: &Table) -> Result<()> {
    match db.probe_table(table).await {
        Ok(()) => Ok(()),
        Err(e @ CaptureError::Configuration(_)) => {
            let user = db
                .current_user()
                .await
                .unwrap_or_else(|_| "<unknown>".to_string());
            Err(CaptureError::configuration(format!(
                "table {} is not readable by user {}: {}",
                table.qualified_name(),
                user,
                e
            )))
        }
        Err(e) => Err(e.for_table(&table.qualified_name())),
    }
}

/// Group catalog rows into table descriptors.
///
/// Tables are returned sorted by `OWNER.TABLE` so discovery output is stable.
pub fn build_tables(
    catalog_tables: Vec<CatalogTable>,
    catalog_columns: Vec<CatalogColumn>,
    options: &DiscoveryOptions,
) -> Result<Vec<Table>> {
    let mut by_table: HashMap<(String, String), Vec<CatalogColumn>> = HashMap::new();
    for column in catalog_columns {
        by_table
            .entry((column.owner.clone(), column.table_name.clone()))
            .or_default()
            .push(column);
    }

    let mut tables = Vec::new();
    for ct in catalog_tables {
        let qualified = format!("{}.{}", ct.owner, ct.table_name);
        if !options.filter.allows(&qualified) {
            tracing::debug!("Skipping {} (excluded by table filter)", qualified);
            continue;
        }

        let mut columns = by_table
            .remove(&(ct.owner.clone(), ct.table_name.clone()))
            .unwrap_or_default();
        columns.sort_by_key(|c| c.column_id);

        let mut key_columns: Vec<&CatalogColumn> = columns
            .iter()
            .filter(|c| c.primary_key_position.is_some())
            .collect();
        key_columns.sort_by_key(|c| c.primary_key_position);
        let discovered_key: Vec<String> =
            key_columns.iter().map(|c| c.column_name.clone()).collect();

        let primary_key = match options.key_overrides.get(&qualified) {
            Some(override_key) => {
                if override_key != &discovered_key {
                    tracing::warn!(
                        "Configured key {:?} for {} differs from database primary key {:?}",
                        override_key,
                        qualified,
                        discovered_key
                    );
                }
                override_key.clone()
            }
            None => discovered_key,
        };

        if primary_key.is_empty() {
            tracing::info!(
                "{} has no primary key; documents will be keyed by ROWID",
                qualified
            );
        }

        let columns = columns
            .into_iter()
            .map(|c| Column::new(c.column_name, c.data_type, c.nullable))
            .collect();

        tables.push(Table::build(ct.owner, ct.table_name, columns, primary_key)?);
    }

    tables.sort_by_key(|t| t.qualified_name());
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(owner: &str, name: &str) -> CatalogTable {
        CatalogTable {
            owner: owner.to_string(),
            table_name: name.to_string(),
        }
    }

    fn column(owner: &str, t: &str, name: &str, id: u32, pk: Option<u32>) -> CatalogColumn {
        CatalogColumn {
            owner: owner.to_string(),
            table_name: t.to_string(),
            column_name: name.to_string(),
            data_type: "NUMBER".to_string(),
            nullable: pk.is_none(),
            column_id: id,
            primary_key_position: pk,
        }
    }

    #[test]
    fn test_groups_columns_by_owner_and_table() {
        let tables = vec![table("SALES", "ORDERS"), table("HR", "ORDERS")];
        let columns = vec![
            column("SALES", "ORDERS", "TOTAL", 2, None),
            column("SALES", "ORDERS", "ID", 1, Some(1)),
            column("HR", "ORDERS", "X", 1, None),
        ];

        let built = build_tables(tables, columns, &DiscoveryOptions::default()).unwrap();
        assert_eq!(built.len(), 2);

        let hr = &built[0];
        assert_eq!(hr.qualified_name(), "HR.ORDERS");
        assert!(hr.primary_key.is_empty());

        let sales = &built[1];
        assert_eq!(sales.columns[0].name, "ID");
        assert_eq!(sales.columns[1].name, "TOTAL");
        assert_eq!(sales.primary_key, vec!["ID".to_string()]);
    }

    #[test]
    fn test_composite_key_follows_key_position() {
        let tables = vec![table("SALES", "LINES")];
        let columns = vec![
            column("SALES", "LINES", "LINE_NO", 1, Some(2)),
            column("SALES", "LINES", "ORDER_ID", 2, Some(1)),
        ];
        let built = build_tables(tables, columns, &DiscoveryOptions::default()).unwrap();
        assert_eq!(
            built[0].primary_key,
            vec!["ORDER_ID".to_string(), "LINE_NO".to_string()]
        );
    }

    #[test]
    fn test_table_without_columns_is_configuration_error() {
        let err = build_tables(
            vec![table("SALES", "GHOST")],
            vec![],
            &DiscoveryOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
    }

    #[test]
    fn test_key_override_replaces_discovered_key() {
        let mut options = DiscoveryOptions::default();
        options
            .key_overrides
            .insert("SALES.ORDERS".to_string(), vec!["CODE".to_string()]);
        let built = build_tables(
            vec![table("SALES", "ORDERS")],
            vec![
                column("SALES", "ORDERS", "ID", 1, Some(1)),
                column("SALES", "ORDERS", "CODE", 2, None),
            ],
            &options,
        )
        .unwrap();
        assert_eq!(built[0].primary_key, vec!["CODE".to_string()]);
    }

    #[test]
    fn test_filter_excludes_tables() {
        let options = DiscoveryOptions {
            filter: TableFilter::new(None, Some(vec!["SALES.AUDIT".to_string()])).unwrap(),
            ..Default::default()
        };
        let built = build_tables(
            vec![table("SALES", "ORDERS"), table("SALES", "AUDIT")],
            vec![
                column("SALES", "ORDERS", "ID", 1, Some(1)),
                column("SALES", "AUDIT", "ID", 1, None),
            ],
            &options,
        )
        .unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name, "ORDERS");
    }
}
