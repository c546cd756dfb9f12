// ABOUTME: Discover command - lists the tables that would become capture bindings
// ABOUTME: Prints each binding's name, collection key and columns as JSON

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::EndpointConfig;
use crate::flashback::daemon::DaemonConfig;
use crate::flashback::discovery::discover_tables;
use crate::oracledb;

pub async fn discover(config: &EndpointConfig) -> Result<()> {
    let db = oracledb::connect(config)
        .await
        .context("Failed to connect to source database")?;
    let options = DaemonConfig::from_endpoint(config).discovery;

    let tables = discover_tables(&db, &options)
        .await
        .context("Failed to discover tables")?;

    let bindings: Vec<_> = tables
        .iter()
        .map(|t| {
            json!({
                "binding": t.binding_name(),
                "owner": t.owner,
                "table": t.name,
                "key": t.key_pointers(),
                "columns": t.columns.iter().map(|c| json!({
                    "name": c.name,
                    "type": c.data_type,
                    "nullable": c.nullable,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&bindings)?);
    Ok(())
}
