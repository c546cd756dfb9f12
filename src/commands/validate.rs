// ABOUTME: Validate command - checks that undo retention supports consistent capture
// ABOUTME: Prints a pass/warn/fail report and fails when a required condition is not met

use anyhow::{bail, Context, Result};

use crate::config::EndpointConfig;
use crate::flashback::database::FlashbackDatabase;
use crate::flashback::retention::evaluate;
use crate::oracledb;

pub async fn validate(config: &EndpointConfig) -> Result<()> {
    let db = oracledb::connect(config)
        .await
        .context("Failed to connect to source database")?;

    let retention = db
        .retention_config()
        .await
        .context("Failed to read undo retention configuration")?;
    let report = evaluate(&retention, config.advanced.skip_flashback_retention_checks);
    report.print();

    if let Some(failure) = report.failures().next() {
        bail!("{}", failure.message);
    }
    Ok(())
}
