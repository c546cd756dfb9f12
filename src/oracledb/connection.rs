// ABOUTME: Session pool setup for the Oracle backend
// ABOUTME: Retries transient connection failures with exponential backoff; bad credentials fail fast

use oracle::pool::{Pool, PoolBuilder};

use super::database::OracleDatabase;
use super::errors::classify;
use super::sql;
use crate::config::EndpointConfig;
use crate::error::{CaptureError, Result};
use crate::utils::Backoff;

/// Open the session pool described by `config` and verify a session can log in.
pub async fn connect(config: &EndpointConfig) -> Result<OracleDatabase> {
    let mut backoff = Backoff::new(config.initial_backoff(), config.advanced.max_retries);

    tracing::info!(
        "Connecting to {} as {} (pool size {})",
        config.address,
        config.user,
        config.advanced.pool_size
    );

    loop {
        match build_pool(config).await {
            Ok(pool) => {
                tracing::info!("Connected to {}", config.address);
                return Ok(OracleDatabase::new(pool));
            }
            Err(e) if e.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        "Connection attempt {} failed, retrying in {:?}: {}",
                        backoff.attempts(),
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

async fn build_pool(config: &EndpointConfig) -> Result<Pool> {
    let user = config.user.clone();
    let password = config.password.clone();
    let address = config.address.clone();
    let size = config.advanced.pool_size;

    tokio::task::spawn_blocking(move || -> oracle::Result<Pool> {
        let pool = PoolBuilder::new(user, password, address)
            .min_connections(1)
            .max_connections(size)
            .build()?;
        let conn = pool.get()?;
        conn.query_row_as::<String>(sql::CURRENT_USER, &[])?;
        Ok(pool)
    })
    .await
    .map_err(|e| CaptureError::transient(format!("connection task failed: {}", e)))?
    .map_err(|e| classify(e, "", false))
}
