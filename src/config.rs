// ABOUTME: Endpoint configuration - connection, table selection, and advanced capture knobs
// ABOUTME: Loaded from a TOML file and validated before any database work starts

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::utils::{parse_oracle_url, strip_password_from_url};

/// Table include/exclude rules, each entry in `OWNER.TABLE` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    include_tables: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_tables: Option<Vec<String>>,
}

impl TableFilter {
    pub fn new(
        include_tables: Option<Vec<String>>,
        exclude_tables: Option<Vec<String>>,
    ) -> Result<Self> {
        let filter = Self {
            include_tables,
            exclude_tables,
        };
        filter.validate()?;
        Ok(filter)
    }

    fn validate(&self) -> Result<()> {
        if self.include_tables.is_some() && self.exclude_tables.is_some() {
            bail!("Cannot use both include_tables and exclude_tables");
        }
        for table in self
            .include_tables
            .iter()
            .chain(self.exclude_tables.iter())
            .flatten()
        {
            if !table.contains('.') {
                bail!("Table must be specified as 'OWNER.TABLE', got '{}'", table);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.include_tables.is_none() && self.exclude_tables.is_none()
    }

    /// Whether `OWNER.TABLE` should be captured.
    pub fn allows(&self, qualified: &str) -> bool {
        if let Some(ref include) = self.include_tables {
            return include.iter().any(|t| t == qualified);
        }
        if let Some(ref exclude) = self.exclude_tables {
            return !exclude.iter().any(|t| t == qualified);
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    /// Downgrade failed retention checks to warnings.
    pub skip_flashback_retention_checks: bool,
    /// Rows per backfill query.
    pub backfill_chunk_size: usize,
    /// Seconds between incremental polls.
    pub default_interval: u64,
    /// Pooled database sessions; at least one per concurrently active table
    /// avoids waiting on the pool.
    pub pool_size: u32,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// `OWNER.TABLE` to key columns.
    pub key_overrides: BTreeMap<String, Vec<String>>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            skip_flashback_retention_checks: false,
            backfill_chunk_size: 50_000,
            default_interval: 300,
            pool_size: 4,
            max_retries: 5,
            initial_backoff_ms: 1_000,
            key_overrides: BTreeMap::new(),
        }
    }
}

/// Connection and capture settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// EZConnect string, `host:port/service`
    pub address: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Owners to capture; empty means every non-system owner.
    pub owners: Vec<String>,
    #[serde(flatten)]
    pub filter: TableFilter,
    pub advanced: AdvancedConfig,
}

impl EndpointConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: EndpointConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Fill address, user and password from an `oracle://` URL.
    pub fn apply_url(&mut self, url: &str) -> Result<()> {
        let parts = parse_oracle_url(url).with_context(|| {
            format!(
                "Invalid connection URL {}",
                strip_password_from_url(url).unwrap_or_else(|_| "<unparseable>".to_string())
            )
        })?;
        self.address = parts.connect_string;
        self.user = parts.user;
        if let Some(password) = parts.password {
            self.password = password;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            bail!("Missing database address (host:port/service)");
        }
        if self.user.trim().is_empty() {
            bail!("Missing database user");
        }
        if self.advanced.backfill_chunk_size == 0 {
            bail!("advanced.backfill_chunk_size must be at least 1");
        }
        if self.advanced.pool_size == 0 {
            bail!("advanced.pool_size must be at least 1");
        }
        if self.advanced.default_interval == 0 {
            bail!("advanced.default_interval must be at least 1 second");
        }
        self.filter.validate()?;
        for (table, key) in &self.advanced.key_overrides {
            if !table.contains('.') {
                bail!("Key override must name 'OWNER.TABLE', got '{}'", table);
            }
            if key.is_empty() {
                bail!("Key override for {} must list at least one column", table);
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.advanced.default_interval)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.advanced.initial_backoff_ms)
    }
}
