// ABOUTME: Resumable capture state - backfill progress, incremental cursor, session status
// ABOUTME: Persists per-binding state to a JSON file so a restarted capture resumes exactly

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::{RowId, Scn};
use crate::utils::strip_password_from_url;

/// Progress of the one-time backfill of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillState {
    /// Last ROWID successfully emitted, `None` before the first page.
    pub next_page: Option<RowId>,
    /// Largest ROWID present when the snapshot was taken.
    pub cutoff: RowId,
    /// Snapshot marker every backfill read is pinned to.
    pub scn: Scn,
}

impl BackfillState {
    pub fn new(cutoff: RowId, scn: Scn) -> Self {
        Self {
            next_page: None,
            cutoff,
            scn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalState {
    /// Marker through which all changes have been emitted.
    pub cursor: Scn,
}

/// Lifecycle of a table's capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    /// Paused after schema drift until the table is discovered again.
    SoftFailed { reason: String, at: DateTime<Utc> },
    /// Stopped; an operator must reset the binding.
    Failed { reason: String, at: DateTime<Utc> },
}

impl SessionStatus {
    pub fn soft_failed(reason: impl Into<String>) -> Self {
        SessionStatus::SoftFailed {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SessionStatus::Failed {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }
}

/// State of one binding: an optional backfill plus the incremental cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Absent once backfill finished, or when the table was empty at snapshot time.
    pub backfill: Option<BackfillState>,
    pub inc: IncrementalState,
    #[serde(default)]
    pub status: SessionStatus,
}

impl ResourceState {
    /// Initial state for a table snapshotted at `scn`.
    pub fn initial(max_rowid: Option<RowId>, scn: Scn) -> Self {
        Self {
            backfill: max_rowid.map(|cutoff| BackfillState::new(cutoff, scn)),
            inc: IncrementalState { cursor: scn },
            status: SessionStatus::Active,
        }
    }

    pub fn is_backfilling(&self) -> bool {
        self.backfill.is_some()
    }
}

/// Overall capture state for a source database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureState {
    /// Source connection (sanitized - no password)
    pub source: String,
    /// Per-binding state, keyed by `OWNER_TABLE`
    pub bindings: BTreeMap<String, ResourceState>,
    /// Version of the state format for future migrations
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaptureState {
    pub fn new(source: &str) -> Self {
        let now = Utc::now();
        Self {
            source: strip_password_from_url(source).unwrap_or_else(|_| source.to_string()),
            bindings: BTreeMap::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, binding: &str) -> Option<&ResourceState> {
        self.bindings.get(binding)
    }

    /// Replace a binding's state after a successful checkpoint.
    pub fn update(&mut self, binding: &str, state: ResourceState) {
        self.bindings.insert(binding.to_string(), state);
        self.updated_at = Utc::now();
    }

    /// Forget a binding so it is snapshotted again on the next run.
    pub fn remove(&mut self, binding: &str) -> Option<ResourceState> {
        let removed = self.bindings.remove(binding);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Load state from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read capture state from {:?}", path))?;
        let state: CaptureState = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse capture state from {:?}", path))?;
        Ok(state)
    }

    /// Save state to a JSON file, replacing the previous file atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize capture state")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write capture state to {:?}", tmp))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move capture state into {:?}", path))?;
        Ok(())
    }

    /// Load the state file if it exists, otherwise start fresh.
    pub async fn load_or_new(path: &Path, source: &str) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            let state = Self::load(path).await?;
            tracing::info!("Loaded existing capture state from {:?}", path);
            return Ok(state);
        }
        tracing::info!("Creating new capture state");
        Ok(Self::new(source))
    }

    /// Get the default state file path for the current directory
    pub fn default_path() -> PathBuf {
        PathBuf::from(".flashback-capture/state.json")
    }
}
