// ABOUTME: CaptureSink - the host callbacks for row emission and checkpoint commits
// ABOUTME: JsonLinesSink writes documents as JSON lines and persists state after each checkpoint

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::state::{CaptureState, ResourceState};
use super::types::RowEvent;
use crate::error::{CaptureError, Result};

/// Receives the output of table sessions.
///
/// `emit` is called for every event of a chunk or window before the single
/// `checkpoint` call that commits it. If either fails the session's state is
/// left unchanged, `rollback` is called, and the whole chunk or window is
/// fetched again.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn emit(&self, binding: &str, event: &RowEvent) -> Result<()>;

    async fn checkpoint(&self, binding: &str, state: &ResourceState) -> Result<()>;

    /// Discard events emitted for `binding` since its last checkpoint.
    /// Sinks that cannot take output back ignore this.
    async fn rollback(&self, _binding: &str) -> Result<()> {
        Ok(())
    }
}

/// Writes `{"binding": .., "doc": ..}` lines and keeps the state file current.
pub struct JsonLinesSink<W> {
    inner: Mutex<JsonLinesInner<W>>,
}

struct JsonLinesInner<W> {
    writer: W,
    state: CaptureState,
    state_path: PathBuf,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, state: CaptureState, state_path: PathBuf) -> Self {
        Self {
            inner: Mutex::new(JsonLinesInner {
                writer,
                state,
                state_path,
            }),
        }
    }

    /// Copy of the state as last committed.
    pub async fn state(&self) -> CaptureState {
        self.inner.lock().await.state.clone()
    }
}

#[async_trait]
impl<W> CaptureSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, binding: &str, event: &RowEvent) -> Result<()> {
        let line = serde_json::to_string(&json!({
            "binding": binding,
            "doc": event.document,
        }))?;

        let mut inner = self.inner.lock().await;
        inner.writer.write_all(line.as_bytes()).await?;
        inner.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn checkpoint(&self, binding: &str, state: &ResourceState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.writer.flush().await?;

        let mut next = inner.state.clone();
        next.update(binding, state.clone());
        next.save(&inner.state_path)
            .await
            .map_err(|e| CaptureError::transient(format!("{:#}", e)))?;
        inner.state = next;
        Ok(())
    }
}
