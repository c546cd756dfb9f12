// ABOUTME: Reset command - forgets one binding's capture state
// ABOUTME: The table is snapshotted and backfilled again on the next capture run

use anyhow::{bail, Result};
use std::path::Path;

use crate::flashback::state::CaptureState;

pub async fn reset(state_path: &Path, binding: &str) -> Result<()> {
    if !state_path.exists() {
        bail!("No capture state at {:?}", state_path);
    }

    let mut state = CaptureState::load(state_path).await?;
    if state.remove(binding).is_none() {
        let known: Vec<&str> = state.bindings.keys().map(String::as_str).collect();
        bail!(
            "No state for binding {} (known bindings: {})",
            binding,
            known.join(", ")
        );
    }
    state.save(state_path).await?;

    tracing::info!("Reset {}; it will be recaptured on the next run", binding);
    Ok(())
}
