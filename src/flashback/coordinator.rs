// ABOUTME: Phase coordinator - per-table exclusive scope shared by backfill and incremental fetches
// ABOUTME: The scope guards the table's state, so phases never interleave or read stale state

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusive access to one table's state. Released on drop, including when
/// the holder fails or its future is cancelled.
pub type PhaseGuard<S> = OwnedMutexGuard<S>;

/// Handle to one table's exclusive scope.
pub struct PhaseScope<S> {
    key: Arc<str>,
    cell: Arc<AsyncMutex<S>>,
}

impl<S> Clone for PhaseScope<S> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<S> PhaseScope<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for exclusive access to the table's state.
    pub async fn enter(&self) -> PhaseGuard<S> {
        match Arc::clone(&self.cell).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Waiting for phase scope of {}", self.key);
                Arc::clone(&self.cell).lock_owned().await
            }
        }
    }

    /// Enter the scope only if nobody holds it.
    pub fn try_enter(&self) -> Option<PhaseGuard<S>> {
        Arc::clone(&self.cell).try_lock_owned().ok()
    }
}

/// Registry of per-table scopes.
///
/// Every fetch for a table must go through the scope registered under that
/// table's key. Registering the same key twice hands back the same scope, so
/// overlapping scheduler ticks serialize on one lock.
pub struct PhaseCoordinator<S> {
    scopes: Mutex<HashMap<String, PhaseScope<S>>>,
}

impl<S> Default for PhaseCoordinator<S> {
    fn default() -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> PhaseCoordinator<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope for `key`, created with `init` if it does not exist yet.
    pub fn register(&self, key: &str, init: impl FnOnce() -> S) -> PhaseScope<S> {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes
            .entry(key.to_string())
            .or_insert_with(|| PhaseScope {
                key: Arc::from(key),
                cell: Arc::new(AsyncMutex::new(init())),
            })
            .clone()
    }

    pub fn scope(&self, key: &str) -> Option<PhaseScope<S>> {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<PhaseScope<S>> {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes.remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = scopes.keys().cloned().collect();
        keys.sort();
        keys
    }
}
