//! A single-process, JSON-backed snapshot store.
//!
//! Every "conditional update" in the component specs (`WHERE balance >= n`,
//! `WHERE status = 'pending'`) is expressed as a plain `if` inside the
//! closure passed to [`SnapshotStore::mutate`], which runs synchronously
//! under the store's write lock. That lock is what gives hold/settle/release
//! and invoice/checkout claims the same linearizability a real database's
//! row-level conditional `UPDATE` would provide. Swapping in a real RDBMS
//! later only replaces this crate, not any caller.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to prepare store directory: {0}")]
    PrepareDir(std::io::Error),
    #[error("failed to write store snapshot: {0}")]
    Write(std::io::Error),
    #[error("failed to finalize store snapshot: {0}")]
    Finalize(std::io::Error),
    #[error("failed to encode store snapshot: {0}")]
    Encode(serde_json::Error),
}

/// A generic `Arc<RwLock<State>>` guarding a single in-memory snapshot,
/// persisted to a JSON file on every mutation via temp-file-plus-rename.
pub struct SnapshotStore<S> {
    state: Arc<RwLock<S>>,
    path: Option<PathBuf>,
}

impl<S> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            path: self.path.clone(),
        }
    }
}

impl<S> SnapshotStore<S>
where
    S: Default + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Build a store backed by an optional JSON file. With no path, the
    /// store is purely in-memory (the common case in tests).
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        let state = Self::load_state(path.as_ref());
        Self {
            state: Arc::new(RwLock::new(state)),
            path,
        }
    }

    fn load_state(path: Option<&PathBuf>) -> S {
        let Some(path) = path else {
            return S::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return S::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "saturn.store",
                    path = %path.display(),
                    error = %error,
                    "failed to read snapshot store; booting with empty state",
                );
                return S::default();
            }
        };

        match serde_json::from_str::<S>(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    target: "saturn.store",
                    path = %path.display(),
                    error = %error,
                    "failed to parse snapshot store; booting with empty state",
                );
                S::default()
            }
        }
    }

    async fn persist_state(&self, snapshot: &S) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::PrepareDir)?;
        }

        let payload = serde_json::to_vec(snapshot).map_err(StoreError::Encode)?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(StoreError::Write)?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(StoreError::Finalize)?;

        Ok(())
    }

    /// Run `operation` synchronously under the store's write lock, then
    /// persist the resulting snapshot. Every conditional update the
    /// component specs describe lives inside `operation`.
    pub async fn mutate<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(&mut S) -> Result<T, E>,
        E: From<StoreError>,
    {
        let (result, snapshot) = {
            let mut state = self.state.write().await;
            let result = operation(&mut state)?;
            (result, state.clone())
        };

        self.persist_state(&snapshot).await?;
        Ok(result)
    }

    /// Read-only access to a clone of the current snapshot.
    pub async fn view<T, F>(&self, read: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        read(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::{SnapshotStore, StoreError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Counter {
        value: u64,
    }

    #[derive(Debug, thiserror::Error)]
    enum CounterError {
        #[error(transparent)]
        Store(#[from] StoreError),
        #[error("would go negative")]
        Negative,
    }

    #[tokio::test]
    async fn mutate_applies_conditional_update_and_persists() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.json");
        let store: SnapshotStore<Counter> = SnapshotStore::new(Some(path.clone()));

        store
            .mutate(|state| -> Result<(), CounterError> {
                state.value += 5;
                Ok(())
            })
            .await?;

        let reloaded: SnapshotStore<Counter> = SnapshotStore::new(Some(path));
        let value = reloaded.view(|state| state.value).await;
        assert_eq!(value, 5);
        Ok(())
    }

    #[tokio::test]
    async fn conditional_update_rejects_when_predicate_fails() {
        let store: SnapshotStore<Counter> = SnapshotStore::new(None);
        let result = store
            .mutate(|state| -> Result<(), CounterError> {
                if state.value == 0 {
                    return Err(CounterError::Negative);
                }
                state.value -= 1;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CounterError::Negative)));
    }
}
