//! Durable local view for the messenger core.
//!
//! A key-indexed document store persisted as a single JSON file. Writes go
//! through [`Store::tx`], a unit-of-work that either commits every mutation
//! of the closure or none of them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

pub mod error;
mod tables;

pub use error::StoreError;
pub use tables::Tables;

struct Inner {
    path: Option<PathBuf>,
    tables: Tables,
}

impl Inner {
    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let serialized =
            serde_json::to_string_pretty(&self.tables).map_err(|_| StoreError::Codec)?;
        fs::write(path, serialized).map_err(|_| StoreError::Io)
    }
}

/// Working copy handed to a [`Store::tx`] closure. Dropped without effect
/// when the closure errors.
pub struct StoreTx {
    tables: Tables,
}

impl std::ops::Deref for StoreTx {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl std::ops::DerefMut for StoreTx {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

impl Store {
    /// Open (or create) a store file. The parent directory is created on
    /// demand.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| StoreError::Io)?;
        }
        let tables = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|_| StoreError::Io)?;
            serde_json::from_str(&content).map_err(|_| StoreError::Codec)?
        } else {
            Tables::default()
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path: Some(path),
                tables,
            })),
        })
    }

    pub fn open_in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: None,
                tables: Tables::default(),
            })),
        }
    }

    /// Run `f` against a working copy of the tables. On `Ok` the copy
    /// replaces the live tables and is persisted; on `Err` it is discarded.
    pub async fn tx<T, E>(&self, f: impl FnOnce(&mut StoreTx) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut inner = self.inner.lock().await;
        let mut work = StoreTx {
            tables: inner.tables.clone(),
        };
        let out = f(&mut work)?;
        inner.tables = work.tables;
        inner.persist()?;
        Ok(out)
    }

    /// Read-only access to the live tables.
    pub async fn view<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let inner = self.inner.lock().await;
        f(&inner.tables)
    }

    pub async fn snapshot(&self) -> std::collections::BTreeMap<String, Vec<u8>> {
        self.view(|t| t.snapshot()).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.tables.clear();
        inner.persist()
    }
}
