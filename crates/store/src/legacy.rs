use crate::codec::ValueCodec;
use crate::error::{Result, StoreError};
use crate::kv::KvStore;
use crate::lock::{acquire_store_lock, StoreLock};
use crate::slice::Slice;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

const CODEC: ValueCodec = ValueCodec::Base64Json;

struct LegacyState {
    slice: Slice,
    // `None` once closed
    lock: Option<StoreLock>,
}

/// Single-file store: every key lives in one JSON object that is rewritten
/// after each mutation. Kept for reading old databases and migrating them.
pub struct LegacyStore {
    path: PathBuf,
    state: Mutex<LegacyState>,
}

impl LegacyStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Opening legacy store {}", path.display());
        let lock = acquire_store_lock(lock_path_for_file(&path)).await?;
        let slice = Slice::load(&path).await?;
        log::debug!("Legacy store holds {} keys", slice.len());
        Ok(Self {
            path,
            state: Mutex::new(LegacyState {
                slice,
                lock: Some(lock),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.state().await?.slice.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn state(&self) -> Result<MutexGuard<'_, LegacyState>> {
        let state = self.state.lock().await;
        if state.lock.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(state)
    }

    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.lock.is_none() {
            return Ok(());
        }
        if state.slice.is_dirty() {
            state.slice.save(&self.path, false).await?;
        }
        state.lock = None;
        Ok(())
    }
}

fn lock_path_for_file(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

#[async_trait]
impl KvStore for LegacyStore {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let state = self.state().await?;
        state
            .slice
            .get(key)
            .map(|cell| CODEC.decode(key, cell))
            .transpose()
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let cell = CODEC.encode(key, &value)?;
        let mut state = self.state().await?;
        state.slice.insert(key.to_string(), cell);
        state.slice.save(&self.path, false).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state().await?;
        if state.slice.remove(key).is_none() {
            return Ok(false);
        }
        state.slice.save(&self.path, false).await?;
        Ok(true)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.state().await?.slice.contains(key))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state().await?.slice.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state().await?;
        if state.slice.is_dirty() {
            state.slice.save(&self.path, false).await?;
        }
        Ok(())
    }
}
