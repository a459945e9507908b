use crate::cache::SliceCache;
use crate::codec::ValueCodec;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::hashing::{slice_id_for_key, SliceId};
use crate::kv::KvStore;
use crate::lock::{acquire_store_lock, lock_path_for_root, StoreLock};
use crate::meta::{reconcile_meta, Layout, StoreMeta};
use crate::persist::remove_if_exists;
use crate::recycler::{spawn_recycler, RecycleReport, RecyclerCommand, RecyclerHealth};
use crate::slice::{list_slice_files, slice_path, slices_dir, Slice};
use crate::stats::{StoreCounters, StoreStats};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;

pub(crate) struct StoreState {
    cache: SliceCache,
    lock: Option<StoreLock>,
    closed: bool,
}

/// State shared between store handles and the recycler task.
pub(crate) struct StoreCore {
    root: PathBuf,
    prefix_len: usize,
    codec: ValueCodec,
    pretty: bool,
    state: Mutex<StoreState>,
    counters: StoreCounters,
}

impl StoreCore {
    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    fn slice_id(&self, key: &str) -> SliceId {
        slice_id_for_key(key, self.prefix_len)
    }

    fn slice_path(&self, id: &SliceId) -> PathBuf {
        slice_path(&self.root, id)
    }

    async fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state)
    }

    /// Bring a slice into the cache (making room first) and mark it accessed.
    async fn ensure_loaded<'s>(
        &self,
        state: &'s mut StoreState,
        id: &SliceId,
    ) -> Result<&'s mut Slice> {
        if !state.cache.contains(id) {
            if let Some((old_id, mut old)) = state.cache.pop_lru_if_full() {
                if old.is_dirty() {
                    if let Err(err) = old.save(&self.slice_path(&old_id), self.pretty).await {
                        state.cache.restore(old_id, old);
                        return Err(err);
                    }
                    self.counters.flushed(1);
                }
                self.counters.evicted(1);
                log::debug!("Evicted slice {old_id} to make room for {id}");
            }
            let slice = Slice::load(&self.slice_path(id)).await?;
            self.counters.slice_loaded();
            log::debug!("Loaded slice {id} ({} keys)", slice.len());
            state.cache.insert(id.clone(), slice);
        }
        state
            .cache
            .touch(id)
            .ok_or_else(|| StoreError::Other(format!("slice {id} missing from cache after load")))
    }

    /// Write every dirty slice. All slices are attempted; the first failure is returned.
    async fn flush_state(&self, state: &mut StoreState) -> Result<usize> {
        let mut flushed = 0usize;
        let mut first_err = None;
        for id in state.cache.dirty_ids() {
            let path = self.slice_path(&id);
            let Some(slice) = state.cache.peek_mut(&id) else {
                continue;
            };
            match slice.save(&path, self.pretty).await {
                Ok(()) => flushed += 1,
                Err(err) => {
                    log::warn!("Failed to flush slice {id}: {err}");
                    first_err.get_or_insert(err);
                }
            }
        }
        self.counters.flushed(flushed as u64);
        match first_err {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    pub(crate) async fn flush_all(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(0);
        }
        self.flush_state(&mut state).await
    }

    /// One recycler pass: persist dirty slices, age them, drop the expired.
    pub(crate) async fn recycle(&self) -> RecycleReport {
        let mut report = RecycleReport::default();
        let mut state = self.state.lock().await;
        if state.closed {
            return report;
        }

        let mut failed = HashSet::new();
        for id in state.cache.dirty_ids() {
            let path = self.slice_path(&id);
            let Some(slice) = state.cache.peek_mut(&id) else {
                continue;
            };
            match slice.save(&path, self.pretty).await {
                Ok(()) => report.flushed += 1,
                Err(err) => {
                    report.errors.push(format!("flush slice {id}: {err}"));
                    failed.insert(id);
                }
            }
        }

        for (id, mut slice) in state.cache.tick() {
            // Already failed this pass; retry on the next one.
            if failed.contains(&id) {
                state.cache.restore(id, slice);
                continue;
            }
            if slice.is_dirty() {
                if let Err(err) = slice.save(&self.slice_path(&id), self.pretty).await {
                    report.errors.push(format!("evict slice {id}: {err}"));
                    state.cache.restore(id, slice);
                    continue;
                }
                report.flushed += 1;
            }
            report.evicted += 1;
        }

        self.counters.flushed(report.flushed as u64);
        self.counters.evicted(report.evicted as u64);
        report
    }
}

/// Sharded store with an in-memory slice cache and a background recycler.
///
/// Cloning yields another handle to the same store. Dropping the last
/// handle without [`Store::close`] asks the recycler to flush and exit.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    core: Arc<StoreCore>,
    meta: StoreMeta,
    command_tx: mpsc::Sender<RecyclerCommand>,
    health_rx: watch::Receiver<RecyclerHealth>,
    join: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Open (or create) a store directory and start its recycler.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        log::info!("Opening store at {}", config.root.display());
        tokio::fs::create_dir_all(&config.root).await?;

        let lock = acquire_store_lock(lock_path_for_root(&config.root)).await?;
        let meta = reconcile_meta(&config.root, Layout::Cached, config.prefix_len).await?;

        let core = Arc::new(StoreCore {
            root: config.root.clone(),
            prefix_len: meta.prefix_len,
            codec: meta.codec,
            pretty: config.pretty,
            state: Mutex::new(StoreState {
                cache: SliceCache::new(config.max_loaded_slices, config.vitality),
                lock: Some(lock),
                closed: false,
            }),
            counters: StoreCounters::default(),
        });
        let recycler = spawn_recycler(core.clone(), config.recycle_interval);

        Ok(Self {
            inner: Arc::new(StoreInner {
                core,
                meta,
                command_tx: recycler.command_tx,
                health_rx: recycler.health_rx,
                join: std::sync::Mutex::new(Some(recycler.join)),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        self.inner.core.root()
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.inner.meta
    }

    /// Exclusive read-modify-write access to one key.
    ///
    /// The returned [`Entry`] holds the store's state lock: every other
    /// operation (including the recycler) waits until it is committed or dropped.
    pub async fn enter(&self, key: &str) -> Result<Entry<'_>> {
        let core = self.inner.core.as_ref();
        let mut state = core.lock_state().await?;
        let id = core.slice_id(key);
        let slice = core.ensure_loaded(&mut state, &id).await?;
        let original = match slice.get(key) {
            Some(cell) => Some(core.codec.decode(key, cell)?),
            None => None,
        };
        Ok(Entry {
            core,
            state,
            key: key.to_string(),
            id,
            current: original.clone(),
            original,
        })
    }

    /// Apply `f` to the current value of `key` and commit the result.
    /// Returning `None` removes the key.
    pub async fn update<T, F>(&self, key: &str, f: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let mut entry = self.enter(key).await?;
        let current = entry.get::<T>()?;
        match f(current) {
            Some(next) => entry.set(&next)?,
            None => entry.remove(),
        }
        entry.commit().await?;
        Ok(())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Run a recycler pass now instead of waiting for the next tick.
    pub async fn recycle_now(&self) -> Result<RecycleReport> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(RecyclerCommand::RecycleNow { reply })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    pub fn recycler_health(&self) -> RecyclerHealth {
        self.inner.health_rx.borrow().clone()
    }

    pub async fn stats(&self) -> StoreStats {
        let core = &self.inner.core;
        let state = core.state.lock().await;
        StoreStats::collect(
            core.root.clone(),
            self.inner.meta.layout,
            core.prefix_len,
            state.cache.len(),
            state.cache.dirty_count(),
            &core.counters,
            self.recycler_health(),
        )
    }

    /// Flush, then delete leftover temp files and empty slice files.
    /// Returns how many files were removed.
    pub async fn compact(&self) -> Result<usize> {
        let core = &self.inner.core;
        let mut state = core.lock_state().await?;
        core.flush_state(&mut state).await?;

        let dir = slices_dir(&core.root);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".tmp") {
                if remove_if_exists(&path).await? {
                    removed += 1;
                }
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some(id) = SliceId::parse(stem, core.prefix_len) else {
                continue;
            };
            if state.cache.contains(&id) {
                continue;
            }
            if Slice::load(&path).await?.is_empty() && remove_if_exists(&path).await? {
                removed += 1;
            }
        }
        log::info!(
            "Compacted {}: removed {removed} files",
            core.root.display()
        );
        Ok(removed)
    }

    /// Flush every dirty slice, release the lock and stop the recycler.
    ///
    /// If the final flush fails the store stays open with its recycler
    /// running, and `close` may be retried.
    pub async fn close(&self) -> Result<()> {
        let core = &self.inner.core;
        {
            let mut state = core.state.lock().await;
            if !state.closed {
                core.flush_state(&mut state).await?;
                state.cache.drain();
                state.lock = None;
                state.closed = true;
                log::info!("Closed store at {}", core.root.display());
            }
        }

        let join = self
            .inner
            .join
            .lock()
            .map_err(|_| StoreError::Other("recycler handle poisoned".to_string()))?
            .take();
        if let Some(join) = join {
            let _ = self.inner.command_tx.send(RecyclerCommand::Shutdown).await;
            if let Err(err) = join.await {
                log::warn!("Recycler task ended abnormally: {err}");
            }
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(RecyclerCommand::Shutdown);
        }
    }
}

#[async_trait]
impl KvStore for Store {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let core = &self.inner.core;
        let mut state = core.lock_state().await?;
        let id = core.slice_id(key);
        let slice = core.ensure_loaded(&mut state, &id).await?;
        match slice.get(key) {
            Some(cell) => {
                core.counters.hit();
                Ok(Some(core.codec.decode(key, cell)?))
            }
            None => {
                core.counters.miss();
                Ok(None)
            }
        }
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let core = &self.inner.core;
        let cell = core.codec.encode(key, &value)?;
        let mut state = core.lock_state().await?;
        let id = core.slice_id(key);
        let slice = core.ensure_loaded(&mut state, &id).await?;
        slice.insert(key.to_string(), cell);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let core = &self.inner.core;
        let mut state = core.lock_state().await?;
        let id = core.slice_id(key);
        let slice = core.ensure_loaded(&mut state, &id).await?;
        Ok(slice.remove(key).is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let core = &self.inner.core;
        let mut state = core.lock_state().await?;
        let id = core.slice_id(key);
        let found = core.ensure_loaded(&mut state, &id).await?.contains(key);
        if found {
            core.counters.hit();
        } else {
            core.counters.miss();
        }
        Ok(found)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let core = &self.inner.core;
        let state = core.lock_state().await?;
        let mut ids: BTreeSet<SliceId> = list_slice_files(&core.root, core.prefix_len)
            .await?
            .into_iter()
            .collect();
        ids.extend(state.cache.ids());

        let mut keys = BTreeSet::new();
        for id in ids {
            match state.cache.peek(&id) {
                Some(slice) => keys.extend(slice.keys().cloned()),
                None => {
                    let slice = Slice::load(&core.slice_path(&id)).await?;
                    keys.extend(slice.keys().cloned());
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn flush(&self) -> Result<()> {
        let core = &self.inner.core;
        let mut state = core.lock_state().await?;
        core.flush_state(&mut state).await?;
        Ok(())
    }
}

/// Exclusive handle on one key, obtained from [`Store::enter`].
///
/// Changes are staged on the handle and only reach the store on
/// [`Entry::commit`]. Dropping the handle discards them.
pub struct Entry<'a> {
    core: &'a StoreCore,
    state: MutexGuard<'a, StoreState>,
    key: String,
    id: SliceId,
    original: Option<Value>,
    current: Option<Value>,
}

impl Entry<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        self.current.as_mut()
    }

    pub fn get<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.current {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.current = Some(serde_json::to_value(value)?);
        Ok(())
    }

    pub fn set_value(&mut self, value: Value) {
        self.current = Some(value);
    }

    pub fn remove(&mut self) {
        self.current = None;
    }

    pub fn is_modified(&self) -> bool {
        self.current != self.original
    }

    /// Write the staged value into the store. Returns whether anything changed.
    pub async fn commit(self) -> Result<bool> {
        if !self.is_modified() {
            return Ok(false);
        }
        let Entry {
            core,
            mut state,
            key,
            id,
            current,
            ..
        } = self;
        let cell = match &current {
            Some(value) => Some(core.codec.encode(&key, value)?),
            None => None,
        };
        let slice = core.ensure_loaded(&mut state, &id).await?;
        match cell {
            Some(cell) => slice.insert(key, cell),
            None => {
                slice.remove(&key);
            }
        }
        Ok(true)
    }
}
