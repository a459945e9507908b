use crate::error::{Result, StoreError};
use crate::hashing::SliceId;
use crate::persist::{read_optional, remove_if_exists, write_atomic};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SLICES_DIR_NAME: &str = "slices";

pub fn slices_dir(root: &Path) -> PathBuf {
    root.join(SLICES_DIR_NAME)
}

pub fn slice_path(root: &Path, id: &SliceId) -> PathBuf {
    slices_dir(root).join(id.file_name())
}

/// One shard of the store: encoded cells keyed by record key.
#[derive(Debug, Clone, Default)]
pub struct Slice {
    cells: BTreeMap<String, Value>,
    dirty: bool,
}

impl Slice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells(cells: BTreeMap<String, Value>) -> Self {
        Self {
            cells,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cells.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cells.contains_key(key)
    }

    pub fn insert(&mut self, key: String, cell: Value) {
        self.cells.insert(key, cell);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.cells.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.cells.keys()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load a slice file. A missing file is an empty slice.
    pub async fn load(path: &Path) -> Result<Self> {
        let Some(bytes) = read_optional(path).await? else {
            return Ok(Self::new());
        };
        let value: Value = serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::CorruptSlice {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        let Value::Object(map) = value else {
            return Err(StoreError::CorruptSlice {
                path: path.to_path_buf(),
                reason: "expected a JSON object".to_string(),
            });
        };
        Ok(Self::from_cells(map.into_iter().collect()))
    }

    /// Persist the slice and clear the dirty flag. Empty slices delete their file.
    pub async fn save(&mut self, path: &Path, pretty: bool) -> Result<()> {
        if self.cells.is_empty() {
            remove_if_exists(path).await?;
        } else {
            let bytes = if pretty {
                serde_json::to_vec_pretty(&self.cells)?
            } else {
                serde_json::to_vec(&self.cells)?
            };
            write_atomic(path, &bytes).await?;
        }
        self.dirty = false;
        Ok(())
    }
}

/// List slice ids present on disk under `root`.
pub async fn list_slice_files(root: &Path, prefix_len: usize) -> Result<Vec<SliceId>> {
    let dir = slices_dir(root);
    let mut read_dir = match tokio::fs::read_dir(&dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut ids = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(id) = SliceId::parse(stem, prefix_len) {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::slice_id_for_key;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_is_empty_slice() {
        let tmp = TempDir::new().unwrap();
        let slice = Slice::load(&tmp.path().join("nope.json")).await.unwrap();
        assert!(slice.is_empty());
        assert!(!slice.is_dirty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let id = slice_id_for_key("alpha", 2);
        let path = slice_path(tmp.path(), &id);

        let mut slice = Slice::new();
        slice.insert("alpha".to_string(), json!("YQ=="));
        assert!(slice.is_dirty());
        slice.save(&path, false).await.unwrap();
        assert!(!slice.is_dirty());

        let loaded = Slice::load(&path).await.unwrap();
        assert_eq!(loaded.get("alpha"), Some(&json!("YQ==")));
        assert_eq!(
            list_slice_files(tmp.path(), 2).await.unwrap(),
            vec![id.clone()]
        );

        slice.remove("alpha");
        slice.save(&path, false).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn non_object_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ab.json");
        tokio::fs::write(&path, b"[1,2]").await.unwrap();
        let err = Slice::load(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptSlice { .. }));

        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(Slice::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn listing_skips_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let dir = slices_dir(tmp.path());
        tokio::fs::create_dir_all(&dir).await.unwrap();
        for name in ["0a.json", "ff.json", "zz.json", "0b.json.tmp", "abc.json"] {
            tokio::fs::write(dir.join(name), b"{}").await.unwrap();
        }
        let ids: Vec<String> = list_slice_files(tmp.path(), 2)
            .await
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["0a", "ff"]);
    }
}
