use crate::error::{Result, StoreError};
use fs2::FileExt;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "store.lock";

/// Exclusive advisory lock on a store. Released on drop.
#[derive(Debug)]
pub(crate) struct StoreLock {
    file: std::fs::File,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            log::warn!("Failed to release lock {}: {err}", self.path.display());
        }
    }
}

pub(crate) fn lock_path_for_root(root: &Path) -> PathBuf {
    root.join(LOCK_FILE_NAME)
}

pub(crate) async fn acquire_store_lock(path: PathBuf) -> Result<StoreLock> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::task::spawn_blocking(move || -> Result<StoreLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::Other(format!("open lock {}: {err}", path.display())))?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(StoreError::Locked(path));
            }
            return Err(StoreError::Other(format!(
                "acquire lock {}: {err}",
                path.display()
            )));
        }
        Ok(StoreLock { file, path })
    })
    .await
    .map_err(|err| StoreError::Other(format!("join lock task: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_lock_is_refused_until_release() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path_for_root(tmp.path());

        let first = acquire_store_lock(path.clone()).await.unwrap();
        assert_eq!(first.path, path);

        let err = acquire_store_lock(path.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));

        drop(first);
        acquire_store_lock(path).await.unwrap();
    }
}
