use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Operations shared by every store in the family.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<Value>>;

    async fn set_value(&self, key: &str, value: Value) -> Result<()>;

    /// Remove `key`; returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get_value(key).await?.is_some())
    }

    /// All keys, sorted.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Persist pending writes.
    async fn flush(&self) -> Result<()>;
}

/// Typed access on top of [`KvStore`].
#[async_trait]
pub trait KvStoreExt: KvStore {
    async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_value(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    async fn set<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value).await
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}
