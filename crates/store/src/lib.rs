//! # RPDB Store
//!
//! Sharded, file-backed key-value storage.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!     ├── meta.json          layout, prefix length, value codec
//!     ├── store.lock         exclusive advisory lock
//!     ├── rpdb.toml          optional config overrides
//!     └── slices/
//!            ├── 00.json     { key: cell, ... }
//!            ├── 01.json
//!            └── ...
//! ```
//!
//! A key belongs to the slice named by the first `prefix_len` hex characters
//! of its SHA-1 digest.
//!
//! ## Stores
//!
//! - [`Store`]: slices are cached in memory. A background recycler flushes
//!   dirty slices and evicts those whose vitality ran out.
//! - [`DirectStore`]: no cache, every call reads and writes the slice file.
//! - [`LegacyStore`]: one JSON file holding every key.
//!
//! All three implement [`KvStore`]; [`migrate`] moves data between them.
//!
//! ## Example
//!
//! ```no_run
//! use rpdb_store::{KvStoreExt, Store, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Store::open(StoreConfig::from_root("data")?).await?;
//!
//!     store.set("user:1", &serde_json::json!({"name": "ada"})).await?;
//!     store.update::<u64, _>("visits", |n| Some(n.unwrap_or(0) + 1)).await?;
//!
//!     let visits: Option<u64> = store.get("visits").await?;
//!     println!("visits = {visits:?}");
//!
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

mod cache;
mod codec;
mod config;
mod direct;
mod error;
mod hashing;
mod kv;
mod legacy;
mod lock;
mod meta;
pub mod migrate;
mod persist;
mod recycler;
mod slice;
mod stats;
mod store;

pub use codec::ValueCodec;
pub use config::{
    StoreConfig, CONFIG_FILE_NAME, ENV_MAX_LOADED_SLICES, ENV_PREFIX_LEN,
    ENV_RECYCLE_INTERVAL_MS, ENV_VITALITY,
};
pub use direct::DirectStore;
pub use error::{Result, StoreError};
pub use hashing::{key_digest_hex, slice_id_for_key, SliceId, MAX_PREFIX_LEN};
pub use kv::{KvStore, KvStoreExt};
pub use legacy::LegacyStore;
pub use lock::LOCK_FILE_NAME;
pub use meta::{read_meta, Layout, StoreMeta, META_FILE_NAME, STORE_META_SCHEMA_VERSION};
pub use migrate::MigrationReport;
pub use recycler::{RecycleReport, RecyclerHealth};
pub use slice::SLICES_DIR_NAME;
pub use stats::StoreStats;
pub use store::{Entry, Store};
