use crate::codec::ValueCodec;
use crate::error::{Result, StoreError};
use crate::persist::{read_optional, write_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const META_FILE_NAME: &str = "meta.json";
pub const STORE_META_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Slices cached in memory and flushed by the recycler
    Cached,
    /// Slices read and written on every operation
    Direct,
}

impl Layout {
    pub const fn codec(self) -> ValueCodec {
        match self {
            Self::Cached => ValueCodec::Base64Json,
            Self::Direct => ValueCodec::PlainJson,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub layout: Layout,
    pub prefix_len: usize,
    pub codec: ValueCodec,
}

pub fn meta_path(root: &Path) -> PathBuf {
    root.join(META_FILE_NAME)
}

pub async fn read_meta(root: &Path) -> Result<Option<StoreMeta>> {
    let path = meta_path(root);
    let Some(bytes) = read_optional(&path).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Make `root/meta.json` agree with the requested layout. Returns the
/// effective prefix length: a persisted store keeps the one it was created with.
pub async fn reconcile_meta(root: &Path, layout: Layout, prefix_len: usize) -> Result<StoreMeta> {
    if let Some(existing) = read_meta(root).await? {
        if existing.schema_version != STORE_META_SCHEMA_VERSION {
            return Err(StoreError::LayoutMismatch {
                path: meta_path(root),
                reason: format!(
                    "unsupported schema_version {} (expected {STORE_META_SCHEMA_VERSION})",
                    existing.schema_version
                ),
            });
        }
        if existing.layout != layout {
            return Err(StoreError::LayoutMismatch {
                path: meta_path(root),
                reason: format!(
                    "store was created as {}, opened as {}",
                    existing.layout.as_str(),
                    layout.as_str()
                ),
            });
        }
        if existing.prefix_len != prefix_len {
            log::warn!(
                "Store {} uses prefix_len {} (configured {}); keeping the persisted value",
                root.display(),
                existing.prefix_len,
                prefix_len
            );
        }
        return Ok(existing);
    }

    let meta = StoreMeta {
        schema_version: STORE_META_SCHEMA_VERSION,
        layout,
        prefix_len,
        codec: layout.codec(),
    };
    write_atomic(&meta_path(root), &serde_json::to_vec_pretty(&meta)?).await?;
    Ok(meta)
}
