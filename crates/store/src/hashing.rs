use crate::error::{Result, StoreError};
use sha1::{Digest, Sha1};
use std::fmt;

/// Hex characters in a full SHA-1 digest.
pub const MAX_PREFIX_LEN: usize = 40;

/// Identifier of a slice: a lowercase hex prefix of the key's SHA-1 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceId(String);

impl SliceId {
    /// Parse a slice id from a file stem. Rejects anything that is not
    /// lowercase hex of the expected length.
    pub fn parse(raw: &str, prefix_len: usize) -> Option<Self> {
        if raw.len() != prefix_len {
            return None;
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate_prefix_len(prefix_len: usize) -> Result<()> {
    if prefix_len == 0 || prefix_len > MAX_PREFIX_LEN {
        return Err(StoreError::InvalidConfig(format!(
            "prefix_len must be in 1..={MAX_PREFIX_LEN}, got {prefix_len}"
        )));
    }
    Ok(())
}

pub fn key_digest_hex(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(MAX_PREFIX_LEN);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Map a key to its slice. `prefix_len` must already be validated.
pub fn slice_id_for_key(key: &str, prefix_len: usize) -> SliceId {
    let mut hex = key_digest_hex(key);
    hex.truncate(prefix_len.clamp(1, MAX_PREFIX_LEN));
    SliceId(hex)
}
