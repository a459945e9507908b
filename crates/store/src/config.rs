use crate::error::{Result, StoreError};
use crate::hashing::validate_prefix_len;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "rpdb.toml";

pub const ENV_PREFIX_LEN: &str = "RPDB_PREFIX_LEN";
pub const ENV_VITALITY: &str = "RPDB_VITALITY";
pub const ENV_RECYCLE_INTERVAL_MS: &str = "RPDB_RECYCLE_INTERVAL_MS";
pub const ENV_MAX_LOADED_SLICES: &str = "RPDB_MAX_LOADED_SLICES";

/// Configuration for a sharded store directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store directory (holds `meta.json`, `slices/`, the lock file)
    pub root: PathBuf,

    /// Hex characters of the key digest used to pick a slice
    pub prefix_len: usize,

    /// Vitality a slice gets back on every access
    pub vitality: u32,

    /// Period of the background recycler
    pub recycle_interval: Duration,

    /// Upper bound on slices held in memory at once
    pub max_loaded_slices: usize,

    /// Pretty-print slice files
    pub pretty: bool,
}

/// On-disk `rpdb.toml`. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    prefix_len: Option<usize>,
    vitality: Option<u32>,
    recycle_interval_ms: Option<u64>,
    max_loaded_slices: Option<usize>,
    pretty: Option<bool>,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix_len: 2,
            vitality: 5,
            recycle_interval: Duration::from_secs(3),
            max_loaded_slices: 256,
            pretty: false,
        }
    }

    /// Defaults, then `<root>/rpdb.toml`, then `RPDB_*` environment overrides.
    pub fn from_root(root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(root);
        let file_path = config.root.join(CONFIG_FILE_NAME);
        if file_path.is_file() {
            let raw = std::fs::read_to_string(&file_path)?;
            config.apply_file(&raw)?;
            log::debug!("Loaded store config from {}", file_path.display());
        }
        config.apply_env_from(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, raw: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(raw)?;
        if let Some(v) = file.prefix_len {
            self.prefix_len = v;
        }
        if let Some(v) = file.vitality {
            self.vitality = v;
        }
        if let Some(v) = file.recycle_interval_ms {
            self.recycle_interval = Duration::from_millis(v);
        }
        if let Some(v) = file.max_loaded_slices {
            self.max_loaded_slices = v;
        }
        if let Some(v) = file.pretty {
            self.pretty = v;
        }
        Ok(())
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = parse_env(&lookup, ENV_PREFIX_LEN)? {
            self.prefix_len = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_VITALITY)? {
            self.vitality = v;
        }
        if let Some(v) = parse_env::<u64>(&lookup, ENV_RECYCLE_INTERVAL_MS)? {
            self.recycle_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_env(&lookup, ENV_MAX_LOADED_SLICES)? {
            self.max_loaded_slices = v;
        }
        Ok(())
    }

    pub fn with_prefix_len(mut self, prefix_len: usize) -> Self {
        self.prefix_len = prefix_len;
        self
    }

    pub fn with_vitality(mut self, vitality: u32) -> Self {
        self.vitality = vitality;
        self
    }

    pub fn with_recycle_interval(mut self, interval: Duration) -> Self {
        self.recycle_interval = interval;
        self
    }

    pub fn with_max_loaded_slices(mut self, max: usize) -> Self {
        self.max_loaded_slices = max;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_prefix_len(self.prefix_len)?;
        if self.vitality == 0 {
            return Err(StoreError::InvalidConfig(
                "vitality must be > 0".to_string(),
            ));
        }
        if self.recycle_interval.is_zero() {
            return Err(StoreError::InvalidConfig(
                "recycle_interval must be > 0".to_string(),
            ));
        }
        if self.max_loaded_slices == 0 {
            return Err(StoreError::InvalidConfig(
                "max_loaded_slices must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| StoreError::InvalidConfig(format!("{name}={trimmed:?} is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = StoreConfig::new("/tmp/x");
        assert!(config.validate().is_ok());
        assert_eq!(config.recycle_interval, Duration::from_secs(3));
    }

    #[test]
    fn validation_rejects_zeroes() {
        let base = StoreConfig::new("/tmp/x");
        assert!(base.clone().with_vitality(0).validate().is_err());
        assert!(base.clone().with_prefix_len(0).validate().is_err());
        assert!(base.clone().with_max_loaded_slices(0).validate().is_err());
        assert!(base
            .with_recycle_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn file_then_env_layering() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "prefix_len = 3\nvitality = 9\nrecycle_interval_ms = 250\n",
        )
        .unwrap();

        let mut config = StoreConfig::new(tmp.path());
        config
            .apply_file(&std::fs::read_to_string(tmp.path().join(CONFIG_FILE_NAME)).unwrap())
            .unwrap();
        assert_eq!(config.prefix_len, 3);
        assert_eq!(config.vitality, 9);
        assert_eq!(config.recycle_interval, Duration::from_millis(250));

        let env: HashMap<&str, &str> = [(ENV_VITALITY, "2"), (ENV_MAX_LOADED_SLICES, " 8 ")]
            .into_iter()
            .collect();
        config
            .apply_env_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.vitality, 2);
        assert_eq!(config.max_loaded_slices, 8);
        assert_eq!(config.prefix_len, 3);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut config = StoreConfig::new("/tmp/x");
        let err = config.apply_file("prefix_length = 3").unwrap_err();
        assert!(matches!(err, StoreError::ConfigParseError(_)));
    }

    #[test]
    fn bad_env_number_is_an_error() {
        let mut config = StoreConfig::new("/tmp/x");
        let err = config
            .apply_env_from(|name| (name == ENV_PREFIX_LEN).then(|| "two".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_PREFIX_LEN));
    }
}
