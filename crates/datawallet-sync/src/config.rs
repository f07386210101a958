//! Engine configuration.
//!
//! ```toml
//! identity_address = "did:e:example.com:dids:abc123"
//! datawallet_enabled = true
//! page_size = 200
//! database_path = "/var/lib/app/datawallet.db"
//! ```

use std::path::{Path, PathBuf};

use datawallet_types::IdentityAddress;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{DEFAULT_EVENT_CAPACITY, DEFAULT_PAGE_SIZE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::SyncError {
    fn from(e: ConfigError) -> Self {
        crate::SyncError::Config(e.to_string())
    }
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    pub identity_address: IdentityAddress,
    /// Whether this identity keeps a datawallet at all. When off, only
    /// external events are synchronized and nothing is ever enqueued.
    #[serde(default = "default_true")]
    pub datawallet_enabled: bool,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl SyncConfig {
    /// Defaults for `identity`.
    pub fn new(identity: impl Into<IdentityAddress>) -> Self {
        Self {
            identity_address: identity.into(),
            datawallet_enabled: true,
            page_size: DEFAULT_PAGE_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            database_path: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_address.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("identity_address is empty".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn with_datawallet(mut self, enabled: bool) -> Self {
        self.datawallet_enabled = enabled;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = SyncConfig::from_toml_str(r#"identity_address = "did:e:a""#).unwrap();
        assert_eq!(config.identity_address.as_str(), "did:e:a");
        assert!(config.datawallet_enabled);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_validation() {
        let err = SyncConfig::from_toml_str(
            r#"
            identity_address = "did:e:a"
            page_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SyncConfig::from_toml_str(r#"identity_address = "  ""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SyncConfig::from_toml_str("page_size = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            identity_address = "did:e:b"
            datawallet_enabled = false
            page_size = 25
            database_path = "/tmp/dw.db"
            "#
        )
        .unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert!(!config.datawallet_enabled);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/dw.db")));

        assert!(matches!(
            SyncConfig::load("/nonexistent/datawallet.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
