//! TOML configuration.
//!
//! Every section is optional. A file containing only
//!
//! ```toml
//! [storage]
//! root = "/srv/filer/storage"
//! ```
//!
//! is valid; everything else falls back to the defaults below, which match
//! running `filer` in the current directory with `filedb.db` and `storage/`.

use anyhow::{Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("filedb.db")
}
fn default_busy_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Re-check the digest of bytes as they are copied in.
    #[serde(default = "default_true")]
    pub verify_on_put: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            verify_on_put: true,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_source")]
    pub default_source: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Derive tags from the directory components of the first-seen path.
    #[serde(default = "default_true")]
    pub path_tags: bool,
    /// Files ingested at once during directory ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_source: default_source(),
            recursive: true,
            follow_symlinks: false,
            exclude_globs: Vec::new(),
            path_tags: true,
            concurrency: default_concurrency(),
        }
    }
}

fn default_source() -> String {
    "local".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5005".to_string()
}

impl Config {
    /// Configuration rooted at `dir`: `dir/filedb.db` and `dir/storage`.
    pub fn rooted_at(dir: &Path) -> Self {
        let mut config = Config::default();
        config.db.path = dir.join(default_db_path());
        config.storage.root = dir.join(default_storage_root());
        config
    }

    /// Replace the database path and/or storage root, as given on the
    /// command line.
    pub fn with_overrides(mut self, db: Option<PathBuf>, storage: Option<PathBuf>) -> Self {
        if let Some(db) = db {
            self.db.path = db;
        }
        if let Some(storage) = storage {
            self.storage.root = storage;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.concurrency == 0 {
            anyhow::bail!("ingest.concurrency must be >= 1");
        }
        if self.ingest.default_source.trim().is_empty() {
            anyhow::bail!("ingest.default_source must not be empty");
        }
        for pattern in &self.ingest.exclude_globs {
            Glob::new(pattern)
                .with_context(|| format!("invalid ingest.exclude_globs pattern: '{}'", pattern))?;
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` if it exists, otherwise use defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.db.path, PathBuf::from("filedb.db"));
        assert_eq!(config.storage.root, PathBuf::from("storage"));
        assert!(config.storage.verify_on_put);
        assert_eq!(config.ingest.default_source, "local");
        assert_eq!(config.ingest.concurrency, 4);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
[ingest]
default_source = "Dropbox"
exclude_globs = ["**/*.tmp"]
"#,
        )
        .unwrap();
        assert_eq!(config.ingest.default_source, "Dropbox");
        assert!(config.ingest.path_tags);
        config.validate().unwrap();
    }

    #[test]
    fn overrides_replace_only_what_is_given() {
        let config: Config = toml::from_str("[db]\npath = \"from-file.db\"\n").unwrap();

        let db_only = config.clone().with_overrides(Some("cli.db".into()), None);
        assert_eq!(db_only.db.path, PathBuf::from("cli.db"));
        assert_eq!(db_only.storage.root, PathBuf::from("storage"));

        let both = config.with_overrides(Some("cli.db".into()), Some("/mnt/blobs".into()));
        assert_eq!(both.storage.root, PathBuf::from("/mnt/blobs"));
        assert_eq!(both.db.busy_timeout_ms, DbConfig::default().busy_timeout_ms);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config: Config = toml::from_str("[ingest]\nconcurrency = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_glob_is_rejected() {
        let config: Config = toml::from_str("[ingest]\nexclude_globs = [\"a[\"]\n").unwrap();
        assert!(config.validate().is_err());
    }
}
