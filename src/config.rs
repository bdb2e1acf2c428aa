//! rsdump configuration
//!
//! Loaded from TOML. Every field has a default, so an empty or missing file
//! is a valid configuration.
//!
//! ```toml
//! [database]
//! url = "mysql://root@localhost:3306/shop"
//!
//! [dump]
//! mode = "binary"
//! drop_table = true
//!
//! [restore]
//! max_batch_rows = 500
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dump::DumpOptions;
use crate::error::{DumpError, DumpResult};
use crate::restore::RestoreOptions;

const LOCAL_FILE: &str = "rsdump.toml";

/// Main rsdump configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub dump: DumpOptions,
    pub restore: RestoreOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL, overridden by `--url` / `RSDUMP_DATABASE_URL`.
    pub url: Option<String>,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> DumpResult<Self> {
        toml::from_str(content).map_err(|e| DumpError::Config(e.to_string()))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `./rsdump.toml` and then
    /// `<config dir>/rsdump/config.toml` are tried; if neither exists the
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> DumpResult<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }

        match Self::candidates().into_iter().find(|p| p.is_file()) {
            Some(found) => Self::read(&found),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("rsdump").join("config.toml"));
        }
        paths
    }

    fn read(path: &Path) -> DumpResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| DumpError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "config loaded");
        Self::from_toml(&content)
    }
}
