//! Persistent configuration for adbpipe.
//!
//! Stores user settings in `~/.adbpipe/config.json`. The main use is to
//! record where the adb executable lives when it is not on `PATH`.
//!
//! # Example
//!
//! ```no_run
//! use adbpipe_core::config::AdbConfig;
//!
//! let config = AdbConfig::load()?;
//! let runner = config.runner();
//! println!("using {}", runner.adb_path().display());
//! # Ok::<(), adbpipe_core::config::ConfigError>(())
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandRunner;
use crate::invocation::{InvocationOptions, DEFAULT_TIMEOUT_SECS};

const CONFIG_DIRNAME: &str = ".adbpipe";
const CONFIG_FILENAME: &str = "config.json";

/// Errors from reading or writing the config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Returns `~/.adbpipe`.
pub fn adbpipe_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIRNAME))
        .ok_or(ConfigError::NoHomeDir)
}

/// Persistent adbpipe configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdbConfig {
    /// Explicit path to the adb executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adb_path: Option<PathBuf>,

    /// Device serial to target when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// Default per-invocation timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl AdbConfig {
    /// Load config from `~/.adbpipe/config.json`.
    ///
    /// A missing file yields [`Default`]; a malformed one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&adbpipe_dir()?.join(CONFIG_FILENAME))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to `~/.adbpipe/config.json`, creating the directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&adbpipe_dir()?.join(CONFIG_FILENAME))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Resolves the adb executable using the process environment.
    pub fn resolve_adb_path(&self) -> PathBuf {
        let android_home = std::env::var_os("ANDROID_HOME").map(PathBuf::from);
        self.resolve_adb_path_with(android_home.as_deref())
    }

    /// Resolves the adb executable: the configured path, else
    /// `<android_home>/platform-tools/adb` if that file exists, else `adb`
    /// looked up on `PATH`.
    pub fn resolve_adb_path_with(&self, android_home: Option<&Path>) -> PathBuf {
        if let Some(path) = &self.adb_path {
            return path.clone();
        }
        if let Some(home) = android_home {
            let candidate = home.join("platform-tools").join("adb");
            if candidate.is_file() {
                return candidate;
            }
        }
        PathBuf::from("adb")
    }

    /// Invocation options seeded with the configured timeout.
    pub fn default_options(&self) -> InvocationOptions {
        InvocationOptions::default().with_timeout_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// A [`CommandRunner`] for the resolved adb executable.
    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(self.resolve_adb_path())
    }
}
