//! Deployment configuration
//!
//! Attempt counts and the inter-attempt wait are configuration, not
//! invariants: the remote error vocabulary drifts across platform-tools
//! releases, and tests override the wait to zero.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use ddemon_core::prelude::*;

use crate::retry::RetryPolicy;

/// Settings file location under the user config directory
const CONFIG_DIR: &str = "droid-demon";
const CONFIG_FILE: &str = "config.toml";

fn default_install_attempts() -> u32 {
    5
}

fn default_launch_attempts() -> u32 {
    5
}

fn default_retry_wait_secs() -> u64 {
    5
}

fn default_remote_tmp_dir() -> String {
    "/data/local/tmp".to_string()
}

/// Deploy sequence tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Total `pm install` tries, the first included
    pub max_install_attempts: u32,
    /// Total `am start` tries, the first included
    pub max_launch_attempts: u32,
    /// Whole seconds between attempts (fixed delay, no backoff)
    pub retry_wait_secs: u64,
    /// Directory on the device the artifact is uploaded to
    pub remote_tmp_dir: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_install_attempts: default_install_attempts(),
            max_launch_attempts: default_launch_attempts(),
            retry_wait_secs: default_retry_wait_secs(),
            remote_tmp_dir: default_remote_tmp_dir(),
        }
    }
}

impl DeployConfig {
    /// Load from the user settings file, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit settings file
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// `~/.config/droid-demon/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    pub fn install_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_install_attempts, self.retry_wait())
    }

    pub fn launch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_launch_attempts, self.retry_wait())
    }

    /// Remote upload path for a package: `<remote_tmp_dir>/<package>`
    pub fn remote_path(&self, package: &str) -> String {
        format!("{}/{}", self.remote_tmp_dir.trim_end_matches('/'), package)
    }
}
