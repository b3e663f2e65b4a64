//! Workspace configuration.
//!
//! Configuration layers, later sources overriding earlier ones:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (explicit path, or `atrium/config.toml` under
//!    the platform config directory),
//! 3. `ATRIUM_*` environment variables (`__` separates nesting, e.g.
//!    `ATRIUM_BACKEND__BASE_URL`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::sandbox::SandboxConfig;

/// Top-level configuration for one workspace session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Persistence backend endpoint.
    pub backend: BackendConfig,
    /// Sandbox lifecycle commands and timeouts.
    pub sandbox: SandboxConfig,
}

impl WorkspaceConfig {
    /// Load configuration from defaults, an optional file, and environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path.to_path_buf()));
            }
            None => {
                if let Some(default) = Self::default_path()
                    && default.exists()
                {
                    builder = builder.add_source(File::from(default));
                }
            }
        }

        let cfg = builder
            .add_source(Environment::with_prefix("ATRIUM").separator("__"))
            .build()
            .context("building configuration")?;

        cfg.try_deserialize().context("deserializing configuration")
    }

    /// Default config file location under the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("atrium").join("config.toml"))
    }
}
