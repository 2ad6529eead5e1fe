//! Filesystem layout under `~/.stayhome/`.
//!
//! Production code uses [`StoragePaths::discover`]; tests point
//! [`StoragePaths::with_root`] at a temp dir.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const ROOT_DIR_NAME: &str = ".stayhome";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn discover() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(ROOT_DIR_NAME)))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn socket_path(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    pub fn state_db(&self) -> PathBuf {
        self.daemon_dir().join("state.db")
    }

    pub fn config_file(&self) -> PathBuf {
        self.daemon_dir().join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs_err::create_dir_all(self.daemon_dir())?;
        fs_err::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
