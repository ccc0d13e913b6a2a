use std::path::{Path, PathBuf};

use campuschat_core::config::ClientConfig;

use crate::fsutil::{read_json, write_json_atomic};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<ClientConfig> {
        read_json(&self.path)?
            .ok_or_else(|| anyhow::anyhow!("config not found: {}", self.path.display()))
    }

    /// First run has no file yet; that is not an error.
    pub fn load_or_default(&self) -> anyhow::Result<ClientConfig> {
        match read_json(&self.path)? {
            Some(cfg) => Ok(cfg),
            None => {
                log::info!("no config at {}, using defaults", self.path.display());
                Ok(ClientConfig::default())
            }
        }
    }

    pub fn save(&self, cfg: &ClientConfig) -> anyhow::Result<()> {
        write_json_atomic(&self.path, cfg)
    }
}
