use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoContext, Result};

/// Looked up in the current directory when `--config` is not given.
pub const CONFIG_FILE: &str = "avbchain.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// avbroot executable
    pub avbroot: PathBuf,
    /// Root of the AVB chain, verified after packing
    pub root: String,
    /// Partitions whose name starts with this are vbmeta images
    pub vbmeta_prefix: String,
    /// Name of the dynamic partition container
    pub super_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            avbroot: PathBuf::from("avbroot"),
            root: "vbmeta".to_string(),
            vbmeta_prefix: "vbmeta".to_string(),
            super_name: "super".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        toml::from_str(&content).map_err(|e| Error::TomlDe(path.to_path_buf(), e))
    }

    /// Loads `path` if given, otherwise [`CONFIG_FILE`] from the current
    /// directory if it exists, otherwise the defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(CONFIG_FILE);
        if default_path.exists() {
            return Self::load(default_path);
        }

        Ok(Self::default())
    }

    /// File name of the root image, e.g. `vbmeta.img`.
    pub fn root_image(&self) -> String {
        format!("{}.img", self.root)
    }
}
