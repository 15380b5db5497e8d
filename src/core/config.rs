use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_FTP_BASE_URL: &str = "ftp://builderust.dev.ath/tachyon/";
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_TARGET_DIR: &str = "o";

/// Distribution archive published for the running platform.
pub fn default_dist_file() -> &'static str {
    if cfg!(target_os = "windows") {
        "tachyon-windows.tar.gz"
    } else if cfg!(target_os = "macos") {
        "tachyon-macos.tar.gz"
    } else {
        "tachyon-linux.tar.gz"
    }
}

/// Optional settings, read from the JSON config file or collected from
/// the command line. Unset fields fall through to the next layer.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub ftp_base_url: Option<String>,
    pub file_name: Option<String>,
    pub ftp_user: Option<String>,
    pub ftp_password: Option<String>,
    pub target_dir: Option<PathBuf>,
}

impl Config {
    /// Reads `path`; a missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdaterError::config_error(format!("cannot read config file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            UpdaterError::config_error(format!("invalid config file {}: {e}", path.display()))
        })
    }

    /// Fields set in `self` win over those in `fallback`.
    pub fn or(self, fallback: Config) -> Config {
        Config {
            ftp_base_url: self.ftp_base_url.or(fallback.ftp_base_url),
            file_name: self.file_name.or(fallback.file_name),
            ftp_user: self.ftp_user.or(fallback.ftp_user),
            ftp_password: self.ftp_password.or(fallback.ftp_password),
            target_dir: self.target_dir.or(fallback.target_dir),
        }
    }

    pub fn ftp_base_url(&self) -> &str {
        self.ftp_base_url.as_deref().unwrap_or(DEFAULT_FTP_BASE_URL)
    }

    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(default_dist_file())
    }

    pub fn target_dir(&self) -> &Path {
        self.target_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_TARGET_DIR))
    }
}
