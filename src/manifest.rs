//! Installation Manifest
//!
//! The record of everything an install put on disk. It is the only input the
//! uninstaller trusts: nothing outside it is ever deleted.

use crate::error::UninstallError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Manifest file name inside the install root
pub const MANIFEST_FILE: &str = "install.manifest";

/// Files and directories created by one install, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationManifest {
    pub installed_files: Vec<PathBuf>,
    pub created_directories: Vec<PathBuf>,
    pub app_name: String,
    pub install_path: PathBuf,
}

impl InstallationManifest {
    pub fn manifest_path(install_root: &Path) -> PathBuf {
        install_root.join(MANIFEST_FILE)
    }

    /// Write the manifest into its install root
    pub async fn save(&self) -> std::io::Result<PathBuf> {
        let path = Self::manifest_path(&self.install_path);
        let json = serde_json::to_string_pretty(self)?;

        fs::write(&path, json).await?;

        tracing::info!("Saved manifest to {:?}", path);
        Ok(path)
    }

    /// Load the manifest of an install root
    pub async fn load(install_root: &Path) -> Result<Self, UninstallError> {
        let path = Self::manifest_path(install_root);

        if !path.is_file() {
            return Err(UninstallError::ManifestMissing(path));
        }

        let json = fs::read_to_string(&path).await?;
        serde_json::from_str(&json).map_err(|source| UninstallError::ManifestCorrupt { path, source })
    }
}
