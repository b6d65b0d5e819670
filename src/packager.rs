//! Packager
//!
//! Builds a distributable setup executable from a manifest: stages the
//! manifest and every referenced file, archives the staging directory and
//! appends the archive plus trailer to a copy of the setup host.

use crate::config::{ConfigModel, FileEntry};
use crate::error::PackageError;
use crate::files::{archive_name, copy_dir_recursive, match_files};
use crate::parser;
use crate::payload::{self, CONFIG_FILE, PAYLOAD_DIR, SIBLING_ARCHIVE};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File name of the setup host next to the compiler
pub const HOST_EXECUTABLE: &str = "uniinst-setup";

/// File name of the uninstaller shipped inside every package
pub const UNINSTALLER_EXECUTABLE: &str = "uniinst-uninstall";

/// Outcome of a successful packaging run
#[derive(Debug, Clone)]
pub struct PackageReport {
    /// The setup executable
    pub output_path: PathBuf,

    /// The sibling `installer.dat`, when the package was embedded
    pub archive_path: Option<PathBuf>,

    /// Files collected from `[Files]` entries
    pub file_count: usize,

    /// Compressed archive size in bytes (0 when not embedded)
    pub archive_len: u64,

    /// SHA-256 of the compressed archive, hex encoded
    pub archive_sha256: Option<String>,
}

/// Find the setup host: an explicit path, or `uniinst-setup` next to the
/// running executable.
pub fn locate_host_executable(explicit: Option<&Path>) -> Result<PathBuf, PackageError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(PackageError::HostExecutableMissing(path.to_path_buf()));
    }

    let current_exe = std::env::current_exe()
        .map_err(|_| PackageError::HostExecutableMissing(PathBuf::from(HOST_EXECUTABLE)))?;
    let candidate = current_exe
        .parent()
        .map(|dir| dir.join(HOST_EXECUTABLE))
        .unwrap_or_else(|| PathBuf::from(HOST_EXECUTABLE));

    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(PackageError::HostExecutableMissing(candidate))
    }
}

/// Packager for one manifest
#[derive(Debug)]
pub struct Packager {
    config: ConfigModel,
    config_text: String,
    base_dir: PathBuf,
    host_executable: PathBuf,
}

impl Packager {
    /// Load and parse the manifest at `manifest_path`
    pub fn from_manifest(manifest_path: &Path, host_executable: PathBuf) -> Result<Self, PackageError> {
        let config = parser::parse_file(manifest_path)?;
        let config_text = std::fs::read_to_string(manifest_path).map_err(|source| {
            crate::error::ConfigError::Read {
                path: manifest_path.to_path_buf(),
                source,
            }
        })?;
        let base_dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(Self::new(config, config_text, base_dir, host_executable))
    }

    pub fn new(
        config: ConfigModel,
        config_text: String,
        base_dir: PathBuf,
        host_executable: PathBuf,
    ) -> Self {
        Self {
            config,
            config_text,
            base_dir,
            host_executable,
        }
    }

    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    /// Build the package into `output_dir`
    pub fn build(&self, output_dir: &Path) -> Result<PackageReport, PackageError> {
        if !self.host_executable.is_file() {
            return Err(PackageError::HostExecutableMissing(self.host_executable.clone()));
        }

        std::fs::create_dir_all(output_dir).map_err(|source| PackageError::Output {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let output_path = output_dir.join(self.config.setup.output_filename());
        std::fs::copy(&self.host_executable, &output_path).map_err(|source| PackageError::Output {
            path: output_path.clone(),
            source,
        })?;
        tracing::info!("Copied setup host to {:?}", output_path);

        // Removed on drop, whichever way this function returns.
        let staging = tempfile::Builder::new()
            .prefix("_temp_package")
            .tempdir_in(output_dir)
            .map_err(PackageError::Staging)?;

        std::fs::write(staging.path().join(CONFIG_FILE), &self.config_text)
            .map_err(PackageError::Staging)?;

        let mut file_count = 0;
        for entry in &self.config.files {
            file_count += self
                .stage_entry(entry, &staging.path().join(PAYLOAD_DIR))
                .map_err(PackageError::Staging)?;
        }

        self.stage_dependencies(staging.path())
            .map_err(PackageError::Staging)?;

        let mut report = PackageReport {
            output_path: output_path.clone(),
            archive_path: None,
            file_count,
            archive_len: 0,
            archive_sha256: None,
        };

        if self.config.setup.compression {
            let archive = build_archive(staging.path(), self.config.setup.compression_level)
                .map_err(PackageError::ArchiveBuild)?;

            let archive_path = output_dir.join(SIBLING_ARCHIVE);
            std::fs::write(&archive_path, &archive).map_err(|source| PackageError::Output {
                path: archive_path.clone(),
                source,
            })?;

            let offset = payload::append_archive(&output_path, &archive).map_err(|source| {
                PackageError::TrailerWrite {
                    path: output_path.clone(),
                    source,
                }
            })?;
            tracing::info!("Embedded {} byte archive at offset {}", archive.len(), offset);

            report.archive_path = Some(archive_path);
            report.archive_len = archive.len() as u64;
            report.archive_sha256 = Some(calculate_sha256(&archive));
        } else {
            copy_dir_recursive(staging.path(), output_dir).map_err(PackageError::Staging)?;
            tracing::info!("Copied package contents next to {:?}", output_path);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(&output_path, perms).map_err(|source| PackageError::Output {
                path: output_path.clone(),
                source,
            })?;
        }

        if let Err(e) = staging.close() {
            tracing::warn!("Could not remove staging directory: {}", e);
        }

        Ok(report)
    }

    /// Copy one `[Files]` entry into the payload folder.
    ///
    /// Returns the number of files staged.
    fn stage_entry(&self, entry: &FileEntry, payload_dir: &Path) -> std::io::Result<usize> {
        let source = self.base_dir.join(entry.source.replace('\\', "/"));
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if entry.recurse && source.is_dir() {
            let copied = copy_dir_recursive(&source, &payload_dir.join(&file_name))?;
            tracing::info!("Staged directory {:?} ({} files)", source, copied);
            return Ok(copied);
        }

        if source.is_file() {
            std::fs::create_dir_all(payload_dir)?;
            std::fs::copy(&source, payload_dir.join(&file_name))?;
            tracing::info!("Staged {:?}", source);
            return Ok(1);
        }

        if entry.is_pattern() {
            let dir = source.parent().unwrap_or(&self.base_dir);
            let matches = match_files(dir, &file_name)?;
            std::fs::create_dir_all(payload_dir)?;
            for matched in &matches {
                if let Some(name) = matched.file_name() {
                    std::fs::copy(matched, payload_dir.join(name))?;
                }
            }
            tracing::info!("Staged {} files matching {:?}", matches.len(), entry.source);
            return Ok(matches.len());
        }

        tracing::warn!("Source not found, skipping: {:?}", source);
        Ok(0)
    }

    /// Copy shared libraries and the uninstaller found next to the host
    fn stage_dependencies(&self, staging: &Path) -> std::io::Result<()> {
        let Some(host_dir) = self.host_executable.parent() else {
            return Ok(());
        };
        let host_dir = if host_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            host_dir
        };

        for entry in WalkDir::new(host_dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_dependency_resource(&name) {
                std::fs::copy(entry.path(), staging.join(entry.file_name()))?;
                tracing::debug!("Staged dependency {}", name);
            }
        }

        Ok(())
    }
}

fn is_dependency_resource(name: &str) -> bool {
    name == UNINSTALLER_EXECUTABLE
        || name.ends_with(".so")
        || name.contains(".so.")
        || name.to_ascii_lowercase().ends_with(".dll")
}

/// Tar the files under `staging` and compress with zstd
pub fn build_archive(staging: &Path, level: i32) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for entry in WalkDir::new(staging).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        builder.append_path_with_name(entry.path(), archive_name(relative))?;
    }

    let tar_data = builder.into_inner()?;
    zstd::encode_all(std::io::Cursor::new(tar_data), level)
}

fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
