//! Error Types
//!
//! One enum per component. Non-fatal conditions (registry, shortcut and
//! post-install command failures, extraction fallbacks) are logged at the
//! call site and never reach these types' callers.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading a manifest from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures that abort packaging.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "setup host executable not found: {}\n\
         Either:\n\
         - Place 'uniinst-setup' in the same directory as 'uniinst-compile'\n\
         - Or pass --host <PATH>",
        .0.display()
    )]
    HostExecutableMissing(PathBuf),

    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage package files: {0}")]
    Staging(#[source] std::io::Error),

    #[error("failed to build archive: {0}")]
    ArchiveBuild(#[source] std::io::Error),

    #[error("failed to write trailer to {}: {source}", path.display())]
    TrailerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while reading an embedded or sibling archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no package trailer in {}", .0.display())]
    NoTrailer(PathBuf),

    #[error("archive at {} is malformed: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures that abort an installation run.
///
/// Any of these returned from the directory, file or uninstaller phase has
/// already triggered a rollback by the time the caller sees it.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("install root is not set")]
    InstallRootUnset,

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write installation manifest: {0}")]
    Manifest(#[source] std::io::Error),
}

/// Failures surfaced by the uninstaller.
#[derive(Debug, Error)]
pub enum UninstallError {
    #[error("Installation manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Installation manifest is corrupt: {}: {source}", path.display())]
    ManifestCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures reported by the registry, shortcut and process collaborators.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("registry store is corrupt: {0}")]
    Store(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
