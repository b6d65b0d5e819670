//! Uninstaller
//!
//! Reverses an installation using only its [`InstallationManifest`]. Files
//! are removed in reverse install order, then directories, each only if it
//! is empty. Nothing the manifest does not list is ever deleted.

use crate::installer::{UNINSTALLER_NAME, UNINSTALL_KEY};
use crate::manifest::InstallationManifest;
use crate::paths::safety;
use crate::process::CommandRunner;
use crate::registry::{RegistryRoot, RegistryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Registry value naming an application-specific removal script
pub const REMOVE_SCRIPT_VALUE: &str = "RemoveScript";

/// Flag the relaunched copy receives, followed by the install root
pub const CLEANUP_FLAG: &str = "--cleanup";

/// What an uninstall removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub files_removed: usize,
    pub directories_removed: Vec<PathBuf>,
    /// Listed directories left in place because they still had content
    pub directories_kept: Vec<PathBuf>,
    pub root_removed: bool,
}

pub struct Uninstaller {
    registry: Arc<dyn RegistryStore>,
    runner: Arc<dyn CommandRunner>,
}

impl Uninstaller {
    pub fn new(registry: Arc<dyn RegistryStore>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { registry, runner }
    }

    /// Remove everything `manifest` lists. Per-item failures are logged and
    /// skipped.
    pub async fn uninstall(&self, manifest: &InstallationManifest) -> UninstallReport {
        let mut report = UninstallReport::default();
        let root = manifest.install_path.as_path();

        tracing::info!("Uninstalling {} from {:?}", manifest.app_name, root);

        self.run_remove_script(&manifest.app_name).await;

        tracing::info!("Removing files...");
        for file in manifest.installed_files.iter().rev() {
            match fs::remove_file(file).await {
                Ok(()) => {
                    tracing::info!("  Deleted: {:?}", file);
                    report.files_removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("  Failed to delete {:?}: {}", file, e),
            }
        }

        tracing::info!("Removing directories...");
        for dir in manifest.created_directories.iter().rev() {
            // The root still holds the manifest; it is handled last.
            if dir == root || !dir.is_dir() {
                continue;
            }
            if !is_empty_dir(dir).await {
                tracing::info!("  Skipped (not empty): {:?}", dir);
                report.directories_kept.push(dir.clone());
                continue;
            }
            match fs::remove_dir(dir).await {
                Ok(()) => {
                    tracing::info!("  Deleted: {:?}", dir);
                    report.directories_removed.push(dir.clone());
                }
                Err(e) => tracing::warn!("  Failed to delete {:?}: {}", dir, e),
            }
        }

        let key = format!("{}\\{}", UNINSTALL_KEY, manifest.app_name);
        match self.registry.delete_key(RegistryRoot::LocalMachine, &key) {
            Ok(()) => tracing::info!("Removed uninstaller registry entry"),
            Err(e) => tracing::warn!("Failed to remove registry entry: {}", e),
        }

        report.root_removed = self.remove_root(root).await;
        report
    }

    /// Run the `RemoveScript` registered for the app, if it exists
    async fn run_remove_script(&self, app_name: &str) {
        let compact = app_name.replace(' ', "");
        let key = format!("Software\\{}\\{}", compact, compact);

        let script = match self.registry.get_value(RegistryRoot::LocalMachine, &key, REMOVE_SCRIPT_VALUE) {
            Ok(Some(value)) => value.as_str().map(PathBuf::from),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read removal script setting: {}", e);
                None
            }
        };

        let Some(script) = script.filter(|s| s.is_file()) else {
            return;
        };

        tracing::info!("Running removal script: {:?}", script);
        let runner = self.runner.clone();
        let working_dir = script.parent().map(Path::to_path_buf).unwrap_or_default();
        let arguments = format!("\"{}\"", script.display());
        let result =
            tokio::task::spawn_blocking(move || runner.run(Path::new("sh"), &arguments, &working_dir)).await;

        match result {
            Ok(Ok(code)) => tracing::info!("Removal script completed with exit code: {}", code),
            Ok(Err(e)) => tracing::warn!("Failed to run removal script: {}", e),
            Err(e) => tracing::warn!("Failed to run removal script: {}", e),
        }
    }

    /// Drop the uninstaller's own artifacts, then the root if nothing else
    /// is left in it
    async fn remove_root(&self, root: &Path) -> bool {
        for artifact in [InstallationManifest::manifest_path(root), root.join(UNINSTALLER_NAME)] {
            match fs::remove_file(&artifact).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to delete {:?}: {}", artifact, e),
            }
        }

        if !root.is_dir() {
            return false;
        }

        if safety::is_protected(root) {
            tracing::warn!("Refusing to remove protected directory {:?}", root);
            return false;
        }

        if !is_empty_dir(root).await {
            tracing::info!("Keeping {:?}: it contains files this installation did not create", root);
            return false;
        }

        match fs::remove_dir(root).await {
            Ok(()) => {
                tracing::info!("Removed installation directory {:?}", root);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to remove installation directory {:?}: {}", root, e);
                false
            }
        }
    }
}

async fn is_empty_dir(dir: &Path) -> bool {
    match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// Copy the running uninstaller to a unique temporary path so the copy can
/// delete the install root the original lives in.
pub fn relocate_for_cleanup(current_exe: &Path) -> std::io::Result<PathBuf> {
    let temp = tempfile::Builder::new().prefix("uniinst-cleanup-").tempfile()?;
    let (file, path) = temp.keep()?;
    drop(file);

    std::fs::copy(current_exe, &path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        std::fs::set_permissions(&path, perms)?;
    }

    tracing::debug!("Relocated {:?} to {:?}", current_exe, path);
    Ok(path)
}

/// Delete `path` shortly after this process exits, via a detached shell
/// helper that also removes itself.
pub fn schedule_self_delete(path: &Path) -> std::io::Result<()> {
    let script = tempfile::Builder::new()
        .prefix("uniinst-cleanup-")
        .suffix(".sh")
        .tempfile()?;
    let (mut file, script_path) = script.keep()?;

    use std::io::Write;
    writeln!(file, "#!/bin/sh")?;
    writeln!(file, "sleep 2")?;
    writeln!(file, "rm -f {}", shell_quote(path))?;
    writeln!(file, "rm -f \"$0\"")?;
    drop(file);

    std::process::Command::new("sh")
        .arg(&script_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    Ok(())
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "'\\''"))
}
