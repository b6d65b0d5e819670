//! uniinst-uninstall - Manifest-driven uninstaller
//!
//! Installed as `<install root>/uninstall`. A first launch asks for
//! confirmation, copies itself to a temporary location and relaunches the
//! copy in cleanup mode; only the copy deletes anything, so the install root
//! can be removed along with the original executable.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use uniinst::error::UninstallError;
use uniinst::manifest::InstallationManifest;
use uniinst::process::ProcessRunner;
use uniinst::registry::{FileRegistry, MemoryRegistry, RegistryStore};
use uniinst::uninstaller::{self, Uninstaller, CLEANUP_FLAG};

/// Time given to the launching process to exit
const PARENT_EXIT_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "uniinst-uninstall")]
#[command(about = "Remove an application installed by a uniinst setup package")]
#[command(version)]
struct Args {
    /// Run the removal of INSTALL_ROOT (used by the relocated copy)
    #[arg(long, value_name = "INSTALL_ROOT")]
    cleanup: Option<PathBuf>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    yes: bool,
}

struct Console;

impl Console {
    fn log(&self, msg: impl std::fmt::Display) {
        println!("{}", msg);
    }

    fn success(&self, msg: impl std::fmt::Display) {
        println!("✅ {}", msg);
    }

    fn warn(&self, msg: impl std::fmt::Display) {
        eprintln!("⚠️  {}", msg);
    }

    fn error(&self, msg: impl std::fmt::Display) {
        eprintln!("❌ {}", msg);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let console = Console;

    let filter = EnvFilter::try_from_env("UNIINST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();

    let rt = tokio::runtime::Runtime::new()?;

    if let Some(root) = args.cleanup {
        std::thread::sleep(PARENT_EXIT_DELAY);
        return rt.block_on(cmd_cleanup(&root, args.yes, &console));
    }

    let exe_path = std::env::current_exe().context("Failed to locate the uninstaller executable")?;
    let root = exe_path
        .parent()
        .map(Path::to_path_buf)
        .context("Uninstaller has no parent directory")?;

    console.log("Universal Installer - Uninstaller");
    console.log("=================================\n");

    let Some(manifest) = rt.block_on(load_manifest(&root, &console)) else {
        return Ok(());
    };
    describe(&manifest, &console);

    if !args.yes && !confirm(&manifest)? {
        console.log("\nUninstallation cancelled.");
        return Ok(());
    }

    match relaunch_from_temp(&exe_path, &root) {
        Ok(copy) => {
            tracing::info!("Continuing from {:?}", copy);
            Ok(())
        }
        Err(e) => {
            console.warn(format!("Could not start cleanup process: {:#}", e));
            console.warn("Uninstalling in place; the install directory may not be fully removed");
            rt.block_on(uninstall(&manifest, &console));
            Ok(())
        }
    }
}

/// Cleanup mode: running from the temporary copy
async fn cmd_cleanup(root: &Path, yes: bool, console: &Console) -> Result<()> {
    let result = match load_manifest(root, console).await {
        Some(manifest) => {
            if !yes {
                describe(&manifest, console);
            }
            if yes || confirm(&manifest)? {
                uninstall(&manifest, console).await;
            } else {
                console.log("\nUninstallation cancelled.");
            }
            Ok(())
        }
        None => Ok(()),
    };

    if let Ok(exe) = std::env::current_exe() {
        if let Err(e) = uninstaller::schedule_self_delete(&exe) {
            tracing::warn!("Could not schedule removal of {:?}: {}", exe, e);
        }
    }

    result
}

/// Copy this executable out of the install root and start the copy in
/// cleanup mode. Confirmation has already been given.
fn relaunch_from_temp(exe_path: &Path, root: &Path) -> Result<PathBuf> {
    let copy = uninstaller::relocate_for_cleanup(exe_path).context("Failed to copy uninstaller")?;

    Command::new(&copy)
        .arg(CLEANUP_FLAG)
        .arg(root)
        .arg("--yes")
        .spawn()
        .with_context(|| format!("Failed to start {:?}", copy))?;

    Ok(copy)
}

/// Load the manifest, reporting why it is unusable. Nothing is deleted
/// when this returns `None`.
async fn load_manifest(root: &Path, console: &Console) -> Option<InstallationManifest> {
    match InstallationManifest::load(root).await {
        Ok(manifest) => Some(manifest),
        Err(UninstallError::ManifestMissing(path)) => {
            console.error("Installation manifest not found.");
            console.log(format!("   Expected location: {}", path.display()));
            None
        }
        Err(e) => {
            console.error(format!("Could not load installation manifest: {}", e));
            None
        }
    }
}

fn describe(manifest: &InstallationManifest, console: &Console) {
    console.log(format!("Application: {}", manifest.app_name));
    console.log(format!("Installation Path: {}", manifest.install_path.display()));
    console.log(format!("Files to remove: {}", manifest.installed_files.len()));
    console.log(format!("Directories to remove: {}\n", manifest.created_directories.len()));
}

fn confirm(manifest: &InstallationManifest) -> Result<bool> {
    print!("⚠️  Are you sure you want to uninstall {}? [y/N] ", manifest.app_name);
    std::io::Write::flush(&mut std::io::stdout())?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

async fn uninstall(manifest: &InstallationManifest, console: &Console) {
    let registry: Arc<dyn RegistryStore> = match FileRegistry::user_default() {
        Some(store) => Arc::new(store),
        None => Arc::new(MemoryRegistry::new()),
    };

    console.log("\nUninstalling...\n");
    let report = Uninstaller::new(registry, Arc::new(ProcessRunner))
        .uninstall(manifest)
        .await;

    console.log(format!(
        "Removed {} files and {} directories",
        report.files_removed,
        report.directories_removed.len()
    ));
    for dir in &report.directories_kept {
        console.warn(format!("Kept (not empty): {}", dir.display()));
    }
    if !report.root_removed && manifest.install_path.exists() {
        console.warn(format!("Kept installation directory: {}", manifest.install_path.display()));
    }

    console.success(format!("{} has been uninstalled.", manifest.app_name));
}
