//! Installation Engine
//!
//! Runs one install of a parsed manifest in six ordered phases:
//! directories, files, registry values, shortcuts, uninstaller registration
//! and `[Run]` commands.
//!
//! Every file and directory the engine creates is tracked the moment it
//! lands on disk. A failure in the directory, file or uninstaller phase rolls
//! back exactly those paths; registry, shortcut and command failures are
//! logged and skipped. Cancellation is checked between items and stops the
//! run without rolling anything back.

use crate::config::{ConfigModel, DirectoryEntry, FileEntry, IconEntry, RegistryEntry, RunEntry};
use crate::error::InstallError;
use crate::files::match_files;
use crate::manifest::InstallationManifest;
use crate::packager::UNINSTALLER_EXECUTABLE;
use crate::paths::ResolverContext;
use crate::payload::PAYLOAD_DIR;
use crate::process::CommandRunner;
use crate::progress::{InstallEvent, InstallProgress};
use crate::registry::{RegistryRoot, RegistryStore, RegistryValue, ValueKind};
use crate::shortcut::{Shortcut, ShortcutCreator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, watch};
use walkdir::WalkDir;

/// File name of the uninstaller inside the install root
pub const UNINSTALLER_NAME: &str = "uninstall";

/// Registry key holding uninstall entries
pub const UNINSTALL_KEY: &str = "Software\\Microsoft\\Windows\\CurrentVersion\\Uninstall";

/// External capabilities the engine drives
#[derive(Clone)]
pub struct InstallServices {
    pub registry: Arc<dyn RegistryStore>,
    pub shortcuts: Arc<dyn ShortcutCreator>,
    pub runner: Arc<dyn CommandRunner>,
}

impl InstallServices {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        shortcuts: Arc<dyn ShortcutCreator>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            registry,
            shortcuts,
            runner,
        }
    }
}

impl std::fmt::Debug for InstallServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallServices").finish_non_exhaustive()
    }
}

/// What an install run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed_files: Vec<PathBuf>,
    pub created_directories: Vec<PathBuf>,
    /// Written only when the uninstaller phase ran
    pub manifest_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Completed(InstallReport),
    /// Stopped at a cancellation request; finished work stays in place
    Cancelled(InstallReport),
}

impl InstallOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, InstallOutcome::Completed(_))
    }

    pub fn report(&self) -> &InstallReport {
        match self {
            InstallOutcome::Completed(report) | InstallOutcome::Cancelled(report) => report,
        }
    }
}

/// Phase loop result: `false` when cancelled
type PhaseResult = Result<bool, InstallError>;

/// One installation attempt. Consumed by [`InstallationEngine::install`].
pub struct InstallationEngine<'a> {
    config: &'a ConfigModel,
    context: &'a ResolverContext,
    source_root: PathBuf,
    services: InstallServices,
    events: Option<mpsc::UnboundedSender<InstallEvent>>,
    cancel: Option<watch::Receiver<bool>>,
    installed_files: Vec<PathBuf>,
    created_directories: Vec<PathBuf>,
    manifest_path: Option<PathBuf>,
    step: usize,
    total: usize,
}

impl<'a> InstallationEngine<'a> {
    /// `source_root` is the directory holding the extracted package
    pub fn new(
        config: &'a ConfigModel,
        context: &'a ResolverContext,
        source_root: impl Into<PathBuf>,
        services: InstallServices,
    ) -> Self {
        Self {
            config,
            context,
            source_root: source_root.into(),
            services,
            events: None,
            cancel: None,
            installed_files: Vec::new(),
            created_directories: Vec::new(),
            manifest_path: None,
            step: 0,
            total: config.total_steps(),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<InstallEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Total number of steps this run reports progress against
    pub fn total_steps(&self) -> usize {
        self.total
    }

    /// Run the installation.
    ///
    /// On error every tracked path has already been rolled back.
    pub async fn install(mut self) -> Result<InstallOutcome, InstallError> {
        let Some(install_root) = self.context.install_root().map(Path::to_path_buf) else {
            return Err(InstallError::InstallRootUnset);
        };

        self.log(format!(
            "Installing {} {} to {:?}",
            self.config.setup.app_name, self.config.setup.app_version, install_root
        ));

        match self.run_phases(&install_root).await {
            Ok(true) => {
                self.progress(self.total, "Installation completed successfully");
                Ok(InstallOutcome::Completed(self.into_report()))
            }
            Ok(false) => {
                self.log("Installation cancelled");
                Ok(InstallOutcome::Cancelled(self.into_report()))
            }
            Err(e) => {
                self.warn(format!("Installation failed: {}", e));
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, install_root: &Path) -> PhaseResult {
        let config = self.config;

        for dir in &config.dirs {
            if self.is_cancelled() {
                return Ok(false);
            }
            self.create_directory(dir).await?;
            self.advance(format!("Creating directory: {}", dir.name));
        }

        for file in &config.files {
            if self.is_cancelled() {
                return Ok(false);
            }
            self.copy_file_entry(file).await?;
            self.advance(format!("Copying: {}", source_file_name(&file.source)));
        }

        for entry in &config.registry {
            if self.is_cancelled() {
                return Ok(false);
            }
            self.create_registry_entry(entry);
            self.advance(format!("Registry: {}", entry.subkey));
        }

        for icon in &config.icons {
            if self.is_cancelled() {
                return Ok(false);
            }
            self.create_shortcut(icon).await;
            self.advance(format!("Creating shortcut: {}", icon.name));
        }

        if config.setup.create_uninstaller {
            if self.is_cancelled() {
                return Ok(false);
            }
            self.create_uninstaller(install_root).await?;
            self.advance("Registering uninstaller");
        }

        for run in &config.run {
            if self.is_cancelled() {
                return Ok(false);
            }
            if run.is_post_install() {
                tracing::debug!("Deferring post-install command {}", run.filename);
            } else {
                self.run_command(run).await;
            }
            self.advance(format!("Running: {}", run.filename));
        }

        Ok(true)
    }

    // === Directory and file phases ===

    async fn create_directory(&mut self, entry: &DirectoryEntry) -> Result<(), InstallError> {
        let path = self.context.resolve_path(&entry.name);
        self.ensure_dir(&path).await
    }

    /// Create `path` and any missing ancestors, tracking each one created
    async fn ensure_dir(&mut self, path: &Path) -> Result<(), InstallError> {
        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || fs::try_exists(dir).await.unwrap_or(false) {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }

        for dir in missing.into_iter().rev() {
            match fs::create_dir(&dir).await {
                Ok(()) => {
                    tracing::debug!("Created directory {:?}", dir);
                    self.created_directories.push(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(source) => return Err(InstallError::CreateDirectory { path: dir, source }),
            }
        }

        Ok(())
    }

    async fn copy_file_entry(&mut self, entry: &FileEntry) -> Result<(), InstallError> {
        let payload_dir = self.source_root.join(PAYLOAD_DIR);
        let name = source_file_name(&entry.source);
        let source = payload_dir.join(&name);
        let dest_dir = self.context.resolve_path(&entry.dest_dir);

        if entry.recurse && source.is_dir() {
            return self.copy_tree(&source, &dest_dir).await;
        }

        if source.is_file() {
            let dest_name = if entry.dest_name.is_empty() {
                name
            } else {
                entry.dest_name.clone()
            };
            self.ensure_dir(&dest_dir).await?;
            return self.copy_one(&source, &dest_dir.join(dest_name)).await;
        }

        if entry.is_pattern() {
            let matches = match_files(&payload_dir, &name).map_err(|source| InstallError::CopyFile {
                from: payload_dir.join(&name),
                to: dest_dir.clone(),
                source,
            })?;
            if matches.is_empty() {
                self.log(format!("No files match {}", entry.source));
                return Ok(());
            }
            self.ensure_dir(&dest_dir).await?;
            for matched in matches {
                let Some(file_name) = matched.file_name() else {
                    continue;
                };
                let dest = dest_dir.join(file_name);
                self.copy_one(&matched, &dest).await?;
            }
            return Ok(());
        }

        // Packaging skips sources it cannot find, and empty directories
        // leave nothing in the archive.
        self.warn(format!("Source not found in package, skipping: {:?}", source));
        Ok(())
    }

    /// Copy the contents of `src` into `dest`
    async fn copy_tree(&mut self, src: &Path, dest: &Path) -> Result<(), InstallError> {
        self.ensure_dir(dest).await?;

        let entries: Vec<_> = WalkDir::new(src)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .collect::<Result<_, _>>()
            .map_err(|e| InstallError::CopyFile {
                from: src.to_path_buf(),
                to: dest.to_path_buf(),
                source: e.into(),
            })?;

        for entry in entries {
            let Ok(relative) = entry.path().strip_prefix(src) else {
                continue;
            };
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                self.ensure_dir(&target).await?;
            } else if entry.file_type().is_file() {
                self.copy_one(entry.path(), &target).await?;
            }
        }

        Ok(())
    }

    async fn copy_one(&mut self, from: &Path, to: &Path) -> Result<(), InstallError> {
        fs::copy(from, to).await.map_err(|source| InstallError::CopyFile {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
        self.installed_files.push(to.to_path_buf());
        self.log(format!("Copied file: {:?} -> {:?}", from, to));
        Ok(())
    }

    // === Non-fatal phases ===

    fn create_registry_entry(&self, entry: &RegistryEntry) {
        let root = RegistryRoot::from_manifest(&entry.root);
        let subkey = self.context.resolve(&entry.subkey);
        let kind = ValueKind::from_manifest(&entry.value_type);
        let data = match kind {
            ValueKind::String | ValueKind::ExpandString | ValueKind::MultiString => {
                self.context.resolve(&entry.value_data)
            }
            _ => entry.value_data.clone(),
        };

        let result = RegistryValue::coerce(kind, &data)
            .and_then(|value| self.services.registry.set_value(root, &subkey, &entry.value_name, value));

        match result {
            Ok(()) => self.log(format!(
                "Created registry entry: {}\\{}\\{}",
                entry.root, subkey, entry.value_name
            )),
            Err(e) => self.warn(format!("Failed to create registry entry: {}", e)),
        }
    }

    async fn create_shortcut(&mut self, icon: &IconEntry) {
        if icon.filename.is_empty() {
            self.warn(format!("Shortcut {} has no target, skipping", icon.name));
            return;
        }

        let mut path = self.context.resolve_path(&icon.name);
        if path.extension().map(|e| e != "desktop").unwrap_or(true) {
            let mut name = path.into_os_string();
            name.push(".desktop");
            path = PathBuf::from(name);
        }

        let target = self.context.resolve_path(&icon.filename);
        let working_dir = if icon.working_dir.is_empty() {
            target.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            self.context.resolve_path(&icon.working_dir)
        };
        let icon_path = (!icon.icon_filename.is_empty()).then(|| self.context.resolve_path(&icon.icon_filename));

        if let Some(parent) = path.parent() {
            if let Err(e) = self.ensure_dir(parent).await {
                self.warn(format!("Failed to create shortcut: {}", e));
                return;
            }
        }

        let shortcut = Shortcut {
            path: path.clone(),
            target,
            working_dir,
            arguments: self.context.resolve(&icon.parameters),
            icon: icon_path,
        };

        match self.services.shortcuts.create_shortcut(&shortcut) {
            Ok(()) => {
                self.installed_files.push(path.clone());
                self.log(format!("Created shortcut: {:?}", path));
            }
            Err(e) => self.warn(format!("Failed to create shortcut: {}", e)),
        }
    }

    async fn run_command(&self, run: &RunEntry) {
        let program = self.context.resolve_path(&run.filename);
        let arguments = self.context.resolve(&run.parameters);
        let working_dir = if run.working_dir.is_empty() {
            program.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            self.context.resolve_path(&run.working_dir)
        };

        match execute(self.services.runner.clone(), program.clone(), arguments, working_dir).await {
            Ok(code) => self.log(format!("Executed: {:?} (Exit code: {})", program, code)),
            Err(e) => self.warn(format!("Failed to execute command: {}", e)),
        }
    }

    // === Uninstaller ===

    async fn create_uninstaller(&mut self, install_root: &Path) -> Result<(), InstallError> {
        self.ensure_dir(install_root).await?;

        let uninstaller_path = install_root.join(UNINSTALLER_NAME);
        let packaged = self.source_root.join(UNINSTALLER_EXECUTABLE);
        if packaged.is_file() {
            self.copy_one(&packaged, &uninstaller_path).await?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o755);
                fs::set_permissions(&uninstaller_path, perms)
                    .await
                    .map_err(|source| InstallError::CopyFile {
                        from: packaged.clone(),
                        to: uninstaller_path.clone(),
                        source,
                    })?;
            }
        } else {
            self.warn(format!("No uninstaller in package at {:?}", packaged));
        }

        let manifest = InstallationManifest {
            installed_files: self.installed_files.clone(),
            created_directories: self.created_directories.clone(),
            app_name: self.config.setup.app_name.clone(),
            install_path: install_root.to_path_buf(),
        };
        let manifest_path = manifest.save().await.map_err(InstallError::Manifest)?;
        self.manifest_path = Some(manifest_path);

        self.register_uninstaller(install_root, &uninstaller_path);
        Ok(())
    }

    fn register_uninstaller(&self, install_root: &Path, uninstaller_path: &Path) {
        let setup = &self.config.setup;
        let key = format!("{}\\{}", UNINSTALL_KEY, setup.app_name);
        let display_name = if setup.uninstall_display_name.is_empty() {
            setup.app_name.clone()
        } else {
            self.context.resolve(&setup.uninstall_display_name)
        };

        let display_icon = if setup.uninstall_display_icon.is_empty() {
            uninstaller_path.display().to_string()
        } else {
            self.context.resolve(&setup.uninstall_display_icon)
        };

        let values = [
            ("DisplayName", display_name),
            ("UninstallString", uninstaller_path.display().to_string()),
            ("DisplayVersion", setup.app_version.clone()),
            ("Publisher", setup.app_publisher.clone()),
            ("DisplayIcon", display_icon),
            ("InstallLocation", install_root.display().to_string()),
        ];

        for (name, value) in values {
            if let Err(e) = self.services.registry.set_value(
                RegistryRoot::LocalMachine,
                &key,
                name,
                RegistryValue::String(value),
            ) {
                self.warn(format!("Failed to register uninstaller: {}", e));
                return;
            }
        }

        self.log(format!("Uninstaller registered at {:?}", uninstaller_path));
    }

    // === Rollback ===

    async fn rollback(&mut self) {
        self.log("Rolling back installation...");

        for file in self.installed_files.iter().rev() {
            match fs::remove_file(file).await {
                Ok(()) => tracing::debug!("Removed {:?}", file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => self.warn(format!("Failed to remove {:?} during rollback: {}", file, e)),
            }
        }

        for dir in self.created_directories.iter().rev() {
            if !is_empty_dir(dir).await {
                tracing::debug!("Keeping non-empty directory {:?}", dir);
                continue;
            }
            if let Err(e) = fs::remove_dir(dir).await {
                self.warn(format!("Failed to remove {:?} during rollback: {}", dir, e));
            }
        }

        self.log("Rollback completed");
    }

    // === Reporting ===

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn advance(&mut self, message: impl Into<String>) {
        self.step += 1;
        self.progress(self.step, message);
    }

    fn progress(&self, step: usize, message: impl Into<String>) {
        let progress = InstallProgress::new(step, self.total, message);
        tracing::debug!("[{}%] {}", progress.percent(), progress.message);
        if let Some(tx) = &self.events {
            let _ = tx.send(InstallEvent::Progress(progress));
        }
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        if let Some(tx) = &self.events {
            let _ = tx.send(InstallEvent::Log(message));
        }
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        if let Some(tx) = &self.events {
            let _ = tx.send(InstallEvent::Log(message));
        }
    }

    fn into_report(self) -> InstallReport {
        InstallReport {
            installed_files: self.installed_files,
            created_directories: self.created_directories,
            manifest_path: self.manifest_path,
        }
    }
}

/// Run the `[Run]` entries flagged `postinstall`, for a front end that
/// offers to launch the application after setup. Failures are logged.
pub async fn run_post_install(config: &ConfigModel, context: &ResolverContext, runner: Arc<dyn CommandRunner>) {
    for run in config.run.iter().filter(|r| r.is_post_install()) {
        let program = context.resolve_path(&run.filename);
        let arguments = context.resolve(&run.parameters);
        let working_dir = if run.working_dir.is_empty() {
            program.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            context.resolve_path(&run.working_dir)
        };

        match execute(runner.clone(), program.clone(), arguments, working_dir).await {
            Ok(code) => tracing::info!("Executed: {:?} (Exit code: {})", program, code),
            Err(e) => tracing::warn!("Failed to execute command: {}", e),
        }
    }
}

/// Run a command on the blocking pool and wait for it
async fn execute(
    runner: Arc<dyn CommandRunner>,
    program: PathBuf,
    arguments: String,
    working_dir: PathBuf,
) -> Result<i32, String> {
    tokio::task::spawn_blocking(move || runner.run(&program, &arguments, &working_dir))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

async fn is_empty_dir(dir: &Path) -> bool {
    match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// Last component of a manifest `Source`, accepting either separator
fn source_file_name(source: &str) -> String {
    let normalized = source.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or(normalized)
}
