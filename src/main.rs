//! uniinst-setup - Self-extracting setup host
//!
//! The packaged setup executable is a copy of this binary with the package
//! archive appended. At run time it:
//! 1. Extracts its embedded package (or a sibling `installer.dat`)
//! 2. Parses the packaged `config.ini`
//! 3. Runs the installation engine with a terminal progress bar
//! 4. Optionally launches the post-install commands

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use uniinst::config::ConfigModel;
use uniinst::extractor::{self, ExtractOutcome};
use uniinst::installer::{self, InstallOutcome, InstallServices, InstallationEngine};
use uniinst::parser;
use uniinst::paths::ResolverContext;
use uniinst::payload::CONFIG_FILE;
use uniinst::process::ProcessRunner;
use uniinst::progress::InstallEvent;
use uniinst::registry::{FileRegistry, MemoryRegistry, RegistryStore};
use uniinst::shortcut::DesktopShortcuts;

/// Exit status of a run stopped with Ctrl-C
const EXIT_CANCELLED: u8 = 130;

/// Exit status of a failed, rolled back run
const EXIT_FAILED: u8 = 1;

/// uniinst setup - install the packaged application
#[derive(Parser, Debug)]
#[command(name = "uniinst-setup")]
#[command(about = "Self-extracting application installer")]
#[command(version)]
struct Args {
    /// Installation directory (default: the package's DefaultDirName)
    #[arg(long, value_name = "DIR")]
    install_dir: Option<PathBuf>,

    /// Extract the package here instead of a temporary directory
    #[arg(long, value_name = "DIR")]
    extract_dir: Option<PathBuf>,

    /// Accept the license and skip confirmation prompts
    #[arg(short, long)]
    yes: bool,

    /// Run the post-install commands when installation completes
    #[arg(long)]
    launch: bool,

    /// No output except errors; implies --yes
    #[arg(short, long)]
    silent: bool,
}

struct Console {
    silent: bool,
}

impl Console {
    fn log(&self, msg: impl std::fmt::Display) {
        if !self.silent {
            println!("{}", msg);
        }
    }

    fn success(&self, msg: impl std::fmt::Display) {
        if !self.silent {
            println!("✅ {}", msg);
        }
    }

    fn warn(&self, msg: impl std::fmt::Display) {
        if !self.silent {
            eprintln!("⚠️  {}", msg);
        }
    }

    fn error(&self, msg: impl std::fmt::Display) {
        eprintln!("❌ {}", msg);
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if self.silent {
            return None;
        }
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}",
        )
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let pb = ProgressBar::new(len);
        pb.set_style(style);
        Some(pb)
    }

    /// y/N prompt; anything but `y` declines
    fn confirm(&self, question: &str) -> Result<bool> {
        print!("{} [y/N] ", question);
        std::io::Write::flush(&mut std::io::stdout())?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok(input.trim().eq_ignore_ascii_case("y"))
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let console = Console { silent: args.silent };

    if !args.silent {
        let filter = EnvFilter::try_from_env("UNIINST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .try_init();
    }

    tracing::debug!("uniinst-setup v{}", env!("CARGO_PKG_VERSION"));

    let exe_path = std::env::current_exe().context("Failed to locate the setup executable")?;

    // Extraction target; a temporary one is removed when dropped.
    let temp_dir;
    let extract_dir = match &args.extract_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
            dir.clone()
        }
        None => {
            temp_dir = tempfile::Builder::new()
                .prefix("uniinst-setup-")
                .tempdir()
                .context("Failed to create extraction directory")?;
            temp_dir.path().to_path_buf()
        }
    };

    let source_root = match extractor::extract_package(&exe_path, &extract_dir) {
        ExtractOutcome::Embedded | ExtractOutcome::SiblingArchive => extract_dir,
        ExtractOutcome::Nothing => {
            // Uncompressed package: files sit next to the executable.
            let dir = exe_path.parent().map(Path::to_path_buf).unwrap_or_default();
            tracing::info!("Using package files in {:?}", dir);
            dir
        }
    };

    let config = parser::parse_file(&source_root.join(CONFIG_FILE)).context("Failed to load package configuration")?;

    let install_root = match &args.install_dir {
        Some(dir) => dir.clone(),
        None => ResolverContext::from_setup(&config.setup).default_install_dir(&config.setup),
    };
    let context = ResolverContext::from_setup(&config.setup).with_install_root(&install_root);

    console.log(format!(
        "📦 {} {}",
        config.setup.app_name, config.setup.app_version
    ));
    if !config.setup.app_publisher.is_empty() {
        console.log(format!("   Publisher: {}", config.setup.app_publisher));
    }
    console.log(format!("   Install to: {}\n", install_root.display()));

    let interactive = !args.yes && !args.silent;
    if interactive && !accept_documents(&config, &console)? {
        console.log("\nCancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(run_install(&config, &context, &source_root, &console));
    let status = exit_status(&outcome);

    // Returning instead of exiting lets the extraction directory drop.
    match outcome {
        Ok(InstallOutcome::Completed(report)) => {
            console.success(format!(
                "{} installed ({} files) to {}",
                config.setup.app_name,
                report.installed_files.len(),
                install_root.display()
            ));

            if args.launch {
                rt.block_on(installer::run_post_install(&config, &context, Arc::new(ProcessRunner)));
            }
        }
        Ok(InstallOutcome::Cancelled(report)) => {
            console.warn(format!(
                "Installation cancelled after {} files; completed steps were kept",
                report.installed_files.len()
            ));
        }
        Err(e) => {
            console.error(format!("Installation failed: {:#}", e));
            console.log("All changes made by this installation were rolled back.");
        }
    }

    Ok(ExitCode::from(status))
}

fn exit_status(outcome: &Result<InstallOutcome>) -> u8 {
    match outcome {
        Ok(InstallOutcome::Completed(_)) => 0,
        Ok(InstallOutcome::Cancelled(_)) => EXIT_CANCELLED,
        Err(_) => EXIT_FAILED,
    }
}

/// Show the readme and ask for license acceptance and confirmation
fn accept_documents(config: &ConfigModel, console: &Console) -> Result<bool> {
    if config.setup.show_readme && !config.readme_text.is_empty() {
        console.log(config.readme_text.join("\n"));
        console.log("");
    }

    if config.setup.show_license && !config.license_text.is_empty() {
        console.log(config.license_text.join("\n"));
        console.log("");
        if !console.confirm("Do you accept the license agreement?")? {
            return Ok(false);
        }
    }

    console.confirm(&format!("Install {}?", config.setup.app_name))
}

async fn run_install(
    config: &ConfigModel,
    context: &ResolverContext,
    source_root: &Path,
    console: &Console,
) -> Result<InstallOutcome> {
    let registry: Arc<dyn RegistryStore> = match FileRegistry::user_default() {
        Some(store) => Arc::new(store),
        None => {
            tracing::warn!("No per-user data directory; registrations will not persist");
            Arc::new(MemoryRegistry::new())
        }
    };
    let services = InstallServices::new(registry, Arc::new(DesktopShortcuts), Arc::new(ProcessRunner));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let interrupt = listen_for_interrupt(cancel_tx);

    let engine = InstallationEngine::new(config, context, source_root, services)
        .with_events(events_tx)
        .with_cancellation(cancel_rx);

    let pb = console.progress_bar(engine.total_steps() as u64);
    let display = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(events_rx);
        while let Some(event) = events.next().await {
            let Some(pb) = &pb else { continue };
            match event {
                InstallEvent::Progress(progress) => {
                    pb.set_length(progress.total as u64);
                    pb.set_position(progress.step as u64);
                    pb.set_message(progress.message);
                }
                InstallEvent::Log(line) => pb.set_message(line),
            }
        }
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
    });

    let outcome = engine.install().await;
    interrupt.abort();
    let _ = display.await;

    Ok(outcome?)
}

/// Request cancellation on Ctrl-C. Abort the handle once the engine is done
/// so a late Ctrl-C is not swallowed during post-install work.
fn listen_for_interrupt(cancel_tx: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Cancellation requested");
            let _ = cancel_tx.send(true);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniinst::installer::InstallReport;

    #[test]
    fn test_exit_status_per_outcome() {
        assert_eq!(exit_status(&Ok(InstallOutcome::Completed(InstallReport::default()))), 0);
        assert_eq!(
            exit_status(&Ok(InstallOutcome::Cancelled(InstallReport::default()))),
            EXIT_CANCELLED
        );
        assert_eq!(exit_status(&Err(anyhow::anyhow!("copy failed"))), EXIT_FAILED);
    }

    #[tokio::test]
    async fn test_interrupt_listener_stops_when_aborted() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let interrupt = listen_for_interrupt(cancel_tx);

        interrupt.abort();
        assert!(interrupt.await.unwrap_err().is_cancelled());

        // The sender went away with the task, and nothing was requested.
        assert!(cancel_rx.has_changed().is_err());
        assert!(!*cancel_rx.borrow());
    }
}
