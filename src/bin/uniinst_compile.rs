//! uniinst-compile - The setup package compiler
//!
//! Usage:
//!   uniinst-compile compile <config.ini> [output_dir]   Build a setup executable

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use uniinst::packager::{locate_host_executable, Packager};

#[derive(Parser)]
#[command(name = "uniinst-compile")]
#[command(version)]
#[command(about = "Universal Installer compiler - build setup executables from a manifest")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    silent: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a setup executable from a manifest
    #[command(arg_required_else_help = true)]
    Compile {
        /// Path to the installer configuration file
        manifest: PathBuf,

        /// Output directory for the installer
        #[arg(default_value = "Output")]
        output_dir: PathBuf,

        /// Setup host to embed into (default: uniinst-setup next to this binary)
        #[arg(long, value_name = "PATH")]
        host: Option<PathBuf>,
    },
}

// Console helper for output control
struct Console {
    silent: bool,
    verbose: bool,
}

impl Console {
    fn new(silent: bool, verbose: bool) -> Self {
        Self { silent, verbose }
    }

    fn log(&self, msg: impl std::fmt::Display) {
        if !self.silent {
            println!("{}", msg);
        }
    }

    fn verbose(&self, msg: impl std::fmt::Display) {
        if self.verbose && !self.silent {
            println!("  {}", msg);
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
        eprintln!("❌ {}", msg); // Always print errors
    }

    fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        if self.silent {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Some(pb)
    }
}

fn main() {
    let cli = Cli::parse();
    let console = Console::new(cli.silent, cli.verbose);

    if cli.verbose {
        let filter = EnvFilter::try_from_env("UNIINST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .try_init();
    }

    let result = match cli.command {
        Commands::Compile {
            manifest,
            output_dir,
            host,
        } => cmd_compile(&manifest, &output_dir, host.as_deref(), &console),
    };

    if let Err(e) = result {
        console.error(format!("Error: {:#}", e));
        std::process::exit(1);
    }
}

/// Build a setup executable
fn cmd_compile(manifest: &Path, output_dir: &Path, host: Option<&Path>, console: &Console) -> Result<()> {
    console.log("🔧 Universal Installer Compiler v1.0\n");

    let host = locate_host_executable(host)?;
    console.verbose(format!("Setup host: {:?}", host));

    console.log(format!("Loading configuration: {}", manifest.display()));
    let packager = Packager::from_manifest(manifest, host)?;
    let setup = &packager.config().setup;

    console.log(format!("📦 Application: {} v{}", setup.app_name, setup.app_version));
    if !setup.app_publisher.is_empty() {
        console.log(format!("   Publisher: {}", setup.app_publisher));
    }
    if !setup.compression {
        console.warn("Compression is off: package files are written next to the executable");
    }

    let output_dir = std::path::absolute(output_dir)
        .with_context(|| format!("Invalid output directory: {}", output_dir.display()))?;
    console.log(format!("   Output: {}\n", output_dir.join(setup.output_filename()).display()));

    let spinner = console.spinner("Building installer...");
    let result = packager.build(&output_dir);
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let report = result.context("Failed to build installer")?;

    console.verbose(format!("Files packaged: {}", report.file_count));
    if let Some(archive) = &report.archive_path {
        console.verbose(format!("Archive: {} ({} bytes)", archive.display(), report.archive_len));
    }
    if let Some(sha) = &report.archive_sha256 {
        console.log(format!("   SHA256: {}", sha));
    }

    console.success(format!("Installer created: {}", report.output_path.display()));
    console.log(format!("   {} files packaged", report.file_count));
    Ok(())
}
