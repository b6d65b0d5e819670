//! uniinst - Universal Installer library
//!
//! Shared by the compiler, setup host and uninstaller binaries:
//! - Manifest model and parsing
//! - Path template resolution
//! - Packaging and payload extraction
//! - The installation engine and its collaborators
//! - Manifest-driven uninstallation

pub mod config;
pub mod error;
pub mod extractor;
pub mod files;
pub mod installer;
pub mod manifest;
pub mod packager;
pub mod parser;
pub mod paths;
pub mod payload;
pub mod process;
pub mod progress;
pub mod registry;
pub mod shortcut;
pub mod uninstaller;
