//! Package, install and uninstall a manifest through the public API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

use uniinst::extractor::{self, ExtractOutcome};
use uniinst::installer::{InstallServices, InstallationEngine};
use uniinst::manifest::InstallationManifest;
use uniinst::packager::{Packager, HOST_EXECUTABLE};
use uniinst::parser;
use uniinst::paths::{KnownFolders, ResolverContext};
use uniinst::payload::{self, CONFIG_FILE, MAGIC};
use uniinst::process::ProcessRunner;
use uniinst::registry::MemoryRegistry;
use uniinst::shortcut::DesktopShortcuts;
use uniinst::uninstaller::Uninstaller;

const HOST_BYTES: &[u8] = b"#!/bin/sh\necho 'setup host'\n";

/// Relative paths of every file under `dir`, sorted
fn files_under(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

fn build_package(work: &TempDir, manifest_text: &str) -> PathBuf {
    let src = work.path().join("src");
    let host_dir = work.path().join("host");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::create_dir_all(&host_dir).unwrap();
    std::fs::write(src.join("readme.txt"), b"Read me first").unwrap();

    let host = host_dir.join(HOST_EXECUTABLE);
    std::fs::write(&host, HOST_BYTES).unwrap();

    let manifest = src.join("demo.ini");
    std::fs::write(&manifest, manifest_text).unwrap();

    let report = Packager::from_manifest(&manifest, host)
        .unwrap()
        .build(&work.path().join("Output"))
        .unwrap();
    report.output_path
}

fn services() -> InstallServices {
    InstallServices::new(
        Arc::new(MemoryRegistry::new()),
        Arc::new(DesktopShortcuts),
        Arc::new(ProcessRunner),
    )
}

#[tokio::test]
async fn test_demo_package_install_uninstall() {
    let work = TempDir::new().unwrap();
    let setup_exe = build_package(
        &work,
        "[Setup]\nAppName=Demo\nCompression=yes\n\n[Files]\nSource=readme.txt\n",
    );

    // Packaging: host bytes, then the archive, then the trailer.
    let bytes = std::fs::read(&setup_exe).unwrap();
    assert!(bytes.starts_with(HOST_BYTES));
    assert!(bytes.ends_with(MAGIC));
    let trailer = payload::read_trailer(&setup_exe).unwrap().unwrap();
    assert_eq!(trailer.archive_offset, HOST_BYTES.len() as u64);

    // The embedded archive is byte-identical to the sibling copy.
    let copied = work.path().join("copied.dat");
    extractor::copy_embedded_archive(&setup_exe, &copied).unwrap();
    assert_eq!(
        std::fs::read(&copied).unwrap(),
        std::fs::read(work.path().join("Output/installer.dat")).unwrap()
    );

    // Extraction restores exactly the manifest and the payload.
    let extracted = work.path().join("extracted");
    std::fs::create_dir_all(&extracted).unwrap();
    assert_eq!(extractor::extract_package(&setup_exe, &extracted), ExtractOutcome::Embedded);
    assert_eq!(files_under(&extracted), vec!["Files/readme.txt", CONFIG_FILE]);

    // Install.
    let config = parser::parse_file(&extracted.join(CONFIG_FILE)).unwrap();
    assert_eq!(config.setup.app_name, "Demo");

    let install_root = work.path().join("target/Demo");
    let context = ResolverContext::from_setup(&config.setup)
        .with_folders(KnownFolders::under(&work.path().join("folders")))
        .with_install_root(&install_root);

    let outcome = InstallationEngine::new(&config, &context, &extracted, services())
        .install()
        .await
        .unwrap();
    assert!(outcome.is_completed());

    let readme = install_root.join("Files/readme.txt");
    assert_eq!(std::fs::read(&readme).unwrap(), b"Read me first");

    let manifest = InstallationManifest::load(&install_root).await.unwrap();
    assert_eq!(manifest.installed_files, vec![readme.clone()]);
    assert_eq!(manifest.app_name, "Demo");

    // Uninstall.
    let report = Uninstaller::new(Arc::new(MemoryRegistry::new()), Arc::new(ProcessRunner))
        .uninstall(&manifest)
        .await;
    assert_eq!(report.files_removed, 1);
    assert!(!readme.exists());
    assert!(!install_root.join("Files").exists());
    assert!(report.root_removed);
    assert!(!install_root.exists());

    // A second uninstall finds nothing to act on.
    assert!(InstallationManifest::load(&install_root).await.is_err());
}

#[tokio::test]
async fn test_unmatched_wildcard_installs_nothing() {
    let work = TempDir::new().unwrap();
    let setup_exe = build_package(
        &work,
        "[Setup]\nAppName=Demo\nCreateUninstaller=no\n\n[Files]\nSource=*.dll\n",
    );

    let extracted = work.path().join("extracted");
    std::fs::create_dir_all(&extracted).unwrap();
    extractor::extract_package(&setup_exe, &extracted);
    let config = parser::parse_file(&extracted.join(CONFIG_FILE)).unwrap();

    let install_root = work.path().join("target/Demo");
    let context = ResolverContext::from_setup(&config.setup)
        .with_folders(KnownFolders::under(&work.path().join("folders")))
        .with_install_root(&install_root);

    let outcome = InstallationEngine::new(&config, &context, &extracted, services())
        .install()
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert!(outcome.report().installed_files.is_empty());
    assert!(outcome.report().manifest_path.is_none());
}

#[tokio::test]
async fn test_reinstall_after_user_added_file_keeps_it() {
    let work = TempDir::new().unwrap();
    let setup_exe = build_package(&work, "[Setup]\nAppName=Demo\n\n[Files]\nSource=readme.txt\n");

    let extracted = work.path().join("extracted");
    std::fs::create_dir_all(&extracted).unwrap();
    extractor::extract_package(&setup_exe, &extracted);
    let config = parser::parse_file(&extracted.join(CONFIG_FILE)).unwrap();

    let install_root = work.path().join("target/Demo");
    let context = ResolverContext::from_setup(&config.setup)
        .with_folders(KnownFolders::under(&work.path().join("folders")))
        .with_install_root(&install_root);
    InstallationEngine::new(&config, &context, &extracted, services())
        .install()
        .await
        .unwrap();

    let notes = install_root.join("Files/notes.txt");
    std::fs::write(&notes, b"user data").unwrap();

    let manifest = InstallationManifest::load(&install_root).await.unwrap();
    let report = Uninstaller::new(Arc::new(MemoryRegistry::new()), Arc::new(ProcessRunner))
        .uninstall(&manifest)
        .await;

    assert!(notes.is_file());
    assert_eq!(report.directories_kept, vec![install_root.join("Files")]);
    assert!(!report.root_removed);
}

#[tokio::test]
async fn test_absent_and_empty_sources_do_not_fail_install() {
    let work = TempDir::new().unwrap();
    std::fs::create_dir_all(work.path().join("src/plugins")).unwrap();
    let setup_exe = build_package(
        &work,
        "[Setup]\nAppName=Demo\n\n[Files]\nSource=readme.txt\nSource=optional.txt\nSource=plugins\nRecurse=yes\n",
    );

    let extracted = work.path().join("extracted");
    std::fs::create_dir_all(&extracted).unwrap();
    extractor::extract_package(&setup_exe, &extracted);
    assert_eq!(files_under(&extracted), vec!["Files/readme.txt", CONFIG_FILE]);

    let config = parser::parse_file(&extracted.join(CONFIG_FILE)).unwrap();
    assert_eq!(config.files.len(), 3);

    let install_root = work.path().join("target/Demo");
    let context = ResolverContext::from_setup(&config.setup)
        .with_folders(KnownFolders::under(&work.path().join("folders")))
        .with_install_root(&install_root);

    let outcome = InstallationEngine::new(&config, &context, &extracted, services())
        .install()
        .await
        .unwrap();

    assert!(outcome.is_completed());
    let readme = install_root.join("Files/readme.txt");
    assert_eq!(std::fs::read(&readme).unwrap(), b"Read me first");
    assert!(!install_root.join("Files/optional.txt").exists());

    let manifest = InstallationManifest::load(&install_root).await.unwrap();
    assert_eq!(manifest.installed_files, vec![readme]);
}
