//! Manifest Parser
//!
//! Line-oriented `key=value` grammar with `[Section]` headers.
//!
//! `[Setup]` keys are applied as they are read. In every other section keys
//! accumulate into a pending entry; a `Source`, `Name` or `Filename` key
//! closes the pending entry and starts a new one. An entry that never sees
//! one of those keys stays open until the next one does or the section ends.

use crate::config::{ConfigModel, ManifestSection};
use crate::error::ConfigError;
use std::path::Path;

/// Keys that start a new entry in list sections
pub const BOUNDARY_KEYS: [&str; 3] = ["Source", "Name", "Filename"];

pub(crate) fn is_boundary_key(key: &str) -> bool {
    BOUNDARY_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Before any header, or after `[]`
    Unnamed,
    Setup,
    Files,
    Dirs,
    Icons,
    Registry,
    Run,
    Components,
    Tasks,
    Other,
}

impl Section {
    fn from_name(name: &str) -> Self {
        if name.is_empty() {
            return Section::Unnamed;
        }
        match name.to_ascii_lowercase().as_str() {
            "setup" => Section::Setup,
            "files" => Section::Files,
            "dirs" => Section::Dirs,
            "icons" => Section::Icons,
            "registry" => Section::Registry,
            "run" => Section::Run,
            "components" => Section::Components,
            "tasks" => Section::Tasks,
            _ => Section::Other,
        }
    }
}

/// Keys collected for the entry currently being read, in first-seen order
type PendingEntry = Vec<(String, String)>;

/// Parse a manifest file. `LicenseFile` and `ReadmeFile` are resolved
/// against the file's directory.
pub fn parse_file(path: &Path) -> Result<ConfigModel, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(parse_str(&text, base_dir))
}

/// Parse manifest text. Never fails: malformed lines, unknown keys and
/// values that do not coerce are skipped.
pub fn parse_str(text: &str, base_dir: &Path) -> ConfigModel {
    let lines: Vec<&str> = text.lines().collect();
    let mut config = ConfigModel::default();
    let mut section = Section::Unnamed;
    let mut pending = PendingEntry::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;

        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
            // Keys read before the first named section carry over into it.
            if !pending.is_empty() && section != Section::Unnamed {
                add_entry(&mut config, section, &pending);
                pending.clear();
            }
            section = Section::from_name(line[1..line.len() - 1].trim());
            continue;
        }

        let Some(delimiter) = line.find('=').filter(|&idx| idx > 0) else {
            continue;
        };

        let key = line[..delimiter].trim();
        let mut value = line[delimiter + 1..].trim().to_string();

        if value.ends_with('\\') {
            let mut joined = value.trim_end_matches('\\').to_string();
            while i < lines.len() {
                let next = lines[i].trim_start();
                i += 1;
                if next.ends_with('\\') {
                    joined.push_str(next.trim_end_matches('\\'));
                } else {
                    joined.push_str(next);
                    break;
                }
            }
            value = joined;
        }

        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = value[1..value.len() - 1].to_string();
        }

        if section == Section::Setup {
            if !config.setup.assign(key, &value) {
                tracing::debug!("Ignoring [Setup] {}={}", key, value);
            }
            continue;
        }

        if is_boundary_key(key) && !pending.is_empty() {
            add_entry(&mut config, section, &pending);
            pending.clear();
        }

        match pending.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => pending.push((key.to_string(), value)),
        }
    }

    if !pending.is_empty() && section != Section::Unnamed {
        add_entry(&mut config, section, &pending);
    }

    load_external_files(&mut config, base_dir);

    config
}

fn add_entry(config: &mut ConfigModel, section: Section, pending: &PendingEntry) {
    match section {
        Section::Files => config.files.push(build_entry(pending)),
        Section::Dirs => config.dirs.push(build_entry(pending)),
        Section::Icons => config.icons.push(build_entry(pending)),
        Section::Registry => config.registry.push(build_entry(pending)),
        Section::Run => config.run.push(build_entry(pending)),
        Section::Components => config.components.push(build_entry(pending)),
        Section::Tasks => config.tasks.push(build_entry(pending)),
        Section::Unnamed | Section::Setup | Section::Other => {
            tracing::debug!("Dropping entry outside a list section: {:?}", pending);
        }
    }
}

fn build_entry<T: ManifestSection>(pending: &PendingEntry) -> T {
    let mut entry = T::default();
    for (key, value) in pending {
        if !entry.assign(key, value) {
            tracing::debug!("Ignoring [{}] {}={}", T::SECTION, key, value);
        }
    }
    entry
}

fn load_external_files(config: &mut ConfigModel, base_dir: &Path) {
    if let Some(lines) = read_lines(base_dir, &config.setup.license_file) {
        config.license_text.extend(lines);
    }
    if let Some(lines) = read_lines(base_dir, &config.setup.readme_file) {
        config.readme_text.extend(lines);
    }
}

fn read_lines(base_dir: &Path, relative: &str) -> Option<Vec<String>> {
    if relative.is_empty() {
        return None;
    }

    let path = base_dir.join(relative);
    if !path.is_file() {
        return None;
    }

    match std::fs::read_to_string(&path) {
        Ok(text) => Some(text.lines().map(String::from).collect()),
        Err(e) => {
            tracing::warn!("Could not read {:?}: {}", path, e);
            None
        }
    }
}
