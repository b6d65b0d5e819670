//! Filesystem helpers shared by the packager and the installation engine.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use wax::{CandidatePath, Glob, Pattern};

/// Copy the contents of `src` into `dest`, creating directories as needed.
///
/// Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    std::fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Files directly inside `dir` whose names match the wildcard `pattern`.
///
/// A missing directory or an invalid pattern yields no matches.
pub fn match_files(dir: &Path, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
    let glob = match Glob::new(pattern) {
        Ok(glob) => glob,
        Err(e) => {
            tracing::warn!("Invalid wildcard pattern {:?}: {}", pattern, e);
            return Ok(Vec::new());
        }
    };

    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if glob.matched(&CandidatePath::from(name.as_str())).is_some() {
            matches.push(entry.into_path());
        }
    }

    Ok(matches)
}

/// Relative path with `/` separators, as stored in archives
pub fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_match_files_non_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.dll"), b"a").unwrap();
        std::fs::write(dir.path().join("b.dll"), b"b").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/d.dll"), b"d").unwrap();

        let found = match_files(dir.path(), "*.dll").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.dll", "b.dll"]);
    }

    #[test]
    fn test_match_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(match_files(&dir.path().join("gone"), "*.so").unwrap().is_empty());
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("x/y")).unwrap();
        std::fs::create_dir_all(src.path().join("empty")).unwrap();
        std::fs::write(src.path().join("top.txt"), b"1").unwrap();
        std::fs::write(src.path().join("x/y/deep.txt"), b"2").unwrap();

        let copied = copy_dir_recursive(src.path(), &dest.path().join("out")).unwrap();
        assert_eq!(copied, 2);
        assert!(dest.path().join("out/top.txt").is_file());
        assert!(dest.path().join("out/x/y/deep.txt").is_file());
        assert!(dest.path().join("out/empty").is_dir());
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(archive_name(Path::new("Files/sub/a.txt")), "Files/sub/a.txt");
    }
}
