//! Shortcut Creation
//!
//! Shortcuts are freedesktop `.desktop` launchers.

use crate::error::CapabilityError;
use std::path::{Path, PathBuf};

/// What a shortcut points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    /// Location of the shortcut file
    pub path: PathBuf,
    pub target: PathBuf,
    pub working_dir: PathBuf,
    pub arguments: String,
    pub icon: Option<PathBuf>,
}

/// Shortcut capability used by the engine
pub trait ShortcutCreator: Send + Sync {
    fn create_shortcut(&self, shortcut: &Shortcut) -> Result<(), CapabilityError>;
}

/// Writes `.desktop` launcher files
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopShortcuts;

impl DesktopShortcuts {
    /// Launcher file contents for `shortcut`
    pub fn render(shortcut: &Shortcut) -> String {
        let name = shortcut
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| shortcut.target.display().to_string());

        let exec = if shortcut.arguments.is_empty() {
            quote_exec(&shortcut.target)
        } else {
            format!("{} {}", quote_exec(&shortcut.target), shortcut.arguments)
        };

        let icon = shortcut
            .icon
            .as_ref()
            .unwrap_or(&shortcut.target)
            .display()
            .to_string();

        format!(
            r#"[Desktop Entry]
Type=Application
Name={name}
Exec={exec}
Path={path}
Icon={icon}
Terminal=false
"#,
            name = name,
            exec = exec,
            path = shortcut.working_dir.display(),
            icon = icon,
        )
    }
}

fn quote_exec(target: &Path) -> String {
    let text = target.display().to_string();
    if text.contains(' ') {
        format!("\"{}\"", text)
    } else {
        text
    }
}

impl ShortcutCreator for DesktopShortcuts {
    fn create_shortcut(&self, shortcut: &Shortcut) -> Result<(), CapabilityError> {
        std::fs::write(&shortcut.path, Self::render(shortcut))?;

        // Make it executable (some desktops refuse untrusted launchers otherwise)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(&shortcut.path, perms)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shortcut(path: PathBuf) -> Shortcut {
        Shortcut {
            path,
            target: PathBuf::from("/opt/My App/demo"),
            working_dir: PathBuf::from("/opt/My App"),
            arguments: "--fast".to_string(),
            icon: None,
        }
    }

    #[test]
    fn test_render() {
        let content = DesktopShortcuts::render(&shortcut(PathBuf::from("/apps/Demo.desktop")));
        assert!(content.starts_with("[Desktop Entry]\n"));
        assert!(content.contains("Name=Demo\n"));
        assert!(content.contains("Exec=\"/opt/My App/demo\" --fast\n"));
        assert!(content.contains("Path=/opt/My App\n"));
        assert!(content.contains("Icon=/opt/My App/demo\n"));
    }

    #[test]
    fn test_create_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Demo.desktop");
        DesktopShortcuts.create_shortcut(&shortcut(path.clone())).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("Name=Demo"));
    }

    #[test]
    fn test_create_fails_without_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing/Demo.desktop");
        assert!(DesktopShortcuts.create_shortcut(&shortcut(path)).is_err());
    }
}
