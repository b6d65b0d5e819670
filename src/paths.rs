//! Path Resolution
//!
//! Known-folder locations and the resolver that expands `{token}` and
//! `%VAR%` references in manifest path templates.

use crate::config::SetupOptions;
use std::path::{Path, PathBuf};

/// System-wide locations
pub mod system {
    use std::path::PathBuf;

    /// Program files root
    pub const PROGRAMS_DIR: &str = "/opt";

    /// Shared, architecture-independent data
    pub const SHARE_DIR: &str = "/usr/share";

    /// System-wide applications directory (for .desktop files)
    pub const APPLICATIONS_DIR: &str = "/usr/share/applications";

    /// System-wide autostart entries
    pub const AUTOSTART_DIR: &str = "/etc/xdg/autostart";

    /// Persistent application state
    pub const STATE_DIR: &str = "/var/lib";

    pub const DOC_DIR: &str = "/usr/share/doc";
    pub const SYSTEM_ROOT: &str = "/usr";
    pub const LIBRARY_DIR: &str = "/usr/lib";

    pub fn programs_dir() -> PathBuf {
        PathBuf::from(PROGRAMS_DIR)
    }
}

/// Per-user locations (no privileges required)
pub mod user {
    use std::path::PathBuf;

    /// Get user's local data directory (~/.local/share)
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_local_dir()
    }

    /// Get user's applications directory (~/.local/share/applications)
    pub fn applications_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("applications"))
    }

    /// Get user's autostart directory (~/.config/autostart)
    pub fn autostart_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autostart"))
    }

    /// Where per-user state such as the registration store lives
    pub fn uniinst_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("uniinst"))
    }
}

/// Safety checks before removing directories
pub mod safety {
    use std::path::Path;

    /// Directories that must never be removed as an install root
    pub fn is_protected(path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        let trimmed = path_str.trim_end_matches('/');

        if trimmed.is_empty() {
            return true;
        }

        let protected = [
            "/home",
            "/usr",
            "/usr/share",
            "/usr/lib",
            "/opt",
            "/etc",
            "/var",
            "/var/lib",
            "/tmp",
        ];
        if protected.contains(&trimmed) {
            return true;
        }

        if let Some(home) = dirs::home_dir() {
            if path == home {
                return true;
            }
        }

        false
    }
}

/// Tokens substituted before `{group}`, in substitution order
pub const FOLDER_TOKENS: [&str; 24] = [
    "{app}",
    "{win}",
    "{sys}",
    "{pf}",
    "{pf32}",
    "{pf64}",
    "{cf}",
    "{cf32}",
    "{cf64}",
    "{tmp}",
    "{sd}",
    "{userappdata}",
    "{localappdata}",
    "{userdocs}",
    "{userdesktop}",
    "{userstartmenu}",
    "{userprograms}",
    "{userstartup}",
    "{commonappdata}",
    "{commondocs}",
    "{commondesktop}",
    "{commonstartmenu}",
    "{commonprograms}",
    "{commonstartup}",
];

/// Locations the folder tokens map to. `{app}` is not stored here; it
/// comes from the resolver's install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFolders {
    folders: Vec<(&'static str, Option<PathBuf>)>,
}

impl KnownFolders {
    /// Folders of the current user and system
    pub fn detect() -> Self {
        let applications = user::applications_dir();
        let folders = vec![
            ("{win}", Some(PathBuf::from(system::SYSTEM_ROOT))),
            ("{sys}", Some(PathBuf::from(system::LIBRARY_DIR))),
            ("{pf}", Some(system::programs_dir())),
            ("{pf32}", Some(system::programs_dir())),
            ("{pf64}", Some(system::programs_dir())),
            ("{cf}", Some(PathBuf::from(system::SHARE_DIR))),
            ("{cf32}", Some(PathBuf::from(system::SHARE_DIR))),
            ("{cf64}", Some(PathBuf::from(system::SHARE_DIR))),
            ("{tmp}", Some(std::env::temp_dir())),
            ("{sd}", Some(PathBuf::from("/"))),
            ("{userappdata}", dirs::config_dir()),
            ("{localappdata}", user::data_dir()),
            ("{userdocs}", dirs::document_dir()),
            ("{userdesktop}", dirs::desktop_dir()),
            ("{userstartmenu}", applications.clone()),
            ("{userprograms}", applications),
            ("{userstartup}", user::autostart_dir()),
            ("{commonappdata}", Some(PathBuf::from(system::STATE_DIR))),
            ("{commondocs}", Some(PathBuf::from(system::DOC_DIR))),
            ("{commondesktop}", Some(PathBuf::from(system::APPLICATIONS_DIR))),
            ("{commonstartmenu}", Some(PathBuf::from(system::APPLICATIONS_DIR))),
            ("{commonprograms}", Some(PathBuf::from(system::APPLICATIONS_DIR))),
            ("{commonstartup}", Some(PathBuf::from(system::AUTOSTART_DIR))),
        ];
        Self { folders }
    }

    /// Every folder placed under `root`, named after its token.
    ///
    /// Useful for staging installs away from the real system folders.
    pub fn under(root: &Path) -> Self {
        let folders = FOLDER_TOKENS
            .iter()
            .filter(|token| **token != "{app}")
            .map(|token| (*token, Some(root.join(token.trim_matches(['{', '}'])))))
            .collect();
        Self { folders }
    }

    /// Override (or clear) one token's location
    pub fn with(mut self, token: &'static str, path: Option<PathBuf>) -> Self {
        match self.folders.iter_mut().find(|(t, _)| *t == token) {
            Some(slot) => slot.1 = path,
            None => self.folders.push((token, path)),
        }
        self
    }

    pub fn get(&self, token: &str) -> Option<&Path> {
        self.folders
            .iter()
            .find(|(t, _)| *t == token)
            .and_then(|(_, path)| path.as_deref())
    }
}

impl Default for KnownFolders {
    fn default() -> Self {
        Self::detect()
    }
}

/// Install-context state read by every path resolution.
///
/// Built once before packaging or installation starts and then only
/// borrowed, so it cannot change underneath a running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverContext {
    install_root: Option<PathBuf>,
    group_name: String,
    app_name: String,
    folders: KnownFolders,
}

impl ResolverContext {
    pub fn new(app_name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            install_root: None,
            group_name: group_name.into(),
            app_name: app_name.into(),
            folders: KnownFolders::detect(),
        }
    }

    /// Context for the app described by a manifest's `[Setup]` section
    pub fn from_setup(setup: &SetupOptions) -> Self {
        Self::new(setup.app_name.clone(), setup.default_group_name.clone())
    }

    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = Some(root.into());
        self
    }

    pub fn with_folders(mut self, folders: KnownFolders) -> Self {
        self.folders = folders;
        self
    }

    pub fn install_root(&self) -> Option<&Path> {
        self.install_root.as_deref()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn folders(&self) -> &KnownFolders {
        &self.folders
    }

    /// Expand tokens, then `{group}`, then `%VAR%` references.
    ///
    /// Tokens are matched literally and case-sensitively. Anything that
    /// cannot be resolved is left as written.
    pub fn resolve(&self, template: &str) -> String {
        self.resolve_with_env(template, |name| std::env::var(name).ok())
    }

    /// [`resolve`](Self::resolve) with a custom environment lookup
    pub fn resolve_with_env(&self, template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
        if template.is_empty() {
            return String::new();
        }

        let mut resolved = template.to_string();

        for token in FOLDER_TOKENS {
            if !resolved.contains(token) {
                continue;
            }
            let location = if token == "{app}" {
                self.install_root.as_deref()
            } else {
                self.folders.get(token)
            };
            if let Some(location) = location {
                resolved = resolved.replace(token, &location.to_string_lossy());
            }
        }

        if resolved.contains("{group}") {
            if let Some(programs) = self.folders.get("{userprograms}") {
                let group = if self.group_name.is_empty() {
                    &self.app_name
                } else {
                    &self.group_name
                };
                resolved = resolved.replace("{group}", &programs.join(group).to_string_lossy());
            }
        }

        expand_env_with(&resolved, lookup)
    }

    /// Resolve a template into a filesystem path, normalising `\` separators
    pub fn resolve_path(&self, template: &str) -> PathBuf {
        PathBuf::from(self.resolve(template).replace('\\', "/"))
    }

    /// The resolved `DefaultDirName` of a manifest
    pub fn default_install_dir(&self, setup: &SetupOptions) -> PathBuf {
        self.resolve_path(&setup.default_dir_name)
    }
}

/// Expand `%NAME%` references. Unknown names are left as written and their
/// closing `%` may open the next reference.
pub fn expand_env_with(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let Some(end) = after.find('%') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match (!name.is_empty()).then(|| lookup(name)).flatten() {
            Some(value) => {
                out.push_str(&value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                out.push_str(name);
                rest = &after[end..];
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ResolverContext {
        let folders = KnownFolders::under(Path::new("/sandbox"));
        ResolverContext::new("Demo", "").with_folders(folders)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_app_token() {
        let ctx = context().with_install_root("/opt/Demo");
        assert_eq!(ctx.resolve_with_env("{app}\\bin", no_env), "/opt/Demo\\bin");
        assert_eq!(ctx.resolve_path("{app}\\bin"), PathBuf::from("/opt/Demo/bin"));
    }

    #[test]
    fn test_app_token_untouched_without_root() {
        assert_eq!(context().resolve_with_env("{app}/x", no_env), "{app}/x");
    }

    #[test]
    fn test_repeated_and_combined_tokens() {
        let ctx = context().with_install_root("/i");
        assert_eq!(
            ctx.resolve_with_env("{app}:{tmp}:{app}:{userdesktop}", no_env),
            "/i:/sandbox/tmp:/i:/sandbox/userdesktop"
        );
    }

    #[test]
    fn test_pf_does_not_match_pf32() {
        let folders = KnownFolders::under(Path::new("/s")).with("{pf}", Some(PathBuf::from("/opt")));
        let ctx = ResolverContext::new("Demo", "").with_folders(folders);
        assert_eq!(ctx.resolve_with_env("{pf}|{pf32}", no_env), "/opt|/s/pf32");
    }

    #[test]
    fn test_unknown_and_unavailable_tokens_untouched() {
        let folders = KnownFolders::under(Path::new("/s")).with("{userdocs}", None);
        let ctx = ResolverContext::new("Demo", "").with_folders(folders);
        assert_eq!(ctx.resolve_with_env("{nope}/{userdocs}/{APP}", no_env), "{nope}/{userdocs}/{APP}");
    }

    #[test]
    fn test_group_falls_back_to_app_name() {
        let ctx = context();
        assert_eq!(ctx.resolve_with_env("{group}", no_env), "/sandbox/userprograms/Demo");

        let grouped = ResolverContext::new("Demo", "Demo Tools")
            .with_folders(KnownFolders::under(Path::new("/sandbox")));
        assert_eq!(
            grouped.resolve_with_env("{group}/Demo.desktop", no_env),
            "/sandbox/userprograms/Demo Tools/Demo.desktop"
        );
    }

    #[test]
    fn test_env_expansion() {
        let lookup = |name: &str| match name {
            "HOME" => Some("/home/demo".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        };
        assert_eq!(expand_env_with("%HOME%/x", lookup), "/home/demo/x");
        assert_eq!(expand_env_with("a%EMPTY%b", lookup), "ab");
        assert_eq!(expand_env_with("%NOPE%/x", lookup), "%NOPE%/x");
        assert_eq!(expand_env_with("100%", lookup), "100%");
        assert_eq!(expand_env_with("%%", lookup), "%%");
        assert_eq!(expand_env_with("%NOPE%HOME%", lookup), "%NOPE/home/demo");
    }

    #[test]
    fn test_env_after_tokens() {
        let ctx = context().with_install_root("/i");
        let resolved = ctx.resolve_with_env("{app}/%SUB%", |n| (n == "SUB").then(|| "data".to_string()));
        assert_eq!(resolved, "/i/data");
    }

    #[test]
    fn test_default_install_dir() {
        let folders = KnownFolders::under(Path::new("/s")).with("{pf}", Some(PathBuf::from("/opt")));
        let ctx = ResolverContext::new("Demo", "").with_folders(folders);
        let setup = SetupOptions {
            default_dir_name: "{pf}\\Demo".to_string(),
            ..Default::default()
        };
        assert_eq!(ctx.default_install_dir(&setup), PathBuf::from("/opt/Demo"));
    }

    #[test]
    fn test_safety_blocks_system_dirs() {
        assert!(safety::is_protected(Path::new("/")));
        assert!(safety::is_protected(Path::new("/usr")));
        assert!(safety::is_protected(Path::new("/opt/")));
        assert!(!safety::is_protected(Path::new("/opt/Demo")));
    }
}
