//! Installer Manifest Model
//!
//! Typed representation of a parsed installer manifest: scalar `[Setup]`
//! options plus one ordered list per entry section. Each type carries an
//! explicit key table (see [`ManifestSection`]) used both by the parser to
//! assign fields and by [`ConfigModel::to_manifest_text`] to write them back.

use crate::parser::is_boundary_key;

/// A borrowed view of one field's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Flag(bool),
    Number(i32),
}

impl<'a> From<&'a String> for FieldValue<'a> {
    fn from(value: &'a String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&bool> for FieldValue<'_> {
    fn from(value: &bool) -> Self {
        FieldValue::Flag(*value)
    }
}

impl From<&i32> for FieldValue<'_> {
    fn from(value: &i32) -> Self {
        FieldValue::Number(*value)
    }
}

impl FieldValue<'_> {
    /// Text as it would appear on the right-hand side of `key=value`
    pub fn to_manifest_value(&self) -> String {
        match self {
            FieldValue::Text(text) => text.to_string(),
            FieldValue::Flag(true) => "yes".to_string(),
            FieldValue::Flag(false) => "no".to_string(),
            FieldValue::Number(n) => n.to_string(),
        }
    }

    fn is_empty_text(&self) -> bool {
        matches!(self, FieldValue::Text(text) if text.is_empty())
    }
}

/// Key table for one manifest section.
pub trait ManifestSection: Default {
    /// Section header name, without brackets
    const SECTION: &'static str;

    /// Assign `value` to the field named `key` (case-insensitive).
    ///
    /// Returns `false` when the key is unknown or the value does not coerce
    /// to the field's type; the field then keeps its previous value.
    fn assign(&mut self, key: &str, value: &str) -> bool;

    /// Every field in declaration order
    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)>;
}

/// Typed setters used by the key tables.
mod coerce {
    pub fn text(value: &str, slot: &mut String) -> bool {
        *slot = value.to_string();
        true
    }

    pub fn flag(value: &str, slot: &mut bool) -> bool {
        *slot = value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true") || value == "1";
        true
    }

    pub fn number(value: &str, slot: &mut i32) -> bool {
        match value.parse() {
            Ok(n) => {
                *slot = n;
                true
            }
            Err(_) => false,
        }
    }
}

macro_rules! manifest_section {
    ($ty:ident, $section:literal, { $($key:literal => $field:ident : $kind:ident),+ $(,)? }) => {
        impl ManifestSection for $ty {
            const SECTION: &'static str = $section;

            fn assign(&mut self, key: &str, value: &str) -> bool {
                $(
                    if key.eq_ignore_ascii_case($key) {
                        return coerce::$kind(value, &mut self.$field);
                    }
                )+
                false
            }

            fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
                vec![$(($key, FieldValue::from(&self.$field))),+]
            }
        }
    };
}

/// Scalar `[Setup]` options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupOptions {
    pub app_name: String,
    pub app_version: String,
    pub app_publisher: String,
    pub app_publisher_url: String,
    pub app_support_url: String,
    pub app_updates_url: String,

    /// Install directory template, e.g. `{pf}/MyApp`
    pub default_dir_name: String,

    /// Shortcut group; `{group}` falls back to the app name when empty
    pub default_group_name: String,

    pub output_dir: String,
    pub output_base_filename: String,
    pub setup_icon_file: String,
    pub wizard_image_file: String,
    pub wizard_small_image_file: String,

    /// Embed the package into the setup executable
    pub compression: bool,

    /// Zstd compression level (1-22, default: 19)
    pub compression_level: i32,

    pub solid_compression: bool,
    pub create_uninstaller: bool,
    pub allow_no_icons: bool,
    pub license_file: String,
    pub readme_file: String,
    pub show_license: bool,
    pub show_readme: bool,
    pub uninstall_display_name: String,
    pub uninstall_display_icon: String,
    pub privileges_required: bool,
    pub disable_welcome_page: bool,
    pub disable_dir_page: bool,
    pub disable_program_group_page: bool,
    pub disable_ready_page: bool,
    pub disable_finished_page: bool,
    pub wizard_style: String,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            app_name: "Application".to_string(),
            app_version: "1.0.0".to_string(),
            app_publisher: String::new(),
            app_publisher_url: String::new(),
            app_support_url: String::new(),
            app_updates_url: String::new(),
            default_dir_name: "{pf}/MyApp".to_string(),
            default_group_name: String::new(),
            output_dir: "Output".to_string(),
            output_base_filename: "setup".to_string(),
            setup_icon_file: String::new(),
            wizard_image_file: String::new(),
            wizard_small_image_file: String::new(),
            compression: true,
            compression_level: 19,
            solid_compression: true,
            create_uninstaller: true,
            allow_no_icons: false,
            license_file: String::new(),
            readme_file: String::new(),
            show_license: true,
            show_readme: false,
            uninstall_display_name: String::new(),
            uninstall_display_icon: String::new(),
            privileges_required: true,
            disable_welcome_page: false,
            disable_dir_page: false,
            disable_program_group_page: false,
            disable_ready_page: false,
            disable_finished_page: false,
            wizard_style: "modern".to_string(),
        }
    }
}

manifest_section!(SetupOptions, "Setup", {
    "AppName" => app_name: text,
    "AppVersion" => app_version: text,
    "AppPublisher" => app_publisher: text,
    "AppPublisherURL" => app_publisher_url: text,
    "AppSupportURL" => app_support_url: text,
    "AppUpdatesURL" => app_updates_url: text,
    "DefaultDirName" => default_dir_name: text,
    "DefaultGroupName" => default_group_name: text,
    "OutputDir" => output_dir: text,
    "OutputBaseFilename" => output_base_filename: text,
    "SetupIconFile" => setup_icon_file: text,
    "WizardImageFile" => wizard_image_file: text,
    "WizardSmallImageFile" => wizard_small_image_file: text,
    "Compression" => compression: flag,
    "CompressionLevel" => compression_level: number,
    "SolidCompression" => solid_compression: flag,
    "CreateUninstaller" => create_uninstaller: flag,
    "AllowNoIcons" => allow_no_icons: flag,
    "LicenseFile" => license_file: text,
    "ReadmeFile" => readme_file: text,
    "ShowLicense" => show_license: flag,
    "ShowReadme" => show_readme: flag,
    "UninstallDisplayName" => uninstall_display_name: text,
    "UninstallDisplayIcon" => uninstall_display_icon: text,
    "PrivilegesRequired" => privileges_required: flag,
    "DisableWelcomePage" => disable_welcome_page: flag,
    "DisableDirPage" => disable_dir_page: flag,
    "DisableProgramGroupPage" => disable_program_group_page: flag,
    "DisableReadyPage" => disable_ready_page: flag,
    "DisableFinishedPage" => disable_finished_page: flag,
    "WizardStyle" => wizard_style: text,
});

impl SetupOptions {
    /// File name of the packaged setup executable
    pub fn output_filename(&self) -> String {
        if self.output_base_filename.is_empty() {
            "setup.exe".to_string()
        } else {
            format!("{}.exe", self.output_base_filename)
        }
    }
}

/// A `[Files]` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Literal file, directory (with `Recurse`) or wildcard pattern
    pub source: String,
    pub dest_dir: String,
    /// Optional rename of a single copied file
    pub dest_name: String,
    pub components: String,
    pub tasks: String,
    pub recurse: bool,
    pub flags: String,
}

impl Default for FileEntry {
    fn default() -> Self {
        Self {
            source: String::new(),
            dest_dir: "{app}/Files".to_string(),
            dest_name: String::new(),
            components: String::new(),
            tasks: String::new(),
            recurse: false,
            flags: String::new(),
        }
    }
}

manifest_section!(FileEntry, "Files", {
    "Source" => source: text,
    "DestDir" => dest_dir: text,
    "DestName" => dest_name: text,
    "Components" => components: text,
    "Tasks" => tasks: text,
    "Recurse" => recurse: flag,
    "Flags" => flags: text,
});

impl FileEntry {
    /// Whether `Source` contains wildcard characters
    pub fn is_pattern(&self) -> bool {
        self.source.contains(['*', '?'])
    }
}

/// A `[Dirs]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub components: String,
    pub tasks: String,
}

manifest_section!(DirectoryEntry, "Dirs", {
    "Name" => name: text,
    "Components" => components: text,
    "Tasks" => tasks: text,
});

/// An `[Icons]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IconEntry {
    /// Shortcut path template
    pub name: String,
    /// Shortcut target template
    pub filename: String,
    pub working_dir: String,
    pub parameters: String,
    pub icon_filename: String,
    pub components: String,
    pub tasks: String,
}

manifest_section!(IconEntry, "Icons", {
    "Name" => name: text,
    "Filename" => filename: text,
    "WorkingDir" => working_dir: text,
    "Parameters" => parameters: text,
    "IconFilename" => icon_filename: text,
    "Components" => components: text,
    "Tasks" => tasks: text,
});

/// A `[Registry]` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub root: String,
    pub subkey: String,
    pub value_name: String,
    pub value_type: String,
    pub value_data: String,
    pub components: String,
    pub tasks: String,
    pub flags: String,
}

impl Default for RegistryEntry {
    fn default() -> Self {
        Self {
            root: "HKLM".to_string(),
            subkey: String::new(),
            value_name: String::new(),
            value_type: "string".to_string(),
            value_data: String::new(),
            components: String::new(),
            tasks: String::new(),
            flags: String::new(),
        }
    }
}

manifest_section!(RegistryEntry, "Registry", {
    "Root" => root: text,
    "Subkey" => subkey: text,
    "ValueName" => value_name: text,
    "ValueType" => value_type: text,
    "ValueData" => value_data: text,
    "Components" => components: text,
    "Tasks" => tasks: text,
    "Flags" => flags: text,
});

/// A `[Run]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEntry {
    pub filename: String,
    pub parameters: String,
    pub working_dir: String,
    pub description: String,
    pub flags: String,
    pub components: String,
    pub tasks: String,
}

manifest_section!(RunEntry, "Run", {
    "Filename" => filename: text,
    "Parameters" => parameters: text,
    "WorkingDir" => working_dir: text,
    "Description" => description: text,
    "Flags" => flags: text,
    "Components" => components: text,
    "Tasks" => tasks: text,
});

impl RunEntry {
    /// Entries flagged `postinstall` are offered after setup finishes
    /// instead of being run by the engine.
    pub fn is_post_install(&self) -> bool {
        self.flags.contains("postinstall")
    }
}

/// A `[Components]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentEntry {
    pub name: String,
    pub description: String,
    pub types: String,
    pub fixed: bool,
}

manifest_section!(ComponentEntry, "Components", {
    "Name" => name: text,
    "Description" => description: text,
    "Types" => types: text,
    "Fixed" => fixed: flag,
});

/// A `[Tasks]` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub name: String,
    pub description: String,
    pub components: String,
    pub checked: bool,
}

impl Default for TaskEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            components: String::new(),
            checked: true,
        }
    }
}

manifest_section!(TaskEntry, "Tasks", {
    "Name" => name: text,
    "Description" => description: text,
    "Components" => components: text,
    "Checked" => checked: flag,
});

/// A fully parsed installer manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigModel {
    pub setup: SetupOptions,
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirectoryEntry>,
    pub icons: Vec<IconEntry>,
    pub registry: Vec<RegistryEntry>,
    pub run: Vec<RunEntry>,
    pub components: Vec<ComponentEntry>,
    pub tasks: Vec<TaskEntry>,

    /// Lines of `Setup.LicenseFile`, loaded after parsing
    pub license_text: Vec<String>,

    /// Lines of `Setup.ReadmeFile`, loaded after parsing
    pub readme_text: Vec<String>,
}

impl ConfigModel {
    /// Number of engine steps an install of this model takes
    pub fn total_steps(&self) -> usize {
        self.dirs.len()
            + self.files.len()
            + self.registry.len()
            + self.icons.len()
            + self.run.len()
            + usize::from(self.setup.create_uninstaller)
    }

    /// Write the model back out as manifest text.
    ///
    /// Only fields that differ from their defaults are written. Loaded
    /// license and readme lines are not; they are reloaded from the
    /// referenced files when the text is parsed again.
    pub fn to_manifest_text(&self) -> String {
        let mut out = String::new();

        out.push_str("[Setup]\n");
        let defaults = SetupOptions::default();
        for ((key, value), (_, default)) in self.setup.fields().into_iter().zip(defaults.fields()) {
            if value != default {
                write_pair(&mut out, key, &value);
            }
        }

        write_section(&mut out, &self.files);
        write_section(&mut out, &self.dirs);
        write_section(&mut out, &self.icons);
        write_section(&mut out, &self.registry);
        write_section(&mut out, &self.run);
        write_section(&mut out, &self.components);
        write_section(&mut out, &self.tasks);

        out
    }
}

fn write_section<T: ManifestSection>(out: &mut String, entries: &[T]) {
    if entries.is_empty() {
        return;
    }

    out.push('\n');
    out.push('[');
    out.push_str(T::SECTION);
    out.push_str("]\n");

    let defaults = T::default();
    for entry in entries {
        let fields = entry.fields();

        // The first key written must start a new entry when parsed back.
        let identity = fields
            .iter()
            .filter(|(key, _)| is_boundary_key(key))
            .find(|(_, value)| !value.is_empty_text())
            .or_else(|| fields.iter().find(|(key, _)| is_boundary_key(key)))
            .map(|(key, _)| *key);

        match identity {
            Some(key) => {
                if let Some((_, value)) = fields.iter().find(|(k, _)| *k == key) {
                    write_pair(out, key, value);
                }
            }
            // No boundary key in this table; an empty `Name` is ignored on assignment.
            None => out.push_str("Name=\n"),
        }

        for ((key, value), (_, default)) in fields.iter().zip(defaults.fields()) {
            if Some(*key) == identity {
                continue;
            }
            if is_boundary_key(key) && value.is_empty_text() {
                continue;
            }
            if *value != default {
                write_pair(out, key, value);
            }
        }
    }
}

fn write_pair(out: &mut String, key: &str, value: &FieldValue<'_>) {
    let text = value.to_manifest_value();
    let needs_quotes = text.trim() != text
        || text.ends_with('\\')
        || (text.len() >= 2 && text.starts_with('"') && text.ends_with('"'));

    out.push_str(key);
    out.push('=');
    if needs_quotes {
        out.push('"');
        out.push_str(&text);
        out.push('"');
    } else {
        out.push_str(&text);
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_defaults() {
        let setup = SetupOptions::default();
        assert_eq!(setup.app_name, "Application");
        assert_eq!(setup.app_version, "1.0.0");
        assert_eq!(setup.default_dir_name, "{pf}/MyApp");
        assert_eq!(setup.output_dir, "Output");
        assert!(setup.compression);
        assert_eq!(setup.compression_level, 19);
        assert!(setup.create_uninstaller);
        assert!(setup.show_license);
        assert!(!setup.show_readme);
        assert_eq!(setup.wizard_style, "modern");
    }

    #[test]
    fn test_assign_is_case_insensitive() {
        let mut setup = SetupOptions::default();
        assert!(setup.assign("appname", "Demo"));
        assert!(setup.assign("APPVERSION", "2.1"));
        assert_eq!(setup.app_name, "Demo");
        assert_eq!(setup.app_version, "2.1");
    }

    #[test]
    fn test_flag_coercion() {
        let mut entry = FileEntry::default();
        for truthy in ["yes", "YES", "true", "True", "1"] {
            entry.recurse = false;
            entry.assign("Recurse", truthy);
            assert!(entry.recurse, "{truthy} should be true");
        }
        for falsy in ["no", "0", "on", "y", ""] {
            entry.recurse = true;
            entry.assign("Recurse", falsy);
            assert!(!entry.recurse, "{falsy} should be false");
        }
    }

    #[test]
    fn test_bad_number_keeps_default() {
        let mut setup = SetupOptions::default();
        assert!(!setup.assign("CompressionLevel", "max"));
        assert_eq!(setup.compression_level, 19);

        assert!(setup.assign("CompressionLevel", "3"));
        assert_eq!(setup.compression_level, 3);
    }

    #[test]
    fn test_unknown_key_ignored() {
        let mut entry = RegistryEntry::default();
        assert!(!entry.assign("Name", "anything"));
        assert_eq!(entry, RegistryEntry::default());
    }

    #[test]
    fn test_output_filename() {
        let mut setup = SetupOptions::default();
        assert_eq!(setup.output_filename(), "setup.exe");
        setup.output_base_filename = "demo-installer".to_string();
        assert_eq!(setup.output_filename(), "demo-installer.exe");
        setup.output_base_filename.clear();
        assert_eq!(setup.output_filename(), "setup.exe");
    }

    #[test]
    fn test_total_steps() {
        let mut model = ConfigModel::default();
        assert_eq!(model.total_steps(), 1);

        model.setup.create_uninstaller = false;
        model.files.push(FileEntry::default());
        model.dirs.push(DirectoryEntry::default());
        model.run.push(RunEntry::default());
        assert_eq!(model.total_steps(), 3);
    }

    #[test]
    fn test_manifest_text_quotes_fragile_values() {
        let mut model = ConfigModel::default();
        model.setup.app_publisher = "  padded ".to_string();
        model.setup.app_support_url = "C:\\".to_string();
        let text = model.to_manifest_text();

        assert!(text.contains("AppPublisher=\"  padded \"\n"));
        assert!(text.contains("AppSupportURL=\"C:\\\"\n"));
    }

    #[test]
    fn test_registry_entries_get_separator() {
        let mut model = ConfigModel::default();
        model.registry.push(RegistryEntry {
            subkey: "Software\\Demo".to_string(),
            ..Default::default()
        });
        model.registry.push(RegistryEntry::default());
        let text = model.to_manifest_text();

        assert_eq!(text.matches("Name=\n").count(), 2);
    }

    #[test]
    fn test_post_install_flag() {
        let entry = RunEntry {
            flags: "nowait postinstall skipifsilent".to_string(),
            ..Default::default()
        };
        assert!(entry.is_post_install());
        assert!(!RunEntry::default().is_post_install());
    }
}
