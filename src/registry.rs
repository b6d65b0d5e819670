//! Registration Store
//!
//! Persistent key/value registration used for uninstall entries and
//! `[Registry]` manifest entries. The engine only sees the
//! [`RegistryStore`] trait.

use crate::error::CapabilityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Top-level hive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegistryRoot {
    LocalMachine,
    CurrentUser,
    ClassesRoot,
    Users,
    CurrentConfig,
}

impl RegistryRoot {
    /// Parse a manifest `Root` value. Unknown names map to local machine.
    pub fn from_manifest(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "HKCU" | "HKEY_CURRENT_USER" => RegistryRoot::CurrentUser,
            "HKCR" | "HKEY_CLASSES_ROOT" => RegistryRoot::ClassesRoot,
            "HKU" | "HKEY_USERS" => RegistryRoot::Users,
            "HKCC" | "HKEY_CURRENT_CONFIG" => RegistryRoot::CurrentConfig,
            _ => RegistryRoot::LocalMachine,
        }
    }
}

/// Kind of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    ExpandString,
    MultiString,
    Dword,
    Qword,
    Binary,
}

impl ValueKind {
    /// Parse a manifest `ValueType`. Unknown kinds map to string.
    pub fn from_manifest(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "expandsz" => ValueKind::ExpandString,
            "multisz" => ValueKind::MultiString,
            "dword" => ValueKind::Dword,
            "qword" => ValueKind::Qword,
            "binary" => ValueKind::Binary,
            _ => ValueKind::String,
        }
    }
}

/// A typed value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RegistryValue {
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    Dword(u32),
    Qword(u64),
    /// Hex encoded on disk
    Binary(#[serde(with = "hex_bytes")] Vec<u8>),
}

impl RegistryValue {
    /// Coerce manifest text into a value of `kind`.
    ///
    /// Numbers are decimal, binary data is hex (whitespace ignored) and
    /// multi-string items are separated by `{break}`.
    pub fn coerce(kind: ValueKind, data: &str) -> Result<Self, CapabilityError> {
        let invalid = |what: &str| CapabilityError::Other(format!("invalid {} value: {:?}", what, data));

        Ok(match kind {
            ValueKind::String => RegistryValue::String(data.to_string()),
            ValueKind::ExpandString => RegistryValue::ExpandString(data.to_string()),
            ValueKind::MultiString => {
                RegistryValue::MultiString(data.split("{break}").map(String::from).collect())
            }
            ValueKind::Dword => RegistryValue::Dword(data.trim().parse().map_err(|_| invalid("dword"))?),
            ValueKind::Qword => RegistryValue::Qword(data.trim().parse().map_err(|_| invalid("qword"))?),
            ValueKind::Binary => {
                let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
                RegistryValue::Binary(hex::decode(compact).map_err(|_| invalid("binary"))?)
            }
        })
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            RegistryValue::String(_) => ValueKind::String,
            RegistryValue::ExpandString(_) => ValueKind::ExpandString,
            RegistryValue::MultiString(_) => ValueKind::MultiString,
            RegistryValue::Dword(_) => ValueKind::Dword,
            RegistryValue::Qword(_) => ValueKind::Qword,
            RegistryValue::Binary(_) => ValueKind::Binary,
        }
    }

    /// String content, for string-like kinds
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryValue::String(s) | RegistryValue::ExpandString(s) => Some(s),
            _ => None,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// Registration capability used by the engine and the uninstaller
pub trait RegistryStore: Send + Sync {
    fn set_value(
        &self,
        root: RegistryRoot,
        subkey: &str,
        name: &str,
        value: RegistryValue,
    ) -> Result<(), CapabilityError>;

    fn get_value(
        &self,
        root: RegistryRoot,
        subkey: &str,
        name: &str,
    ) -> Result<Option<RegistryValue>, CapabilityError>;

    /// Remove a key and every value and subkey below it
    fn delete_key(&self, root: RegistryRoot, subkey: &str) -> Result<(), CapabilityError>;
}

/// Subkey → value name → value
type Hive = BTreeMap<String, BTreeMap<String, RegistryValue>>;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    #[serde(default)]
    hives: BTreeMap<RegistryRoot, Hive>,
}

impl Tree {
    fn set(&mut self, root: RegistryRoot, subkey: &str, name: &str, value: RegistryValue) {
        self.hives
            .entry(root)
            .or_default()
            .entry(normalize_key(subkey))
            .or_default()
            .insert(name.to_string(), value);
    }

    fn get(&self, root: RegistryRoot, subkey: &str, name: &str) -> Option<RegistryValue> {
        self.hives
            .get(&root)?
            .get(&normalize_key(subkey))?
            .get(name)
            .cloned()
    }

    fn delete(&mut self, root: RegistryRoot, subkey: &str) {
        let key = normalize_key(subkey);
        let prefix = format!("{}\\", key);
        if let Some(hive) = self.hives.get_mut(&root) {
            hive.retain(|k, _| k != &key && !k.starts_with(&prefix));
        }
    }
}

/// Keys compare case-insensitively with `\` separators
fn normalize_key(subkey: &str) -> String {
    subkey
        .replace('/', "\\")
        .trim_matches('\\')
        .to_ascii_lowercase()
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    tree: Mutex<Tree>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CapabilityError {
    CapabilityError::Other("registry lock poisoned".to_string())
}

impl RegistryStore for MemoryRegistry {
    fn set_value(
        &self,
        root: RegistryRoot,
        subkey: &str,
        name: &str,
        value: RegistryValue,
    ) -> Result<(), CapabilityError> {
        self.tree.lock().map_err(|_| poisoned())?.set(root, subkey, name, value);
        Ok(())
    }

    fn get_value(
        &self,
        root: RegistryRoot,
        subkey: &str,
        name: &str,
    ) -> Result<Option<RegistryValue>, CapabilityError> {
        Ok(self.tree.lock().map_err(|_| poisoned())?.get(root, subkey, name))
    }

    fn delete_key(&self, root: RegistryRoot, subkey: &str) -> Result<(), CapabilityError> {
        self.tree.lock().map_err(|_| poisoned())?.delete(root, subkey);
        Ok(())
    }
}

/// Store persisted as JSON, re-read on every call so separate processes
/// (setup and uninstaller) see each other's writes.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistry {
    pub const FILE_NAME: &'static str = "registry.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The per-user store (`~/.local/share/uniinst/registry.json`)
    pub fn user_default() -> Option<Self> {
        crate::paths::user::uniinst_dir().map(|dir| Self::new(dir.join(Self::FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Tree, CapabilityError> {
        if !self.path.exists() {
            return Ok(Tree::default());
        }
        let json = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save(&self, tree: &Tree) -> Result<(), CapabilityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(tree)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn update(&self, change: impl FnOnce(&mut Tree)) -> Result<(), CapabilityError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut tree = self.load()?;
        change(&mut tree);
        self.save(&tree)
    }
}

impl RegistryStore for FileRegistry {
    fn set_value(
        &self,
        root: RegistryRoot,
        subkey: &str,
        name: &str,
        value: RegistryValue,
    ) -> Result<(), CapabilityError> {
        self.update(|tree| tree.set(root, subkey, name, value))
    }

    fn get_value(
        &self,
        root: RegistryRoot,
        subkey: &str,
        name: &str,
    ) -> Result<Option<RegistryValue>, CapabilityError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Ok(self.load()?.get(root, subkey, name))
    }

    fn delete_key(&self, root: RegistryRoot, subkey: &str) -> Result<(), CapabilityError> {
        self.update(|tree| tree.delete(root, subkey))
    }
}
