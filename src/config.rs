//! Configuration for patch sessions and the plugin loader.
//!
//! All types deserialize from camelCase JSON, and every field has a default, so a configuration
//! file only needs to name what it changes:
//!
//! ```json
//! { "hookType": "Boot.Main", "hookMethod": "Start", "marker": "Initialize" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{loader::EntryQuery, metadata::signature::MethodSig, Error, Result};

/// File name of the optional loader configuration inside the base directory
pub const LOADER_CONFIG_FILE: &str = "cilhook.json";

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|error| Error::Config(format!("{}: {}", path.display(), error)))
}

/// Where to hook and what to inject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSpec {
    /// Full name of the type holding the hook method
    pub hook_type: String,
    /// Name of the hook method
    pub hook_method: String,
    /// Fragment of the callee name after which the entry call is inserted
    pub marker: String,
    /// Full name of the entry type in the loader image
    pub entry_type: String,
    /// Name of the entry method
    pub entry_method: String,
    /// Name fragments identifying a compiler-generated iterator type
    pub iterator_markers: Vec<String>,
    /// Name of the iterator state machine's step method
    pub step_method: String,
}

impl Default for HookSpec {
    fn default() -> Self {
        HookSpec {
            hook_type: "GameManager".to_string(),
            hook_method: "Awake".to_string(),
            marker: "DontDestroyOnLoad".to_string(),
            entry_type: "CilHook.ModLoader".to_string(),
            entry_method: "Init".to_string(),
            iterator_markers: vec!["Iterator".to_string(), "d__".to_string()],
            step_method: "MoveNext".to_string(),
        }
    }
}

impl HookSpec {
    /// Load a hook spec from a JSON file; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read and [`Error::Config`] if it is
    /// not valid JSON for this type.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Signature the entry method must have
    #[must_use]
    pub fn entry_sig(&self) -> MethodSig {
        MethodSig::void_static()
    }

    /// `System.Void <EntryType>::<EntryMethod>()`, the exact form injected and detected
    #[must_use]
    pub fn entry_signature(&self) -> String {
        self.entry_sig().full_name(&self.entry_type, &self.entry_method)
    }
}

/// Inputs of a patch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchConfig {
    /// The host image to patch
    pub image: PathBuf,
    /// The image defining the entry method
    pub loader: PathBuf,
    /// Hook location and entry method
    #[serde(default)]
    pub hook: HookSpec,
    /// Emit debug diagnostics
    #[serde(default)]
    pub debug: bool,
    /// Appended to the image path to name the backup
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
}

fn default_backup_suffix() -> String {
    ".orig".to_string()
}

impl PatchConfig {
    /// A configuration with the default hook spec.
    pub fn new(image: impl Into<PathBuf>, loader: impl Into<PathBuf>) -> Self {
        PatchConfig {
            image: image.into(),
            loader: loader.into(),
            hook: HookSpec::default(),
            debug: false,
            backup_suffix: default_backup_suffix(),
        }
    }

    /// Load a session configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read and [`Error::Config`] if it is
    /// invalid, including a missing `image` or `loader`.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Replace the hook spec
    #[must_use]
    pub fn with_hook(mut self, hook: HookSpec) -> Self {
        self.hook = hook;
        self
    }

    /// Set the debug flag
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Path of the backup file
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.image.as_os_str().to_owned();
        name.push(&self.backup_suffix);
        PathBuf::from(name)
    }
}

/// Settings of the plugin loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderConfig {
    /// Base directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Plugin directory, relative to the base directory unless absolute
    pub plugin_dir: PathBuf,
    /// Load-order store file name inside the plugin directory
    pub store_file: String,
    /// Name of the entry method every plugin exports
    pub entry_method: String,
    /// Restrict entry resolution to this declaring type
    pub entry_type: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            base_dir: PathBuf::new(),
            plugin_dir: PathBuf::from("Mods"),
            store_file: "loadorder.json".to_string(),
            entry_method: "Init".to_string(),
            entry_type: None,
        }
    }
}

impl LoaderConfig {
    /// Default settings rooted at `base`.
    pub fn for_base_dir(base: impl Into<PathBuf>) -> Self {
        LoaderConfig {
            base_dir: base.into(),
            ..Self::default()
        }
    }

    /// Load settings from a JSON file, rooted at `base`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read and [`Error::Config`] if it is
    /// invalid.
    pub fn from_file(path: &Path, base: impl Into<PathBuf>) -> Result<Self> {
        let mut config: LoaderConfig = read_json(path)?;
        config.base_dir = base.into();
        Ok(config)
    }

    /// Settings for `base`: `base/cilhook.json` if present, the defaults otherwise.
    ///
    /// # Errors
    /// Returns an error if the configuration file exists but cannot be loaded.
    pub fn discover(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let path = base.join(LOADER_CONFIG_FILE);
        if path.is_file() {
            Self::from_file(&path, base)
        } else {
            Ok(Self::for_base_dir(base))
        }
    }

    /// Resolved plugin directory
    #[must_use]
    pub fn plugin_path(&self) -> PathBuf {
        self.base_dir.join(&self.plugin_dir)
    }

    /// Resolved load-order store path
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.plugin_path().join(&self.store_file)
    }

    /// The entry query used to resolve plugin entry points
    #[must_use]
    pub fn entry_query(&self) -> EntryQuery {
        EntryQuery::new(&self.entry_method, self.entry_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hook_defaults() {
        let spec = HookSpec::default();
        assert_eq!(spec.entry_signature(), "System.Void CilHook.ModLoader::Init()");
        assert_eq!(spec.iterator_markers, vec!["Iterator", "d__"]);
    }

    #[test]
    fn partial_hook_json() {
        let spec: HookSpec =
            serde_json::from_str(r#"{ "hookType": "Boot.Main", "marker": "Init" }"#).unwrap();
        assert_eq!(spec.hook_type, "Boot.Main");
        assert_eq!(spec.marker, "Init");
        assert_eq!(spec.hook_method, "Awake");
        assert_eq!(spec.step_method, "MoveNext");
    }

    #[test]
    fn patch_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patch.json");
        std::fs::write(
            &path,
            r#"{ "image": "a.dll", "loader": "b.dll", "debug": true, "hook": { "hookMethod": "Start" } }"#,
        )
        .unwrap();

        let config = PatchConfig::from_file(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.hook.hook_method, "Start");
        assert_eq!(config.backup_suffix, ".orig");
        assert_eq!(config.backup_path(), PathBuf::from("a.dll.orig"));

        std::fs::write(&path, r#"{ "loader": "b.dll" }"#).unwrap();
        assert!(matches!(PatchConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn loader_paths() {
        let config = LoaderConfig::for_base_dir("/game");
        assert_eq!(config.plugin_path(), PathBuf::from("/game/Mods"));
        assert_eq!(config.store_path(), PathBuf::from("/game/Mods/loadorder.json"));
    }

    #[test]
    fn loader_discover() {
        let dir = tempdir().unwrap();
        let config = LoaderConfig::discover(dir.path()).unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("Mods"));

        std::fs::write(
            dir.path().join(LOADER_CONFIG_FILE),
            r#"{ "pluginDir": "Plugins", "entryType": "My.Entry" }"#,
        )
        .unwrap();
        let config = LoaderConfig::discover(dir.path()).unwrap();
        assert_eq!(config.plugin_path(), dir.path().join("Plugins"));
        assert_eq!(config.entry_type.as_deref(), Some("My.Entry"));
        assert_eq!(config.entry_method, "Init");
    }
}
