//! Native plugins loaded with `libloading`.

use std::path::Path;

use libloading::{Library, Symbol};
use log::{debug, info};

use crate::loader::{
    ffi::{read_manifest, EntryFn, ManifestFn, MANIFEST_SYMBOL},
    module::{ArgValue, EntryPoint, ModuleLoader, PluginModule},
};

/// Entries of a loaded module together with their functions.
#[derive(Debug)]
struct EntryTable {
    entries: Vec<EntryPoint>,
    functions: Vec<EntryFn>,
}

impl EntryTable {
    fn invoke(&self, index: usize, args: &[ArgValue]) -> std::result::Result<(), String> {
        let Some(function) = self.functions.get(index) else {
            return Err(format!("no entry at index {index}"));
        };
        match function.call(args) {
            0 => Ok(()),
            code => Err(format!("returned {code}")),
        }
    }
}

/// A shared library and its manifest.
///
/// The library stays loaded for as long as the module exists.
pub struct NativeModule {
    table: EntryTable,
    _library: Library,
}

impl PluginModule for NativeModule {
    fn entries(&self) -> &[EntryPoint] {
        &self.table.entries
    }

    fn invoke(&self, index: usize, args: &[ArgValue]) -> std::result::Result<(), String> {
        self.table.invoke(index, args)
    }
}

/// Loads plugins as shared libraries exporting `cilhook_plugin_manifest`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    /// A native loader
    #[must_use]
    pub fn new() -> Self {
        NativeLoader
    }

    /// Load `path` and read its manifest.
    ///
    /// # Errors
    /// Returns a description if the library cannot be loaded, does not export a manifest, or
    /// the manifest is invalid or of another ABI major version.
    pub fn load_native(&self, path: &Path) -> std::result::Result<NativeModule, String> {
        debug!("Loading native plugin {}", path.display());

        let library = unsafe { Library::new(path) }
            .map_err(|e| format!("failed to load library: {e}"))?;

        let table = {
            let manifest_fn: Symbol<ManifestFn> = unsafe { library.get(MANIFEST_SYMBOL) }
                .map_err(|e| format!("failed to find manifest: {e}"))?;

            let manifest = unsafe { manifest_fn() };
            if manifest.is_null() {
                return Err("manifest function returned null".to_string());
            }

            let (entries, functions): (Vec<_>, Vec<_>) =
                unsafe { read_manifest(&*manifest) }?.into_iter().unzip();
            EntryTable { entries, functions }
        };

        info!(
            "Loaded {} with {} entr{}",
            path.display(),
            table.entries.len(),
            if table.entries.len() == 1 { "y" } else { "ies" }
        );
        Ok(NativeModule {
            table,
            _library: library,
        })
    }
}

impl ModuleLoader for NativeLoader {
    fn load(&self, path: &Path) -> std::result::Result<Box<dyn PluginModule>, String> {
        self.load_native(path)
            .map(|module| Box::new(module) as Box<dyn PluginModule>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_library() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(libloading::library_filename("absent"));
        let Err(error) = NativeLoader::new().load(&path) else {
            panic!("loading a missing library must fail");
        };
        assert!(error.starts_with("failed to load library"));
    }

    #[test]
    fn not_a_library() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(libloading::library_filename("garbage"));
        std::fs::write(&path, b"definitely not an object file").unwrap();
        assert!(NativeLoader::new().load(&path).is_err());
    }

    #[test]
    fn table_reports_codes() {
        extern "C" fn ok() -> i32 {
            0
        }
        extern "C" fn fails() -> i32 {
            3
        }
        let table = EntryTable {
            entries: vec![
                EntryPoint::new("T", "Ok", vec![]),
                EntryPoint::new("T", "Fails", vec![]),
            ],
            functions: vec![EntryFn::NoArgs(ok), EntryFn::NoArgs(fails)],
        };
        assert!(table.invoke(0, &[]).is_ok());
        assert_eq!(table.invoke(1, &[]).unwrap_err(), "returned 3");
        assert!(table.invoke(2, &[]).is_err());
    }
}
