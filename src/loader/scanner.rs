//! Plugin directory scanning.

use std::{
    env::consts::DLL_EXTENSION,
    path::{Path, PathBuf},
};

use log::debug;

use crate::Result;

/// Library name of the loader itself
pub const LOADER_LIBRARY: &str = "cilhook";
/// Library name of the hook runtime shipped next to the loader
pub const HOOK_RUNTIME_LIBRARY: &str = "cilhook_runtime";

/// File names that are never treated as plugins.
#[must_use]
pub fn reserved_names() -> [String; 2] {
    [LOADER_LIBRARY, HOOK_RUNTIME_LIBRARY]
        .map(|name| libloading::library_filename(name).to_string_lossy().into_owned())
}

/// True if `file_name` is one of the [`reserved_names`], ignoring case.
#[must_use]
pub fn is_reserved(file_name: &str) -> bool {
    reserved_names()
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(file_name))
}

/// True if `path` has the platform's dynamic library extension, ignoring case.
#[must_use]
pub fn has_plugin_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case(DLL_EXTENSION))
}

/// File names of the plugin candidates in `dir`, sorted.
///
/// Only regular files with the dynamic library extension are returned, minus the reserved
/// names. Names that are not valid UTF-8 are skipped.
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the directory cannot be read.
pub fn scan(dir: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path: PathBuf = entry?.path();
        if !path.is_file() || !has_plugin_extension(&path) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            debug!("Skipping non UTF-8 file name {}", path.display());
            continue;
        };
        if is_reserved(file_name) {
            debug!("Skipping reserved {file_name}");
            continue;
        }
        found.push(file_name.to_string());
    }

    found.sort();
    debug!("Found {} plugin candidate(s) in {}", found.len(), dir.display());
    Ok(found)
}
