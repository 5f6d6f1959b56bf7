//! Bug reports for failed patch sessions.
//!
//! A [`BugReport`] collects what is needed to reproduce a failure. A [`Reporter`] emits at most
//! one report per session through the `log` facade.

use std::{fmt, path::Path};

use log::error;
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::{
    config::{HookSpec, PatchConfig},
    file::File,
    Result,
};

/// Lowercase hex SHA-1 of `data`
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Lowercase hex SHA-1 of a file's contents.
///
/// # Errors
/// Returns an error if the file cannot be opened or is empty.
pub fn file_sha1(path: &Path) -> Result<String> {
    let file = File::from_file(path)?;
    Ok(sha1_hex(file.data()))
}

/// Everything needed to reproduce a failed patch session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BugReport {
    /// Version of this crate
    pub version: &'static str,
    /// Host image path
    pub image: String,
    /// Loader image path
    pub loader: String,
    /// Hook configuration in effect
    pub hook: HookSpec,
    /// Whether debug diagnostics were enabled
    pub debug: bool,
    /// SHA-1 of the host image, if it could be read
    pub image_sha1: Option<String>,
    /// The error that ended the session
    pub error: String,
}

impl BugReport {
    /// Build a report for `config` and the error that ended the session.
    pub fn new(config: &PatchConfig, error: &crate::Error) -> Self {
        BugReport {
            version: env!("CARGO_PKG_VERSION"),
            image: config.image.display().to_string(),
            loader: config.loader.display().to_string(),
            hook: config.hook.clone(),
            debug: config.debug,
            image_sha1: file_sha1(&config.image).ok(),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for BugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cilhook {} failed: {}", self.version, self.error)?;
        writeln!(f, "  image:  {}", self.image)?;
        writeln!(f, "  sha1:   {}", self.image_sha1.as_deref().unwrap_or("<unreadable>"))?;
        writeln!(f, "  loader: {}", self.loader)?;
        writeln!(
            f,
            "  hook:   {}::{} after '{}'",
            self.hook.hook_type, self.hook.hook_method, self.hook.marker
        )?;
        writeln!(f, "  entry:  {}", self.hook.entry_signature())?;
        write!(f, "  debug:  {}", self.debug)
    }
}

/// Emits at most one bug report.
#[derive(Debug, Default)]
pub struct Reporter {
    reported: bool,
}

impl Reporter {
    /// A reporter that has not reported yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `report` unless one was already logged. Returns `true` only if this call logged it.
    pub fn report(&mut self, report: &BugReport) -> bool {
        if self.reported {
            return false;
        }
        self.reported = true;
        error!("{report}");
        true
    }

    /// True once a report has been emitted
    #[must_use]
    pub fn has_reported(&self) -> bool {
        self.reported
    }
}
