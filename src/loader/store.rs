//! The persisted, self-healing load order.
//!
//! The store is a small JSON document kept next to the plugins:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "entries": [
//!     { "fileName": "alpha.dll", "sequence": 1, "externalVersion": "untracked" }
//!   ]
//! }
//! ```
//!
//! Entry order is the invocation order. [`LoadOrderStore::load`] never fails: a missing file is
//! created, a corrupt one is replaced, and if even the replacement cannot be read back an
//! in-memory default is used. [`LoadOrderStore::reconcile`] prunes vanished plugins and appends
//! new ones behind the existing entries.

use std::{
    collections::HashSet,
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{Error, Result, WriteCause};

/// The only schema revision understood
pub const SCHEMA_VERSION: u32 = 1;

/// `externalVersion` of records the loader appended itself
pub const UNTRACKED_VERSION: &str = "untracked";

/// One plugin in the load order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderRecord {
    /// Plugin file name inside the plugin directory
    pub file_name: String,
    /// Internal sequence number, unique within a store
    pub sequence: u64,
    /// Version string maintained by external tools
    pub external_version: String,
}

/// The load order document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderStore {
    schema_version: u32,
    entries: Vec<LoadOrderRecord>,
}

impl Default for LoadOrderStore {
    fn default() -> Self {
        LoadOrderStore {
            schema_version: SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

/// Which branch of the read protocol produced a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoadStatus {
    /// No file existed; a default was created
    #[strum(serialize = "created")]
    Created,
    /// The file was valid
    #[strum(serialize = "loaded")]
    Loaded,
    /// The file was corrupt and has been replaced by a default
    #[strum(serialize = "regenerated")]
    Regenerated,
    /// The replacement could not be read back; the store lives in memory only
    #[strum(serialize = "in-memory fallback")]
    InMemoryFallback,
}

/// Result of [`LoadOrderStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    /// The store
    pub store: LoadOrderStore,
    /// How it was obtained
    pub status: LoadStatus,
}

/// What [`LoadOrderStore::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Records that survived
    pub kept: usize,
    /// File names removed because they vanished
    pub pruned: Vec<String>,
    /// File names appended
    pub added: Vec<String>,
}

impl ReconcileSummary {
    /// True if the store was modified
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.pruned.is_empty() || !self.added.is_empty()
    }
}

impl LoadOrderStore {
    /// An empty store of the current schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema revision
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Records in invocation order
    #[must_use]
    pub fn entries(&self) -> &[LoadOrderRecord] {
        &self.entries
    }

    /// File names in invocation order
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|record| record.file_name.as_str())
    }

    /// Parse a store document.
    ///
    /// Duplicate file names are collapsed to their first occurrence.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for invalid JSON or an unknown schema version.
    pub fn parse(text: &str) -> Result<Self> {
        let mut store: LoadOrderStore = serde_json::from_str(text)
            .map_err(|error| malformed_error!("Invalid load order document - {}", error))?;

        if store.schema_version != SCHEMA_VERSION {
            return Err(malformed_error!(
                "Unknown load order schema version {}",
                store.schema_version
            ));
        }

        let mut seen = HashSet::new();
        let before = store.entries.len();
        store
            .entries
            .retain(|record| seen.insert(record.file_name.clone()));
        if store.entries.len() != before {
            warn!(
                "Dropped {} duplicate load order record(s)",
                before - store.entries.len()
            );
        }

        Ok(store)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Load the store at `path`, healing it if necessary.
    pub fn load(path: &Path) -> Loaded {
        if !path.exists() {
            let store = Self::default();
            if let Err(error) = store.save(path) {
                warn!("Could not create {}: {}", path.display(), error);
            }
            info!("Created load order {}", path.display());
            return Loaded {
                store,
                status: LoadStatus::Created,
            };
        }

        let corruption = match Self::read(path) {
            Ok(store) => {
                return Loaded {
                    store,
                    status: LoadStatus::Loaded,
                }
            }
            Err(error) => error,
        };

        warn!(
            "Load order {} is corrupt, regenerating: {}",
            path.display(),
            corruption
        );
        if let Err(error) = std::fs::remove_file(path) {
            warn!("Could not delete {}: {}", path.display(), error);
        }
        if let Err(error) = Self::default().save(path) {
            warn!("Could not rewrite {}: {}", path.display(), error);
        }

        match Self::read(path) {
            Ok(store) => Loaded {
                store,
                status: LoadStatus::Regenerated,
            },
            Err(error) => {
                error!(
                    "Load order {} unusable after regeneration, continuing in memory: {}",
                    path.display(),
                    error
                );
                Loaded {
                    store: Self::default(),
                    status: LoadStatus::InMemoryFallback,
                }
            }
        }
    }

    /// Write the store to `path` as pretty JSON.
    ///
    /// If the overwrite fails and `path` is an existing empty file, the payload is appended
    /// to it once instead.
    ///
    /// # Errors
    /// Returns [`Error::Write`] with the categorized cause of the failed overwrite.
    pub fn save(&self, path: &Path) -> Result<()> {
        let payload =
            serde_json::to_vec_pretty(self).map_err(|error| Error::serialization(path, error))?;

        let failure = match std::fs::write(path, &payload) {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };
        warn!(
            "Writing {} failed ({}): {}",
            path.display(),
            WriteCause::from_io(&failure),
            failure
        );

        append_if_empty(path, &payload, failure)
    }

    /// Bring the store in line with the plugins in the directory.
    ///
    /// Records whose file is not in `discovered` are dropped. Discovered names without a
    /// record are appended in the given order with fresh sequence numbers, counting on from the
    /// highest number present before pruning. Matching is exact and case-sensitive.
    pub fn reconcile(&mut self, discovered: &[String]) -> ReconcileSummary {
        let present: HashSet<&str> = discovered.iter().map(String::as_str).collect();
        let highest = self
            .entries
            .iter()
            .map(|record| record.sequence)
            .max()
            .unwrap_or(0);

        let (kept, vanished): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|record| present.contains(record.file_name.as_str()));
        self.entries = kept;

        let headroom = u64::try_from(discovered.len()).unwrap_or(u64::MAX);
        let mut next = match highest.checked_add(1) {
            Some(next) if next.checked_add(headroom).is_some() => next,
            _ => self.renumber(),
        };

        let mut known: HashSet<String> = self.file_names().map(str::to_string).collect();
        let mut summary = ReconcileSummary {
            kept: self.entries.len(),
            pruned: vanished.into_iter().map(|record| record.file_name).collect(),
            added: Vec::new(),
        };

        for file_name in discovered {
            if !known.insert(file_name.clone()) {
                continue;
            }
            self.entries.push(LoadOrderRecord {
                file_name: file_name.clone(),
                sequence: next,
                external_version: UNTRACKED_VERSION.to_string(),
            });
            next += 1;
            summary.added.push(file_name.clone());
        }

        if summary.changed() {
            info!(
                "Load order: {} kept, {} pruned, {} added",
                summary.kept,
                summary.pruned.len(),
                summary.added.len()
            );
        }
        summary
    }

    /// Number the records `1..=n` in their current order and return `n + 1`.
    fn renumber(&mut self) -> u64 {
        warn!("Load order sequence numbers exhausted, renumbering");
        let mut next = 1;
        for record in &mut self.entries {
            record.sequence = next;
            next += 1;
        }
        next
    }

    /// [`reconcile`](Self::reconcile) and [`save`](Self::save).
    ///
    /// # Errors
    /// Returns the save error; the in-memory store is reconciled either way.
    pub fn reconcile_and_save(
        &mut self,
        discovered: &[String],
        path: &Path,
    ) -> Result<ReconcileSummary> {
        let summary = self.reconcile(discovered);
        self.save(path)?;
        Ok(summary)
    }
}

/// Emergency fallback after a failed overwrite: append `payload` if `path` is an existing
/// zero-length file, otherwise report `failure`.
fn append_if_empty(path: &Path, payload: &[u8], failure: io::Error) -> Result<()> {
    let empty = std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() == 0);
    if empty {
        let appended = OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(payload));
        match appended {
            Ok(()) => {
                info!("Appended load order to empty {}", path.display());
                return Ok(());
            }
            Err(error) => warn!("Append fallback for {} failed: {}", path.display(), error),
        }
    }

    Err(Error::write(path, failure))
}
