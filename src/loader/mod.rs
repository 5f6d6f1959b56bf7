//! The plugin loader run on every host start.
//!
//! # Key Components
//!
//! - [`scanner`] - Enumerates plugin candidates, excluding the reserved infrastructure libraries
//! - [`LoadOrderStore`] - Persisted, self-healing invocation order
//! - [`Dispatcher`] - Loads each plugin and invokes its entry points in isolation
//! - [`NativeLoader`] - Loads shared libraries through their exported manifest
//! - [`startup`] - The whole sequence, and the `cilhook_init` export
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use cilhook::loader::{scan, Dispatcher, EntryQuery, LoadOrderStore, NativeLoader};
//!
//! let dir = Path::new("Game/Mods");
//! let discovered = scan(dir)?;
//! let mut loaded = LoadOrderStore::load(&dir.join("loadorder.json"));
//! loaded.store.reconcile_and_save(&discovered, &dir.join("loadorder.json"))?;
//!
//! let report = Dispatcher::new(EntryQuery::new("Init", None), vec![])
//!     .dispatch(&NativeLoader::new(), &loaded.store, dir);
//! println!("{} entries invoked", report.invoked_count());
//! # Ok::<(), cilhook::Error>(())
//! ```

mod dispatch;
pub mod ffi;
mod module;
mod native;
pub mod scanner;
mod store;
pub mod startup;

pub use dispatch::{DispatchReport, Dispatcher, PluginReport};
pub use module::{ArgValue, EntryFlags, EntryPoint, EntryQuery, ModuleLoader, ParamKind, PluginModule};
pub use native::{NativeLoader, NativeModule};
pub use scanner::{is_reserved, reserved_names, scan};
pub use startup::StartupReport;
pub use store::{
    LoadOrderRecord, LoadOrderStore, LoadStatus, Loaded, ReconcileSummary, SCHEMA_VERSION,
    UNTRACKED_VERSION,
};
