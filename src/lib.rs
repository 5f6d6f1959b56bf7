// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'loader/native.rs' loads shared libraries and calls through their manifest

//! # cilhook
//!
//! Patches a compiled CIL image so that a host program transfers control once into an external
//! loader routine during its startup, and provides that loader routine: a plugin directory
//! scanner, a self-healing persisted load order and a per-plugin isolated dispatcher.
//!
//! ## Two halves
//!
//! - **Install time** - [`patch::PatchSession`] runs once against the host image:
//!   injection check, backup, hook point location, single call insertion, write, re-verification.
//! - **Every host start** - [`loader::startup::run`] scans the plugin directory, loads and
//!   reconciles the [`loader::LoadOrderStore`], saves it and dispatches every plugin in order.
//!
//! ## Patching an image
//!
//! ```rust,no_run
//! use cilhook::prelude::*;
//!
//! let config = PatchConfig::new("Game/Assembly-CSharp.dll", "Game/CilHook.dll");
//! match PatchSession::new(config).run()? {
//!     PatchOutcome::Injected(summary) => {
//!         println!("hook inserted at {} in {}", summary.position, summary.method);
//!     }
//!     PatchOutcome::AlreadyInjected => println!("image already carries the hook"),
//! }
//! # Ok::<(), cilhook::Error>(())
//! ```
//!
//! ## Working with the instruction model
//!
//! ```rust,no_run
//! use cilhook::prelude::*;
//!
//! let image = Image::from_file("Game/Assembly-CSharp.dll".as_ref())?;
//! for (index, method) in image.methods().iter().enumerate() {
//!     if let Some(body) = &method.body {
//!         println!("{} ({} instructions)", image.method_full_name(index), body.instructions.len());
//!     }
//! }
//! # Ok::<(), cilhook::Error>(())
//! ```
//!
//! ## Running the loader
//!
//! ```rust,no_run
//! use cilhook::prelude::*;
//!
//! let config = LoaderConfig::for_base_dir(std::env::current_dir()?);
//! let report = cilhook::loader::startup::run(&config, &NativeLoader::new(), &[])?;
//! println!("{} plugin(s) dispatched", report.dispatch.plugins.len());
//! # Ok::<(), cilhook::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`] with [`Error`]. Plugin failures never surface as
//! an [`Error`]; they are collected per plugin in [`loader::DispatchReport`].

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// JSON backed configuration for the patcher and the loader.
pub mod config;

/// Bug report rendering and image digests.
pub mod diagnostics;

/// CIL instruction model, opcode table, decoder and encoder.
pub mod disassembler;

/// Tokens, type and method definitions, member references and method bodies.
pub mod metadata;

/// The in-memory image and its PE/CLI assembly reader and writer.
pub mod image;

/// Hook point location, injection detection, patch application and backups.
pub mod patch;

/// Plugin scanning, load order persistence and dispatch.
pub mod loader;

/// `cilhook` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`]. This is used consistently throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// `cilhook` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the full list of
/// variants and when each is produced.
pub use error::{Error, LocateError, PluginError, WriteCause};

/// Low-level byte cursor used by the image reader and the instruction decoder.
pub use file::{parser::Parser, File};
