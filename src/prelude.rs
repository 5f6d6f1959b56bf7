//! # cilhook Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the cilhook
//! library. Import it to patch an image or run the plugin loader without spelling out module
//! paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilhook operations
pub use crate::Error;

/// The result type used throughout cilhook
pub use crate::Result;

/// Per-plugin and hook location failures
pub use crate::{LocateError, PluginError};

// ================================================================================================
// Configuration
// ================================================================================================

/// Patcher and loader settings
pub use crate::config::{HookSpec, LoaderConfig, PatchConfig};

// ================================================================================================
// Image and Instruction Model
// ================================================================================================

/// In-memory CIL image
pub use crate::image::Image;

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Methods, bodies and signatures
pub use crate::metadata::{
    method::{MethodBody, MethodDef},
    signature::MethodSig,
};

/// Instructions and operands
pub use crate::disassembler::{Instruction, Operand};

// ================================================================================================
// Patching
// ================================================================================================

/// Install-time patch session
pub use crate::patch::{HookPoint, PatchOutcome, PatchSession, PatchSummary};

// ================================================================================================
// Plugin Loading
// ================================================================================================

/// Load order and dispatch
pub use crate::loader::{
    ArgValue, DispatchReport, Dispatcher, EntryQuery, LoadOrderStore, LoadStatus, ModuleLoader,
    NativeLoader, PluginModule,
};
