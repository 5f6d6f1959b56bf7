//! Method definitions, bodies and exception clauses.
//!
//! # Key Components
//!
//! - [`MethodDef`] - A method row: name, attributes, declaring type, signature and body
//! - [`MethodBody`] - Decoded header, instructions and exception handlers
//! - [`ExceptionHandler`] - Protected regions as instruction-index ranges

mod body;
mod exceptions;
mod types;

pub use body::{MethodBody, TINY_MAX_CODE_SIZE, TINY_MAX_STACK};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::*;

use crate::metadata::signature::MethodSig;

/// A row of the `MethodDef` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Zero-based index of the declaring type
    pub declaring_type: usize,
    /// Method signature
    pub signature: MethodSig,
    /// Method body, `None` for abstract and extern methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Build a method definition.
    pub fn new(
        name: impl Into<String>,
        flags: MethodAttributes,
        declaring_type: usize,
        signature: MethodSig,
        body: Option<MethodBody>,
    ) -> Self {
        MethodDef {
            name: name.into(),
            flags,
            declaring_type,
            signature,
            body,
        }
    }

    /// True if the method is static
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    /// Number of instructions, 0 without a body
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.body.as_ref().map_or(0, |body| body.instructions.len())
    }
}
