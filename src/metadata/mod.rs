//! Metadata model of a compiled module.
//!
//! # Key Components
//!
//! - [`token`] - Metadata table row references used by instruction operands
//! - [`typedef`] - Type definitions, including nesting
//! - [`method`] - Method definitions and bodies
//! - [`memberref`] - References to methods in other modules
//! - [`signature`] - Method signatures and their fully-qualified rendering
//! - [`identity`] - Assembly identities scoping references into other assemblies
//!
//! The tables themselves live in [`crate::image::Image`].

/// Assembly names, versions and public key tokens
pub mod identity;
/// Implementation of member references
pub mod memberref;
/// Implementation of method definitions and bodies
pub mod method;
/// Implementation of method signatures
pub mod signature;
/// Implementation of metadata tokens
pub mod token;
/// Implementation of type definitions
pub mod typedef;
