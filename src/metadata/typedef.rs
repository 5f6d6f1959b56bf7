//! Type definitions.

use crate::metadata::method::TypeAttributes;

/// A row of the `TypeDef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Namespace, empty for nested types and the global namespace
    pub namespace: String,
    /// Simple name, including generic arity (e.g. `List`1`)
    pub name: String,
    /// Type attributes
    pub flags: TypeAttributes,
    /// Zero-based index of the enclosing type, for nested types
    pub enclosing: Option<usize>,
}

impl TypeDef {
    /// A top-level public type.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            namespace: namespace.into(),
            name: name.into(),
            flags: TypeAttributes::PUBLIC,
            enclosing: None,
        }
    }

    /// A type nested inside the type at `enclosing`.
    pub fn nested(name: impl Into<String>, enclosing: usize) -> Self {
        TypeDef {
            namespace: String::new(),
            name: name.into(),
            flags: TypeAttributes::NESTED_PRIVATE | TypeAttributes::SEALED,
            enclosing: Some(enclosing),
        }
    }

    /// `Namespace.Name`, or just `Name` in the global namespace
    #[must_use]
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// True if this type is nested in another
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.enclosing.is_some()
    }
}
