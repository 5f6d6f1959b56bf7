//! References to methods defined in other modules.

use crate::metadata::{identity::AssemblyIdentity, signature::MethodSig};

/// A row of the `MemberRef` table, referencing a method by declaring type, name and signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Fully-qualified name of the declaring type
    pub class: String,
    /// Method name
    pub name: String,
    /// Method signature
    pub signature: MethodSig,
    /// Assembly defining the declaring type, if it lives in another assembly
    pub scope: Option<AssemblyIdentity>,
}

impl MemberRef {
    /// Build a member reference.
    pub fn new(class: impl Into<String>, name: impl Into<String>, signature: MethodSig) -> Self {
        MemberRef {
            class: class.into(),
            name: name.into(),
            signature,
            scope: None,
        }
    }

    /// Scope the reference to the assembly `scope`.
    #[must_use]
    pub fn with_scope(mut self, scope: Option<AssemblyIdentity>) -> Self {
        self.scope = scope;
        self
    }

    /// True if `other` names the same method, regardless of scope
    #[must_use]
    pub fn same_method(&self, other: &MemberRef) -> bool {
        self.class == other.class && self.name == other.name && self.signature == other.signature
    }

    /// Fully-qualified rendering, e.g. `System.Void CilHook.ModLoader::Init()`
    #[must_use]
    pub fn full_name(&self) -> String {
        self.signature.full_name(&self.class, &self.name)
    }
}
