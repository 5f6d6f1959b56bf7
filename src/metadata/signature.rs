//! Method signatures.
//!
//! Types are carried by their fully-qualified display name (`System.Void`,
//! `System.Collections.IEnumerator`, `Outer/Inner`), which is all the hook and entry matching
//! needs. Two signatures are equal when their rendered forms are equal.

use std::fmt;

/// Return type name of a method that returns nothing
pub const VOID: &str = "System.Void";

/// The signature of a method: calling convention, return type and parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method (takes an implicit `this`)
    pub has_this: bool,
    /// Fully-qualified return type
    pub return_type: String,
    /// Fully-qualified parameter types
    pub params: Vec<String>,
}

impl MethodSig {
    /// A static method signature.
    pub fn new_static(return_type: impl Into<String>, params: Vec<String>) -> Self {
        MethodSig {
            has_this: false,
            return_type: return_type.into(),
            params,
        }
    }

    /// An instance method signature.
    pub fn new_instance(return_type: impl Into<String>, params: Vec<String>) -> Self {
        MethodSig {
            has_this: true,
            return_type: return_type.into(),
            params,
        }
    }

    /// `static void ()`
    #[must_use]
    pub fn void_static() -> Self {
        Self::new_static(VOID, Vec::new())
    }

    /// True if the method returns `System.Void`
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.return_type == VOID
    }

    /// Simple name of the return type: namespace, nesting and generic arity stripped.
    ///
    /// `System.Collections.Generic.IEnumerator`1` becomes `IEnumerator`.
    #[must_use]
    pub fn return_simple_name(&self) -> &str {
        simple_type_name(&self.return_type)
    }

    /// Render the fully-qualified form `<ReturnType> <DeclaringType>::<Name>(<Params>)`.
    #[must_use]
    pub fn full_name(&self, declaring_type: &str, name: &str) -> String {
        format!(
            "{} {}::{}({})",
            self.return_type,
            declaring_type,
            name,
            self.params.join(",")
        )
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_this {
            write!(f, "instance ")?;
        }
        write!(f, "{} ({})", self.return_type, self.params.join(","))
    }
}

/// Strip namespace, enclosing types, generic arguments and generic arity from a type name.
#[must_use]
pub fn simple_type_name(full_name: &str) -> &str {
    let without_args = full_name.split('<').next().unwrap_or(full_name);
    let last = without_args
        .rsplit(['.', '/'])
        .next()
        .unwrap_or(without_args);
    last.split('`').next().unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_full_name() {
        let sig = MethodSig::void_static();
        assert_eq!(
            sig.full_name("CilHook.ModLoader", "Init"),
            "System.Void CilHook.ModLoader::Init()"
        );

        let sig = MethodSig::new_instance(
            "System.Boolean",
            vec!["System.Int32".into(), "System.String".into()],
        );
        assert_eq!(
            sig.full_name("Game/Inner", "Try"),
            "System.Boolean Game/Inner::Try(System.Int32,System.String)"
        );
        assert_eq!(sig.to_string(), "instance System.Boolean (System.Int32,System.String)");
    }

    #[test]
    fn simple_names() {
        assert_eq!(simple_type_name("System.Collections.IEnumerator"), "IEnumerator");
        assert_eq!(
            simple_type_name("System.Collections.Generic.IEnumerable`1"),
            "IEnumerable"
        );
        assert_eq!(
            simple_type_name("System.Collections.Generic.IEnumerator`1<System.Int32>"),
            "IEnumerator"
        );
        assert_eq!(simple_type_name("Outer/Inner"), "Inner");
        assert_eq!(simple_type_name("Void"), "Void");
    }

    #[test]
    fn void_checks() {
        assert!(MethodSig::void_static().returns_void());
        assert!(!MethodSig::new_static("System.Int32", vec![]).returns_void());
    }
}
