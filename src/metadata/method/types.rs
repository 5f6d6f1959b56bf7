//! Attribute and header flags for methods, method bodies and types.
//!
//! Values follow ECMA-335, Partition II, 23.1.

use bitflags::bitflags;

/// Mask selecting the member access bits of a method's attributes
pub const METHOD_ACCESS_MASK: u16 = 0x0007;
/// Mask selecting the visibility bits of a type's attributes
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

bitflags! {
    /// `MethodAttributes` as stored in the `MethodDef` table.
    ///
    /// The low three bits are an access enumeration rather than independent flags; use
    /// [`MethodAttributes::access`] to read them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime checks the name encoding
        const RTSPECIAL_NAME = 0x1000;
    }
}

/// Member access level encoded in the low bits of [`MethodAttributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodAccess {
    /// Member not referenceable
    CompilerControlled,
    /// Accessible only by the parent type
    Private,
    /// Accessible by sub-types only in this assembly
    FamAndAssem,
    /// Accessible by anyone in the assembly
    Assem,
    /// Accessible only by type and sub-types
    Family,
    /// Accessible by sub-types anywhere, plus anyone in assembly
    FamOrAssem,
    /// Accessible by anyone
    Public,
}

impl MethodAttributes {
    /// Decode the access level
    #[must_use]
    pub fn access(&self) -> MethodAccess {
        match self.bits() & METHOD_ACCESS_MASK {
            0x1 => MethodAccess::Private,
            0x2 => MethodAccess::FamAndAssem,
            0x3 => MethodAccess::Assem,
            0x4 => MethodAccess::Family,
            0x5 => MethodAccess::FamOrAssem,
            0x6 => MethodAccess::Public,
            _ => MethodAccess::CompilerControlled,
        }
    }

    /// True for `static` methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.contains(MethodAttributes::STATIC)
    }
}

bitflags! {
    /// `TypeAttributes` as stored in the `TypeDef` table (subset).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeAttributes: u32 {
        /// Top-level type visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type is abstract
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
        /// Type name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Initialize the type before the first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

bitflags! {
    /// Flags of the first byte/word of a method body header (II.25.4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header format
        const TINY_FORMAT = 0x2;
        /// Fat header format
        const FAT_FORMAT = 0x3;
        /// More sections follow the code
        const MORE_SECTS = 0x8;
        /// Call default constructor on all locals
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of a method data section header (II.25.4.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Exception handling data
        const EHTABLE = 0x1;
        /// Reserved, must be zero
        const OPT_ILTABLE = 0x2;
        /// Data format is of the fat variety
        const FAT_FORMAT = 0x40;
        /// Another data section follows
        const MORE_SECTS = 0x80;
    }
}
