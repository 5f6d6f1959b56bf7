//! Metadata tokens.
//!
//! A token is a 32-bit value whose high byte names a metadata table and whose low 24 bits are a
//! 1-based row index into that table (ECMA-335, Partition II, 22). Call instructions carry a
//! token as their operand; resolving it through the image yields the callee.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilhook::metadata::token::{TableId, Token};
//!
//! let token = Token::from_row(TableId::MemberRef, 3);
//! assert_eq!(token.value(), 0x0A00_0003);
//! assert_eq!(token.table_id(), Some(TableId::MemberRef));
//! assert_eq!(token.index(), Some(2));
//! ```

use std::fmt;

use strum::{Display, EnumIter, FromRepr};

/// Metadata tables of an ECMA-335 module (Partition II, 22), plus the user string heap tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TableId {
    /// `Module` (0x00)
    Module = 0x00,
    /// `TypeRef` (0x01)
    TypeRef = 0x01,
    /// `TypeDef` (0x02)
    TypeDef = 0x02,
    /// `FieldPtr` (0x03), uncompressed streams only
    FieldPtr = 0x03,
    /// `Field` (0x04)
    Field = 0x04,
    /// `MethodPtr` (0x05), uncompressed streams only
    MethodPtr = 0x05,
    /// `MethodDef` (0x06)
    MethodDef = 0x06,
    /// `ParamPtr` (0x07), uncompressed streams only
    ParamPtr = 0x07,
    /// `Param` (0x08)
    Param = 0x08,
    /// `InterfaceImpl` (0x09)
    InterfaceImpl = 0x09,
    /// `MemberRef` (0x0A)
    MemberRef = 0x0A,
    /// `Constant` (0x0B)
    Constant = 0x0B,
    /// `CustomAttribute` (0x0C)
    CustomAttribute = 0x0C,
    /// `FieldMarshal` (0x0D)
    FieldMarshal = 0x0D,
    /// `DeclSecurity` (0x0E)
    DeclSecurity = 0x0E,
    /// `ClassLayout` (0x0F)
    ClassLayout = 0x0F,
    /// `FieldLayout` (0x10)
    FieldLayout = 0x10,
    /// `StandAloneSig` (0x11), used by local variable signatures
    StandAloneSig = 0x11,
    /// `EventMap` (0x12)
    EventMap = 0x12,
    /// `EventPtr` (0x13), uncompressed streams only
    EventPtr = 0x13,
    /// `Event` (0x14)
    Event = 0x14,
    /// `PropertyMap` (0x15)
    PropertyMap = 0x15,
    /// `PropertyPtr` (0x16), uncompressed streams only
    PropertyPtr = 0x16,
    /// `Property` (0x17)
    Property = 0x17,
    /// `MethodSemantics` (0x18)
    MethodSemantics = 0x18,
    /// `MethodImpl` (0x19)
    MethodImpl = 0x19,
    /// `ModuleRef` (0x1A)
    ModuleRef = 0x1A,
    /// `TypeSpec` (0x1B)
    TypeSpec = 0x1B,
    /// `ImplMap` (0x1C)
    ImplMap = 0x1C,
    /// `FieldRVA` (0x1D)
    FieldRVA = 0x1D,
    /// `EncLog` (0x1E)
    EncLog = 0x1E,
    /// `EncMap` (0x1F)
    EncMap = 0x1F,
    /// `Assembly` (0x20)
    Assembly = 0x20,
    /// `AssemblyProcessor` (0x21)
    AssemblyProcessor = 0x21,
    /// `AssemblyOS` (0x22)
    AssemblyOS = 0x22,
    /// `AssemblyRef` (0x23)
    AssemblyRef = 0x23,
    /// `AssemblyRefProcessor` (0x24)
    AssemblyRefProcessor = 0x24,
    /// `AssemblyRefOS` (0x25)
    AssemblyRefOS = 0x25,
    /// `File` (0x26)
    File = 0x26,
    /// `ExportedType` (0x27)
    ExportedType = 0x27,
    /// `ManifestResource` (0x28)
    ManifestResource = 0x28,
    /// `NestedClass` (0x29)
    NestedClass = 0x29,
    /// `GenericParam` (0x2A)
    GenericParam = 0x2A,
    /// `MethodSpec` (0x2B)
    MethodSpec = 0x2B,
    /// `GenericParamConstraint` (0x2C)
    GenericParamConstraint = 0x2C,
    /// User string heap (0x70), the operand of `ldstr`
    UserString = 0x70,
}

impl TableId {
    /// True for the real metadata tables, false for the user string heap tag
    #[must_use]
    pub fn is_table(self) -> bool {
        (self as u8) <= TableId::GenericParamConstraint as u8
    }
}

/// A metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token for the 1-based `row` of `table`
    #[must_use]
    pub fn from_row(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Create a token for the 0-based `index` of `table`
    #[must_use]
    pub fn from_index(table: TableId, index: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let row = index as u32 + 1;
        Token::from_row(table, row)
    }

    /// Raw value of the token
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Table byte of the token
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Table of the token, if it is one this crate knows about
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_repr(self.table())
    }

    /// 1-based row of the token
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// 0-based table index, `None` for a null row
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self.row() {
            0 => None,
            row => Some(row as usize - 1),
        }
    }

    /// Returns true for the null token
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
