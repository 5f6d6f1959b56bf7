//! Column layout of the metadata tables and the sizing rules for heap, table and coded indexes.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, 22 - Metadata Logical Format: Tables
//! - ECMA-335 6th Edition, Partition II, 24.2.6 - `#~` stream

use crate::metadata::token::TableId;

/// Number of table slots in the `#~` valid mask that this crate understands
pub(crate) const TABLE_COUNT: usize = TableId::GenericParamConstraint as usize + 1;

/// Encodings that pack a table tag and a row into one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Tables in tag order.
    pub(crate) fn tables(self) -> &'static [TableId] {
        match self {
            CodedIndex::TypeDefOrRef => &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec],
            CodedIndex::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedIndex::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity,
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedIndex::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedIndex::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedIndex::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndex::HasSemantics => &[TableId::Event, TableId::Property],
            CodedIndex::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndex::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedIndex::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            // Tags 0, 1 and 4 are unused; only the tag count matters for sizing
            CodedIndex::CustomAttributeType => &[
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MemberRef,
                TableId::MemberRef,
            ],
            CodedIndex::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedIndex::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }

    /// Number of low bits holding the tag
    pub(crate) fn tag_bits(self) -> u32 {
        let tags = self.tables().len();
        usize::BITS - (tags - 1).leading_zeros()
    }

    /// Split a coded value into table and 1-based row.
    pub(crate) fn decode(self, value: u32) -> Option<(TableId, u32)> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let table = *self.tables().get(tag)?;
        Some((table, value >> bits))
    }

    /// Pack a table and 1-based row into a coded value.
    pub(crate) fn encode(self, table: TableId, row: u32) -> Option<u32> {
        let tag = self.tables().iter().position(|candidate| *candidate == table)?;
        let tag = u32::try_from(tag).ok()?;
        Some((row << self.tag_bits()) | tag)
    }
}

/// The type of one table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(TableId),
    Coded(CodedIndex),
}

use CodedIndex as C;
use Column::{Blob, Coded, Guid, Index, Str, U16, U32};

/// Columns of `table`, empty for slots that are not tables.
pub(crate) fn columns(table: TableId) -> &'static [Column] {
    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Index(TableId::Field),
            Index(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Index(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Index(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, Index(TableId::Param)],
        TableId::ParamPtr => &[Index(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Index(TableId::TypeDef), Coded(C::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Index(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Index(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Index(TableId::TypeDef), Index(TableId::Event)],
        TableId::EventPtr => &[Index(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        TableId::PropertyMap => &[Index(TableId::TypeDef), Index(TableId::Property)],
        TableId::PropertyPtr => &[Index(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[
            U16,
            Index(TableId::MethodDef),
            Coded(C::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Index(TableId::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,
            Coded(C::MemberForwarded),
            Str,
            Index(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Index(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Index(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Index(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        TableId::NestedClass => &[Index(TableId::TypeDef), Index(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => {
            &[Index(TableId::GenericParam), Coded(C::TypeDefOrRef)]
        }
        TableId::UserString => &[],
    }
}

/// Index widths for one set of row counts and heap sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Widths {
    rows: [u32; TABLE_COUNT],
    large_str: bool,
    large_guid: bool,
    large_blob: bool,
}

impl Widths {
    /// `heap_sizes` is the `#~` header flag byte: 0x01 strings, 0x02 GUIDs, 0x04 blobs.
    pub(crate) fn new(rows: [u32; TABLE_COUNT], heap_sizes: u8) -> Self {
        Widths {
            rows,
            large_str: heap_sizes & 0x01 != 0,
            large_guid: heap_sizes & 0x02 != 0,
            large_blob: heap_sizes & 0x04 != 0,
        }
    }

    fn rows(&self, table: TableId) -> u32 {
        self.rows.get(table as usize).copied().unwrap_or(0)
    }

    /// Size in bytes of a value in `column`.
    pub(crate) fn column(&self, column: Column) -> usize {
        let large = match column {
            Column::U16 => false,
            Column::U32 => true,
            Column::Str => self.large_str,
            Column::Guid => self.large_guid,
            Column::Blob => self.large_blob,
            Column::Index(table) => self.rows(table) > u32::from(u16::MAX),
            Column::Coded(coded) => {
                let limit = 1_u32 << (16 - coded.tag_bits());
                coded.tables().iter().any(|table| self.rows(*table) >= limit)
            }
        };
        if large {
            4
        } else {
            2
        }
    }

    /// Size in bytes of one row of `table`.
    pub(crate) fn row(&self, table: TableId) -> usize {
        columns(table).iter().map(|column| self.column(*column)).sum()
    }
}
