//! Building an [`Image`] from the metadata of a PE/CLI assembly.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::{
    file::io::read_le,
    image::{
        pe::{
            headers::{PeLayout, CLI_HEADER_SIZE},
            heaps::{blob_at, string_at},
            root::MetadataRoot,
            schema::CodedIndex,
            sigs::{decode_method_sig, decode_type_sig, TypeNames},
            tables::TablesStream,
            Assembly,
        },
        Image,
    },
    metadata::{
        identity::AssemblyIdentity,
        memberref::MemberRef,
        method::{MethodAttributes, MethodBody, MethodDef, TypeAttributes},
        token::TableId,
        typedef::TypeDef,
    },
    Error, Result,
};

/// `AssemblyFlags.PublicKey`: the blob holds the full key rather than its token
const PUBLIC_KEY: u32 = 0x0001;
/// `MethodImplAttributes.CodeTypeMask`
const CODE_TYPE_MASK: u32 = 0x0003;

/// Row lookups over the tables and heaps of one assembly.
struct Metadata<'a> {
    tables: &'a TablesStream,
    strings: &'a [u8],
    blobs: &'a [u8],
    type_names: Vec<String>,
}

impl<'a> Metadata<'a> {
    fn row(&self, table: TableId, row: u32) -> Result<&'a [u32]> {
        self.tables
            .row(table, row)
            .ok_or_else(|| malformed_error!("{} row {} does not exist", table, row))
    }

    fn string(&self, offset: u32) -> Result<&'a str> {
        string_at(self.strings, offset)
    }

    fn blob(&self, offset: u32) -> Result<&'a [u8]> {
        blob_at(self.blobs, offset)
    }

    fn type_ref_name(&self, row: u32, depth: usize) -> Result<String> {
        type_ref_name(self.tables, self.strings, row, depth)
    }

    /// Assembly a `TypeRef` row resolves to, following nested references outwards.
    fn type_ref_scope(&self, row: u32, depth: usize) -> Result<Option<AssemblyIdentity>> {
        if depth > 32 {
            return Err(malformed_error!("TypeRef {} nests too deeply", row));
        }
        let cells = self.row(TableId::TypeRef, row)?;
        match CodedIndex::ResolutionScope.decode(cells[0]) {
            Some((TableId::AssemblyRef, scope)) if scope != 0 => {
                self.assembly_ref(scope).map(Some)
            }
            Some((TableId::TypeRef, outer)) if outer != 0 => self.type_ref_scope(outer, depth + 1),
            _ => Ok(None),
        }
    }

    fn assembly_ref(&self, row: u32) -> Result<AssemblyIdentity> {
        let cells = self.row(TableId::AssemblyRef, row)?;
        let mut identity = AssemblyIdentity::new(
            self.string(cells[6])?,
            version(&cells[..4]),
        );
        identity.culture = self.string(cells[7])?.to_string();
        let key = self.blob(cells[5])?;
        if cells[4] & PUBLIC_KEY != 0 {
            identity = identity.with_public_key(key);
        } else if let Ok(token) = <[u8; 8]>::try_from(key) {
            identity.public_key_token = Some(token);
        }
        Ok(identity)
    }

    fn assembly(&self) -> Result<Option<AssemblyIdentity>> {
        let Some(cells) = self.tables.row(TableId::Assembly, 1) else {
            return Ok(None);
        };
        let mut identity = AssemblyIdentity::new(self.string(cells[7])?, version(&cells[1..5]))
            .with_public_key(self.blob(cells[6])?);
        identity.culture = self.string(cells[8])?.to_string();
        Ok(Some(identity))
    }

    /// Declaring type name of a `MemberRef` parent.
    fn parent_name(&self, coded: u32, methods: &[MethodDef]) -> Result<String> {
        let (table, row) = CodedIndex::MemberRefParent
            .decode(coded)
            .ok_or_else(|| malformed_error!("Invalid MemberRefParent {:#x}", coded))?;
        match table {
            TableId::ModuleRef => Ok(self.string(self.row(table, row)?[0])?.to_string()),
            TableId::MethodDef => {
                let method = (row as usize)
                    .checked_sub(1)
                    .and_then(|index| methods.get(index))
                    .ok_or_else(|| malformed_error!("MethodDef row {} does not exist", row))?;
                self.type_name(TableId::TypeDef, to_row(method.declaring_type)?, 0)
            }
            _ => self.type_name(table, row, 0),
        }
    }
}

impl TypeNames for Metadata<'_> {
    fn type_name(&self, table: TableId, row: u32, depth: usize) -> Result<String> {
        match table {
            TableId::TypeDef => (row as usize)
                .checked_sub(1)
                .and_then(|index| self.type_names.get(index))
                .cloned()
                .ok_or_else(|| malformed_error!("TypeDef row {} does not exist", row)),
            TableId::TypeRef => self.type_ref_name(row, depth),
            TableId::TypeSpec => {
                let blob = self.blob(self.row(table, row)?[0])?;
                decode_type_sig(blob, self, depth)
            }
            other => Err(malformed_error!("{} row cannot name a type", other)),
        }
    }
}

/// Full name of a `TypeRef` row, `Outer/Inner` for nested references.
pub(super) fn type_ref_name(
    tables: &TablesStream,
    strings: &[u8],
    row: u32,
    depth: usize,
) -> Result<String> {
    if depth > 32 {
        return Err(malformed_error!("TypeRef {} nests too deeply", row));
    }
    let cells = tables
        .row(TableId::TypeRef, row)
        .ok_or_else(|| malformed_error!("TypeRef row {} does not exist", row))?;
    let name = string_at(strings, cells[1])?;
    let namespace = string_at(strings, cells[2])?;
    match CodedIndex::ResolutionScope.decode(cells[0]) {
        Some((TableId::TypeRef, outer)) if outer != 0 => Ok(format!(
            "{}/{name}",
            type_ref_name(tables, strings, outer, depth + 1)?
        )),
        _ if namespace.is_empty() => Ok(name.to_string()),
        _ => Ok(format!("{namespace}.{name}")),
    }
}

fn version(cells: &[u32]) -> [u16; 4] {
    let mut version = [0_u16; 4];
    for (part, cell) in version.iter_mut().zip(cells) {
        *part = u16::try_from(*cell).unwrap_or(u16::MAX);
    }
    version
}

fn to_row(index: usize) -> Result<u32> {
    u32::try_from(index + 1).map_err(|_| malformed_error!("Row {} out of range", index))
}

/// Full names of every type, `Outer/Inner` for nested ones.
fn type_names(types: &[TypeDef]) -> Vec<String> {
    (0..types.len())
        .map(|index| {
            let mut name = types[index].qualified_name();
            let mut current = types[index].enclosing;
            let mut steps = 0;
            while let Some(enclosing) = current.filter(|_| steps <= types.len()) {
                name = format!("{}/{name}", types[enclosing].qualified_name());
                current = types[enclosing].enclosing;
                steps += 1;
            }
            name
        })
        .collect()
}

fn read_types(metadata: &Metadata<'_>) -> Result<Vec<TypeDef>> {
    let tables = metadata.tables;
    let count = tables.row_count(TableId::TypeDef);
    let mut types = Vec::with_capacity(count);
    for row in 1..=count {
        let cells = metadata.row(TableId::TypeDef, to_row(row - 1)?)?;
        types.push(TypeDef {
            namespace: metadata.string(cells[2])?.to_string(),
            name: metadata.string(cells[1])?.to_string(),
            flags: TypeAttributes::from_bits_retain(cells[0]),
            enclosing: None,
        });
    }

    for cells in tables.table(TableId::NestedClass).rows() {
        let nested = (cells[0] as usize).checked_sub(1);
        let enclosing = (cells[1] as usize).checked_sub(1);
        match (nested, enclosing) {
            (Some(nested), Some(enclosing)) if nested < count && enclosing < count => {
                types[nested].enclosing = Some(enclosing);
            }
            _ => return Err(malformed_error!("NestedClass row {:?} is out of range", cells)),
        }
    }
    Ok(types)
}

/// Declaring type of every method, from the `MethodList` ranges of the `TypeDef` table.
fn method_owners(tables: &TablesStream) -> Vec<usize> {
    let methods = tables.row_count(TableId::MethodDef);
    let mut owners = vec![0; methods];
    let starts: Vec<usize> = tables
        .table(TableId::TypeDef)
        .rows()
        .map(|cells| (cells[5] as usize).saturating_sub(1))
        .collect();
    for (owner, start) in starts.iter().enumerate() {
        let end = starts
            .get(owner + 1)
            .copied()
            .unwrap_or(methods)
            .min(methods);
        for slot in owners.iter_mut().take(end).skip(*start) {
            *slot = owner;
        }
    }
    owners
}

fn read_body(data: &[u8], layout: &PeLayout, rva: u32, name: &str) -> Option<MethodBody> {
    let body = layout
        .rva_to_offset(rva)
        .and_then(|offset| data.get(offset..).ok_or(Error::OutOfBounds))
        .and_then(MethodBody::from);
    match body {
        Ok(body) => Some(body),
        Err(error) => {
            warn!("Skipping the body of '{}' at RVA {:#x}: {}", name, rva, error);
            None
        }
    }
}

/// Parse a PE/CLI assembly.
///
/// # Errors
/// Returns [`Error::NotSupported`] for an image without CLI metadata or with uncompressed (`#-`)
/// tables, and [`Error::Malformed`] or [`Error::OutOfBounds`] for damaged metadata.
pub(crate) fn read_image(data: &[u8]) -> Result<Image> {
    let layout = PeLayout::parse(data)?;
    let cli_offset = layout.rva_to_offset(layout.clr_rva)?;
    let cli = data
        .get(cli_offset..cli_offset + CLI_HEADER_SIZE)
        .ok_or(Error::OutOfBounds)?;
    let metadata_rva = read_le::<u32>(&cli[8..])?;
    let metadata_size = read_le::<u32>(&cli[12..])? as usize;
    let metadata_offset = layout.rva_to_offset(metadata_rva)?;
    let metadata_bytes = data
        .get(metadata_offset..metadata_offset + metadata_size)
        .ok_or(Error::OutOfBounds)?;

    let root = MetadataRoot::parse(metadata_bytes)?;
    if root.stream("#-").is_some() {
        return Err(Error::NotSupported);
    }
    let tables = TablesStream::parse(
        root.stream("#~")
            .ok_or_else(|| malformed_error!("Metadata has no #~ stream"))?,
    )?;

    let mut metadata = Metadata {
        tables: &tables,
        strings: root.stream("#Strings").unwrap_or(&[0]),
        blobs: root.stream("#Blob").unwrap_or(&[0]),
        type_names: Vec::new(),
    };
    let types = read_types(&metadata)?;
    metadata.type_names = type_names(&types);

    let owners = method_owners(&tables);
    let mut methods = Vec::with_capacity(owners.len());
    for (index, owner) in owners.iter().enumerate() {
        let cells = metadata.row(TableId::MethodDef, to_row(index)?)?;
        let name = metadata.string(cells[3])?;
        let signature = decode_method_sig(metadata.blob(cells[4])?, &metadata)?;
        let flags = MethodAttributes::from_bits_retain(
            u16::try_from(cells[2]).map_err(|_| malformed_error!("Invalid method flags"))?,
        );
        let body = if cells[0] != 0 && cells[1] & CODE_TYPE_MASK == 0 {
            read_body(data, &layout, cells[0], name)
        } else {
            None
        };
        methods.push(MethodDef::new(name, flags, *owner, signature, body));
    }

    let mut member_refs = Vec::with_capacity(tables.row_count(TableId::MemberRef));
    for cells in tables.table(TableId::MemberRef).rows() {
        let class = metadata.parent_name(cells[0], &methods)?;
        let scope = match CodedIndex::MemberRefParent.decode(cells[0]) {
            Some((TableId::TypeRef, row)) => metadata.type_ref_scope(row, 0)?,
            _ => None,
        };
        let signature = decode_method_sig(metadata.blob(cells[2])?, &metadata)?;
        member_refs.push(
            MemberRef::new(class, metadata.string(cells[1])?, signature).with_scope(scope),
        );
    }

    let identity = metadata.assembly()?;
    debug!(
        "Read assembly {} ({} sections, metadata {})",
        identity
            .as_ref()
            .map_or_else(|| "<module>".to_string(), ToString::to_string),
        layout.sections.len(),
        root.streams
            .iter()
            .map(|stream| stream.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );

    let assembly = Assembly {
        data: data.to_vec(),
        layout,
        cli_offset,
        types: types.len(),
        methods: methods.len(),
        member_refs: member_refs.len(),
        root,
        tables,
    };
    Ok(Image {
        types,
        methods,
        member_refs,
        path: None,
        dirty: BTreeSet::new(),
        identity,
        assembly: Some(Box::new(assembly)),
    })
}
