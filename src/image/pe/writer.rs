//! Writing an [`Image`] as a PE/CLI assembly.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::{
    file::io::{read_le, write_le_at},
    image::{
        pe::{
            headers::{
                align, build_pe, cli_header, Section, CLI_HEADER_SIZE, SECTION_CODE,
                STRONG_NAME_SIGNED, TEXT_RVA,
            },
            heaps::{string_at, HeapBuilder, HeapKind},
            reader::type_ref_name,
            root::MetadataRoot,
            schema::CodedIndex,
            sigs::encode_method_sig,
            tables::TablesStream,
            Assembly,
        },
        Image,
    },
    metadata::{
        identity::AssemblyIdentity, memberref::MemberRef, method::MethodBody, signature::MethodSig,
        token::TableId,
    },
    Error, Result,
};

/// Name of the section appended to rewritten assemblies
const PATCH_SECTION: &str = ".cilhk";
/// `CALG_SHA1`
const HASH_SHA1: u32 = 0x8004;
/// Certificate table data directory
const CERTIFICATE_DIRECTORY: usize = 4;

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("{:#x} exceeds 32 bits", value))
}

fn coded(index: CodedIndex, table: TableId, row: u32) -> Result<u32> {
    index
        .encode(table, row)
        .ok_or_else(|| malformed_error!("{} cannot be encoded as {:?}", table, index))
}

/// Tables and heaps under construction.
struct MetadataBuilder {
    tables: TablesStream,
    strings: HeapBuilder,
    blobs: HeapBuilder,
    type_defs: HashMap<String, u32>,
    type_refs: HashMap<String, u32>,
    assembly_refs: HashMap<String, u32>,
}

impl MetadataBuilder {
    fn new(tables: TablesStream, root: &MetadataRoot) -> Result<Self> {
        let strings = root.stream("#Strings").unwrap_or_default();

        let mut type_refs = HashMap::new();
        for row in 1..=to_u32(tables.row_count(TableId::TypeRef))? {
            type_refs
                .entry(type_ref_name(&tables, strings, row, 0)?)
                .or_insert(row);
        }
        let mut assembly_refs = HashMap::new();
        for (index, cells) in tables.table(TableId::AssemblyRef).rows().enumerate() {
            assembly_refs
                .entry(string_at(strings, cells[6])?.to_string())
                .or_insert(to_u32(index + 1)?);
        }

        Ok(MetadataBuilder {
            strings: HeapBuilder::new(HeapKind::Strings, strings),
            blobs: HeapBuilder::new(HeapKind::Blob, root.stream("#Blob").unwrap_or_default()),
            tables,
            type_defs: HashMap::new(),
            type_refs,
            assembly_refs,
        })
    }

    /// Register the names of the image's own types, in row order starting at `first_row`.
    fn register_types(&mut self, image: &Image, first_row: u32) -> Result<()> {
        for index in 0..image.types.len() {
            let row = first_row + to_u32(index)?;
            self.type_defs.entry(image.type_full_name(index)).or_insert(row);
        }
        Ok(())
    }

    fn assembly_ref(&mut self, identity: &AssemblyIdentity) -> Result<u32> {
        if let Some(row) = self.assembly_refs.get(&identity.name) {
            return Ok(*row);
        }

        let token = identity.public_key_token.map(|token| token.to_vec()).unwrap_or_default();
        let [major, minor, build, revision] = identity.version;
        let cells = [
            u32::from(major),
            u32::from(minor),
            u32::from(build),
            u32::from(revision),
            0,
            self.blobs.add(&token)?,
            self.strings.add_str(&identity.name)?,
            self.strings.add_str(&identity.culture)?,
            0,
        ];
        let row = self.tables.push_row(TableId::AssemblyRef, &cells)?;
        self.assembly_refs.insert(identity.name.clone(), row);
        Ok(row)
    }

    /// `TypeDef` or `TypeRef` row naming `full_name`, adding a `TypeRef` if neither exists.
    fn class(
        &mut self,
        full_name: &str,
        scope: Option<&AssemblyIdentity>,
    ) -> Result<(TableId, u32)> {
        if full_name.is_empty() || full_name.ends_with('>') {
            return Err(Error::Error(format!("Cannot reference type '{full_name}'")));
        }
        if scope.is_none() {
            if let Some(row) = self.type_defs.get(full_name) {
                return Ok((TableId::TypeDef, *row));
            }
        }
        if let Some(row) = self.type_refs.get(full_name) {
            return Ok((TableId::TypeRef, *row));
        }

        let (resolution, namespace, name) = match full_name.rsplit_once('/') {
            Some((outer, inner)) => {
                let (table, row) = self.class(outer, scope)?;
                if table != TableId::TypeRef {
                    return Err(Error::Error(format!(
                        "Cannot reference '{full_name}', its enclosing type is defined locally"
                    )));
                }
                (coded(CodedIndex::ResolutionScope, table, row)?, "", inner)
            }
            None => {
                let resolution = match scope {
                    Some(identity) => {
                        let row = self.assembly_ref(identity)?;
                        coded(CodedIndex::ResolutionScope, TableId::AssemblyRef, row)?
                    }
                    None => coded(CodedIndex::ResolutionScope, TableId::Module, 1)?,
                };
                let (namespace, name) = full_name.rsplit_once('.').unwrap_or(("", full_name));
                (resolution, namespace, name)
            }
        };

        let cells = [resolution, self.strings.add_str(name)?, self.strings.add_str(namespace)?];
        let row = self.tables.push_row(TableId::TypeRef, &cells)?;
        self.type_refs.insert(full_name.to_string(), row);
        Ok((TableId::TypeRef, row))
    }

    fn signature(&mut self, sig: &MethodSig) -> Result<u32> {
        let blob = encode_method_sig(sig, |name| self.class(name, None))?;
        self.blobs.add(&blob)
    }

    fn member_ref(&mut self, member: &MemberRef) -> Result<u32> {
        let (table, row) = self.class(&member.class, member.scope.as_ref())?;
        let cells = [
            coded(CodedIndex::MemberRefParent, table, row)?,
            self.strings.add_str(&member.name)?,
            self.signature(&member.signature)?,
        ];
        self.tables.push_row(TableId::MemberRef, &cells)
    }

    /// Encode the metadata, replacing the table and heap streams of `root`.
    fn finish(self, mut root: MetadataRoot) -> Result<Vec<u8>> {
        let mut heap_sizes = self.tables.heap_sizes & 0x07;
        if self.strings.is_large() {
            heap_sizes |= 0x01;
        }
        if self.blobs.is_large() {
            heap_sizes |= 0x04;
        }
        root.set_stream("#~", self.tables.encode(heap_sizes)?);
        root.set_stream("#Strings", self.strings.into_bytes());
        root.set_stream("#Blob", self.blobs.into_bytes());
        root.encode()
    }
}

/// Method bodies laid out from a base RVA.
struct Code {
    rva: u32,
    data: Vec<u8>,
}

impl Code {
    fn new(rva: u32, prefix: Vec<u8>) -> Self {
        Code { rva, data: prefix }
    }

    /// Append 4-byte aligned `bytes` and return their RVA.
    fn push(&mut self, bytes: &[u8]) -> Result<u32> {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        let rva = self
            .rva
            .checked_add(to_u32(self.data.len())?)
            .ok_or_else(|| malformed_error!("Code exceeds the 4 GiB address space"))?;
        self.data.extend_from_slice(bytes);
        Ok(rva)
    }

    fn push_body(&mut self, body: &MethodBody) -> Result<u32> {
        self.push(&body.to_bytes()?)
    }
}

/// Encode `image`: rewrite the assembly it was read from, or build a new one.
pub(crate) fn write_image(image: &Image) -> Result<Vec<u8>> {
    match image.assembly.as_deref() {
        Some(assembly) => rewrite(image, assembly),
        None => emit(image),
    }
}

fn rewrite(image: &Image, assembly: &Assembly) -> Result<Vec<u8>> {
    if image.types.len() != assembly.types || image.methods.len() != assembly.methods {
        return Err(Error::Error(
            "Types and methods cannot be added to an existing assembly".to_string(),
        ));
    }
    let added = image.member_refs.get(assembly.member_refs..).unwrap_or_default();
    if image.dirty.is_empty() && added.is_empty() {
        return Ok(assembly.data.clone());
    }

    let mut data = assembly.data.clone();
    let mut layout = assembly.layout.clone();
    let rva = layout.next_rva()?;
    let raw_offset = align(to_u32(data.len())?, layout.file_alignment)?;

    let mut builder = MetadataBuilder::new(assembly.tables.clone(), &assembly.root)?;
    builder.register_types(image, 1)?;
    let mut code = Code::new(rva, Vec::new());
    for index in &image.dirty {
        let Some(body) = image.methods.get(*index).and_then(|method| method.body.as_ref()) else {
            continue;
        };
        let body_rva = code.push_body(body)?;
        builder.tables.set(TableId::MethodDef, to_u32(index + 1)?, 0, body_rva)?;
    }
    for member in added {
        builder.member_ref(member)?;
    }

    let metadata = builder.finish(assembly.root.clone())?;
    let metadata_rva = code.push(&metadata)?;
    let virtual_size = to_u32(code.data.len())?;
    let raw_size = align(virtual_size, layout.file_alignment)?;
    layout.add_section(
        &mut data,
        Section {
            name: PATCH_SECTION.to_string(),
            virtual_address: rva,
            virtual_size,
            raw_offset,
            raw_size,
        },
        SECTION_CODE,
    )?;

    let mut offset = assembly.cli_offset + 8;
    write_le_at(&mut data, &mut offset, metadata_rva)?;
    write_le_at(&mut data, &mut offset, to_u32(metadata.len())?)?;
    let flags = read_le::<u32>(data.get(offset..).ok_or(Error::OutOfBounds)?)?;
    if flags & STRONG_NAME_SIGNED != 0 {
        warn!("Clearing the strong name signature flag, the assembly must be re-signed");
        write_le_at(&mut data, &mut offset, flags & !STRONG_NAME_SIGNED)?;
    }
    if layout.clear_directory(&mut data, CERTIFICATE_DIRECTORY)? {
        warn!("Dropping the Authenticode signature of the rewritten assembly");
    }

    data.resize(raw_offset as usize, 0);
    data.extend_from_slice(&code.data);
    data.resize((raw_offset + raw_size) as usize, 0);
    info!(
        "Rewrote {} method bodies and {} member references into section {} at RVA {:#x}",
        image.dirty.len(),
        added.len(),
        PATCH_SECTION,
        rva
    );
    Ok(data)
}

fn emit(image: &Image) -> Result<Vec<u8>> {
    if let Some(pair) = image
        .methods
        .windows(2)
        .find(|pair| pair[0].declaring_type > pair[1].declaring_type)
    {
        return Err(malformed_error!(
            "Method '{}' is out of declaring type order; methods must be grouped by type",
            pair[1].name
        ));
    }

    let has_module_type = image
        .types
        .first()
        .is_some_and(|first| first.name == "<Module>" && first.namespace.is_empty());
    let first_row = if has_module_type { 1 } else { 2 };

    let mut builder = MetadataBuilder::new(TablesStream::new(), &MetadataRoot::new())?;
    let module_name = image
        .identity
        .as_ref()
        .map_or_else(|| "module.dll".to_string(), |identity| format!("{}.dll", identity.name));
    let cells = [0, builder.strings.add_str(&module_name)?, 1, 0, 0];
    builder.tables.push_row(TableId::Module, &cells)?;

    if !has_module_type {
        let cells = [0, builder.strings.add_str("<Module>")?, 0, 0, 1, 1];
        builder.tables.push_row(TableId::TypeDef, &cells)?;
    }
    builder.register_types(image, first_row)?;
    for (index, typedef) in image.types.iter().enumerate() {
        let method_list = image
            .methods
            .iter()
            .filter(|method| method.declaring_type < index)
            .count();
        let cells = [
            typedef.flags.bits(),
            builder.strings.add_str(&typedef.name)?,
            builder.strings.add_str(&typedef.namespace)?,
            0,
            1,
            to_u32(method_list + 1)?,
        ];
        builder.tables.push_row(TableId::TypeDef, &cells)?;
    }
    for (index, typedef) in image.types.iter().enumerate() {
        if let Some(enclosing) = typedef.enclosing {
            let cells = [
                first_row + to_u32(index)?,
                first_row + to_u32(enclosing)?,
            ];
            builder.tables.push_row(TableId::NestedClass, &cells)?;
        }
    }

    let mut code = Code::new(TEXT_RVA, vec![0; CLI_HEADER_SIZE]);
    for method in &image.methods {
        let rva = match method.body.as_ref() {
            Some(body) => code.push_body(body)?,
            None => 0,
        };
        let cells = [
            rva,
            0,
            u32::from(method.flags.bits()),
            builder.strings.add_str(&method.name)?,
            builder.signature(&method.signature)?,
            1,
        ];
        builder.tables.push_row(TableId::MethodDef, &cells)?;
    }
    for member in &image.member_refs {
        builder.member_ref(member)?;
    }

    if let Some(identity) = image.identity.as_ref() {
        let [major, minor, build, revision] = identity.version;
        let cells = [
            HASH_SHA1,
            u32::from(major),
            u32::from(minor),
            u32::from(build),
            u32::from(revision),
            0,
            0,
            builder.strings.add_str(&identity.name)?,
            builder.strings.add_str(&identity.culture)?,
        ];
        builder.tables.push_row(TableId::Assembly, &cells)?;
    }

    let mut root = MetadataRoot::new();
    root.set_stream("#~", Vec::new());
    root.set_stream("#Strings", Vec::new());
    root.set_stream("#US", vec![0; 4]);
    root.set_stream("#GUID", vec![0; 16]);
    root.set_stream("#Blob", Vec::new());
    let metadata = builder.finish(root)?;
    let metadata_rva = code.push(&metadata)?;

    let mut text = code.data;
    text[..CLI_HEADER_SIZE].copy_from_slice(&cli_header(metadata_rva, to_u32(metadata.len())?));
    debug!(
        "Emitted {} types, {} methods and {} member references",
        image.types.len(),
        image.methods.len(),
        image.member_refs.len()
    );
    build_pe(&text)
}
