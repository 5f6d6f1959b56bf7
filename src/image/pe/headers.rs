//! PE header layout: where the section table lives, the sections themselves and the CLI header.
//!
//! Parsing goes through goblin; the offsets kept here are the ones the writer patches in place.

use goblin::pe::PE;

use crate::{
    file::io::{push_le, read_le, write_le_at},
    Error, Result,
};

/// Size of a section header
pub(crate) const SECTION_HEADER_SIZE: usize = 40;
/// Size of the CLI header (ECMA-335, Partition II, 25.3.3)
pub(crate) const CLI_HEADER_SIZE: usize = 72;
/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
pub(crate) const STRONG_NAME_SIGNED: u32 = 0x0000_0008;
/// Readable, executable code
pub(crate) const SECTION_CODE: u32 = 0x6000_0020;

/// One section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Section {
    pub(crate) name: String,
    pub(crate) virtual_address: u32,
    pub(crate) virtual_size: u32,
    pub(crate) raw_offset: u32,
    pub(crate) raw_size: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.raw_size);
        rva >= self.virtual_address && rva - self.virtual_address < size
    }
}

/// Header offsets and values of a parsed PE image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PeLayout {
    pub(crate) coff_offset: usize,
    pub(crate) optional_offset: usize,
    pub(crate) section_table_offset: usize,
    pub(crate) sections: Vec<Section>,
    pub(crate) section_alignment: u32,
    pub(crate) file_alignment: u32,
    pub(crate) size_of_headers: u32,
    pub(crate) clr_rva: u32,
    pub(crate) clr_size: u32,
}

impl PeLayout {
    /// Parse the headers of `data`.
    ///
    /// # Errors
    /// Returns [`Error::GoblinErr`] if the headers are damaged and [`Error::NotSupported`] if the
    /// image has no CLI header.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let pe = PE::parse(data)?;
        let Some(optional) = pe.header.optional_header.as_ref() else {
            return Err(Error::NotSupported);
        };
        let (clr_rva, clr_size) = match optional.data_directories.get_clr_runtime_header() {
            Some(clr) if clr.virtual_address != 0 => (clr.virtual_address, clr.size),
            _ => return Err(Error::NotSupported),
        };

        let coff_offset = pe.header.dos_header.pe_pointer as usize + 4;
        let optional_offset = coff_offset + 20;
        let section_table_offset =
            optional_offset + usize::from(pe.header.coff_header.size_of_optional_header);

        let sections = pe
            .sections
            .iter()
            .map(|section| Section {
                name: String::from_utf8_lossy(&section.name)
                    .trim_end_matches('\0')
                    .to_string(),
                virtual_address: section.virtual_address,
                virtual_size: section.virtual_size,
                raw_offset: section.pointer_to_raw_data,
                raw_size: section.size_of_raw_data,
            })
            .collect();

        Ok(PeLayout {
            coff_offset,
            optional_offset,
            section_table_offset,
            sections,
            section_alignment: optional.windows_fields.section_alignment,
            file_alignment: optional.windows_fields.file_alignment,
            size_of_headers: optional.windows_fields.size_of_headers,
            clr_rva,
            clr_size,
        })
    }

    /// File offset of `rva`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if no section maps `rva`.
    pub(crate) fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.sections
            .iter()
            .find(|section| section.contains(rva))
            .map(|section| (rva - section.virtual_address + section.raw_offset) as usize)
            .ok_or_else(|| malformed_error!("RVA {:#x} is not mapped by any section", rva))
    }

    /// First RVA past every section, rounded to the section alignment.
    pub(crate) fn next_rva(&self) -> Result<u32> {
        let end = self
            .sections
            .iter()
            .map(|section| {
                section
                    .virtual_address
                    .checked_add(section.virtual_size.max(section.raw_size))
            })
            .try_fold(0_u32, |max, end| end.map(|end| max.max(end)))
            .ok_or_else(|| malformed_error!("Section extends past the 4 GiB address space"))?;
        align(end, self.section_alignment)
    }

    /// Append a section header after the existing ones.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the headers leave no zeroed slot for another section.
    pub(crate) fn add_section(
        &mut self,
        data: &mut [u8],
        section: Section,
        flags: u32,
    ) -> Result<()> {
        let slot = self.section_table_offset + self.sections.len() * SECTION_HEADER_SIZE;
        let first_raw = self
            .sections
            .iter()
            .map(|existing| existing.raw_offset as usize)
            .filter(|offset| *offset != 0)
            .min()
            .unwrap_or(usize::MAX);
        let limit = first_raw.min(self.size_of_headers as usize);
        let free = data
            .get(slot..slot + SECTION_HEADER_SIZE)
            .is_some_and(|bytes| bytes.iter().all(|byte| *byte == 0));
        if slot + SECTION_HEADER_SIZE > limit || !free {
            return Err(Error::Error(
                "PE headers have no room for another section header".to_string(),
            ));
        }

        let mut name = [0_u8; 8];
        for (slot, byte) in name.iter_mut().zip(section.name.bytes()) {
            *slot = byte;
        }
        data[slot..slot + 8].copy_from_slice(&name);
        let mut offset = slot + 8;
        for value in [
            section.virtual_size,
            section.virtual_address,
            section.raw_size,
            section.raw_offset,
            0,
            0,
        ] {
            write_le_at(data, &mut offset, value)?;
        }
        write_le_at(data, &mut offset, 0_u32)?;
        write_le_at(data, &mut offset, flags)?;

        self.sections.push(section);
        let count = u16::try_from(self.sections.len())
            .map_err(|_| malformed_error!("Too many sections"))?;
        write_le_at(data, &mut (self.coff_offset + 2), count)?;

        let size_of_image = self.next_rva()?;
        write_le_at(data, &mut (self.optional_offset + 56), size_of_image)?;
        // CheckSum
        write_le_at(data, &mut (self.optional_offset + 64), 0_u32)?;
        Ok(())
    }

    /// Clear a data directory entry. Index 4 is the certificate table.
    pub(crate) fn clear_directory(&self, data: &mut [u8], index: usize) -> Result<bool> {
        let magic = read_le::<u16>(data.get(self.optional_offset..).ok_or(Error::OutOfBounds)?)?;
        let directories = self.optional_offset + if magic == 0x20B { 112 } else { 96 };
        let mut offset = directories + index * 8;
        let present = read_le::<u64>(data.get(offset..).ok_or(Error::OutOfBounds)?)? != 0;
        write_le_at(data, &mut offset, 0_u64)?;
        Ok(present)
    }
}

/// RVA of the `.text` section in images built by [`build_pe`]
pub(crate) const TEXT_RVA: u32 = 0x2000;
const HEADERS_SIZE: u32 = 0x200;
const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const PE_OFFSET: usize = 0x80;

/// A CLI header for an IL-only image.
pub(crate) fn cli_header(metadata_rva: u32, metadata_size: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(CLI_HEADER_SIZE);
    push_le(&mut out, CLI_HEADER_SIZE as u32);
    push_le(&mut out, 2_u16);
    push_le(&mut out, 5_u16);
    push_le(&mut out, metadata_rva);
    push_le(&mut out, metadata_size);
    // COMIMAGE_FLAGS_ILONLY
    push_le(&mut out, 1_u32);
    out.resize(CLI_HEADER_SIZE, 0);
    out
}

/// A PE32 DLL with one `.text` section holding `text` at [`TEXT_RVA`], which must start with
/// the CLI header.
pub(crate) fn build_pe(text: &[u8]) -> Result<Vec<u8>> {
    let text_size = u32::try_from(text.len()).map_err(|_| malformed_error!("Image exceeds 4 GiB"))?;
    let raw_size = align(text_size, FILE_ALIGNMENT)?;
    let size_of_image = align(TEXT_RVA + text_size.max(1), SECTION_ALIGNMENT)?;

    let mut out = vec![0_u8; HEADERS_SIZE as usize];
    out[..2].copy_from_slice(b"MZ");
    write_le_at(&mut out, &mut 0x3C, PE_OFFSET as u32)?;

    let mut offset = PE_OFFSET;
    write_le_at(&mut out, &mut offset, 0x0000_4550_u32)?;
    // COFF: i386, one section, 224-byte optional header, executable 32-bit DLL
    write_le_at(&mut out, &mut offset, 0x014C_u16)?;
    write_le_at(&mut out, &mut offset, 1_u16)?;
    offset += 12;
    write_le_at(&mut out, &mut offset, 224_u16)?;
    write_le_at(&mut out, &mut offset, 0x2102_u16)?;

    let optional = offset;
    write_le_at(&mut out, &mut offset, 0x010B_u16)?;
    write_le_at(&mut out, &mut offset, 8_u8)?;
    offset += 1;
    write_le_at(&mut out, &mut offset, raw_size)?;
    offset = optional + 20;
    write_le_at(&mut out, &mut offset, TEXT_RVA)?;
    offset = optional + 28;
    for value in [0x1000_0000, SECTION_ALIGNMENT, FILE_ALIGNMENT] {
        write_le_at(&mut out, &mut offset, value)?;
    }
    for value in [4_u16, 0, 0, 0, 4, 0] {
        write_le_at(&mut out, &mut offset, value)?;
    }
    offset = optional + 56;
    write_le_at(&mut out, &mut offset, size_of_image)?;
    write_le_at(&mut out, &mut offset, HEADERS_SIZE)?;
    offset = optional + 68;
    // Windows CUI; dynamic base, NX compatible, no SEH, terminal server aware
    write_le_at(&mut out, &mut offset, 3_u16)?;
    write_le_at(&mut out, &mut offset, 0x8540_u16)?;
    for value in [0x0010_0000_u32, 0x1000, 0x0010_0000, 0x1000, 0, 16] {
        write_le_at(&mut out, &mut offset, value)?;
    }
    // Data directory 14: CLI header
    offset = optional + 96 + 14 * 8;
    write_le_at(&mut out, &mut offset, TEXT_RVA)?;
    write_le_at(&mut out, &mut offset, CLI_HEADER_SIZE as u32)?;

    let mut offset = optional + 224;
    out[offset..offset + 5].copy_from_slice(b".text");
    offset += 8;
    for value in [text_size, TEXT_RVA, raw_size, HEADERS_SIZE, 0, 0] {
        write_le_at(&mut out, &mut offset, value)?;
    }
    write_le_at(&mut out, &mut offset, 0_u32)?;
    write_le_at(&mut out, &mut offset, SECTION_CODE)?;

    out.extend_from_slice(text);
    out.resize((HEADERS_SIZE + raw_size) as usize, 0);
    Ok(out)
}

/// Round `value` up to a multiple of `alignment`.
pub(crate) fn align(value: u32, alignment: u32) -> Result<u32> {
    if alignment <= 1 {
        return Ok(value);
    }
    value
        .checked_add(alignment - 1)
        .map(|value| value / alignment * alignment)
        .ok_or_else(|| malformed_error!("{:#x} overflows when aligned to {:#x}", value, alignment))
}
