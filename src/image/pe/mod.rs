//! PE/CLI assemblies.
//!
//! [`read_image`] builds an [`Image`](crate::image::Image) from the metadata tables of a .NET
//! assembly and keeps the parsed tables alongside it. [`write_image`] either emits a new
//! single-section DLL for an image built in memory, or rewrites an opened assembly by appending
//! one section that holds the patched method bodies and a rebuilt copy of the metadata. Rows are
//! only ever appended, so every token in the original code stays valid.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, 24 - Metadata Physical Layout
//! - ECMA-335 6th Edition, Partition II, 25 - File Format Extensions to PE

mod headers;
mod heaps;
mod reader;
mod root;
mod schema;
mod sigs;
mod tables;
mod writer;

#[cfg(test)]
pub(crate) use headers::{build_pe, cli_header, CLI_HEADER_SIZE, TEXT_RVA};
pub(crate) use reader::read_image;
pub(crate) use writer::write_image;

use std::fmt;

use headers::PeLayout;
use root::MetadataRoot;
use tables::TablesStream;

/// An opened assembly: its bytes and parsed metadata, as they were read.
#[derive(Clone, PartialEq)]
pub(crate) struct Assembly {
    data: Vec<u8>,
    layout: PeLayout,
    cli_offset: usize,
    root: MetadataRoot,
    tables: TablesStream,
    types: usize,
    methods: usize,
    member_refs: usize,
}

impl fmt::Debug for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembly")
            .field("size", &self.data.len())
            .field("sections", &self.layout.sections.len())
            .field("types", &self.types)
            .field("methods", &self.methods)
            .field("member_refs", &self.member_refs)
            .finish_non_exhaustive()
    }
}
