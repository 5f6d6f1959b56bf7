//! Hand-built PE images.

use crate::image::pe::{build_pe, cli_header, CLI_HEADER_SIZE, TEXT_RVA};

/// A PE32 DLL whose CLI header points at `metadata`, placed right after it in `.text`.
pub fn minimal_pe(metadata: &[u8]) -> Vec<u8> {
    let mut text = cli_header(TEXT_RVA + CLI_HEADER_SIZE as u32, metadata.len() as u32);
    text.extend_from_slice(metadata);
    build_pe(&text).unwrap()
}
