//! `#Strings` and `#Blob` heaps: lookups into the original data and append-only growth.

use std::collections::HashMap;

use crate::{Error::OutOfBounds, Result};

/// Read an ECMA-335 compressed unsigned integer, advancing `offset`.
pub(crate) fn read_compressed(data: &[u8], offset: &mut usize) -> Result<u32> {
    let first = *data.get(*offset).ok_or(OutOfBounds)?;
    let (len, value) = match first {
        byte if byte & 0x80 == 0 => (1, u32::from(byte)),
        byte if byte & 0xC0 == 0x80 => (2, u32::from(byte & 0x3F)),
        byte if byte & 0xE0 == 0xC0 => (4, u32::from(byte & 0x1F)),
        byte => return Err(malformed_error!("Invalid compressed integer lead byte {:#x}", byte)),
    };
    let tail = data.get(*offset + 1..*offset + len).ok_or(OutOfBounds)?;
    let value = tail
        .iter()
        .fold(value, |acc, byte| (acc << 8) | u32::from(*byte));
    *offset += len;
    Ok(value)
}

/// Append `value` as an ECMA-335 compressed unsigned integer.
// Each arm's range bounds the cast
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn push_compressed(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => out.extend_from_slice(&(value as u16 | 0x8000).to_be_bytes()),
        0x4000..=0x1FFF_FFFF => out.extend_from_slice(&(value | 0xC000_0000).to_be_bytes()),
        _ => return Err(malformed_error!("Value {:#x} is too large to compress", value)),
    }
    Ok(())
}

/// Null-terminated UTF-8 string at `offset` of a `#Strings` heap.
pub(crate) fn string_at(heap: &[u8], offset: u32) -> Result<&str> {
    let start = offset as usize;
    let tail = heap.get(start..).ok_or(OutOfBounds)?;
    let end = tail.iter().position(|byte| *byte == 0).ok_or(OutOfBounds)?;
    std::str::from_utf8(&tail[..end])
        .map_err(|_| malformed_error!("String at {:#x} is not valid UTF-8", offset))
}

/// Length-prefixed blob at `offset` of a `#Blob` heap.
pub(crate) fn blob_at(heap: &[u8], offset: u32) -> Result<&[u8]> {
    let mut position = offset as usize;
    let len = read_compressed(heap, &mut position)? as usize;
    heap.get(position..position + len).ok_or(OutOfBounds)
}

/// Which kind of heap a [`HeapBuilder`] grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeapKind {
    Strings,
    Blob,
}

/// An existing heap plus appended entries. Offsets of existing entries never move.
#[derive(Debug, Clone)]
pub(crate) struct HeapBuilder {
    kind: HeapKind,
    data: Vec<u8>,
    added: HashMap<Vec<u8>, u32>,
}

impl HeapBuilder {
    pub(crate) fn new(kind: HeapKind, original: &[u8]) -> Self {
        let mut data = original.to_vec();
        if data.is_empty() {
            // Offset 0 is the empty string or blob
            data.push(0);
        }
        HeapBuilder {
            kind,
            data,
            added: HashMap::new(),
        }
    }

    /// Append an entry, reusing one appended earlier with the same content. Empty entries map to
    /// offset 0.
    pub(crate) fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(offset) = self.added.get(value) {
            return Ok(*offset);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("Heap exceeds 4 GiB"))?;
        match self.kind {
            HeapKind::Strings => {
                if value.contains(&0) {
                    return Err(malformed_error!("Heap strings cannot contain NUL"));
                }
                self.data.extend_from_slice(value);
                self.data.push(0);
            }
            HeapKind::Blob => {
                let len = u32::try_from(value.len())
                    .map_err(|_| malformed_error!("Blob of {} bytes is too large", value.len()))?;
                push_compressed(&mut self.data, len)?;
                self.data.extend_from_slice(value);
            }
        }
        self.added.insert(value.to_vec(), offset);
        Ok(offset)
    }

    /// Append a string.
    pub(crate) fn add_str(&mut self, value: &str) -> Result<u32> {
        self.add(value.as_bytes())
    }

    /// True if offsets into this heap need 4 bytes
    pub(crate) fn is_large(&self) -> bool {
        self.data.len() > usize::from(u16::MAX)
    }

    /// Heap bytes, zero-padded to a 4-byte boundary
    pub(crate) fn into_bytes(mut self) -> Vec<u8> {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_integers() {
        for (value, encoded) in [
            (0x03_u32, vec![0x03]),
            (0x7F, vec![0x7F]),
            (0x80, vec![0x80, 0x80]),
            (0x2E57, vec![0xAE, 0x57]),
            (0x4000, vec![0xC0, 0x00, 0x40, 0x00]),
            (0x1FFF_FFFF, vec![0xDF, 0xFF, 0xFF, 0xFF]),
        ] {
            let mut out = Vec::new();
            push_compressed(&mut out, value).unwrap();
            assert_eq!(out, encoded);
            let mut offset = 0;
            assert_eq!(read_compressed(&out, &mut offset).unwrap(), value);
            assert_eq!(offset, encoded.len());
        }
        assert!(push_compressed(&mut Vec::new(), 0x2000_0000).is_err());
        assert!(read_compressed(&[0xFF], &mut 0).is_err());
        assert!(read_compressed(&[0x80], &mut 0).is_err());
    }

    #[test]
    fn strings_grow_without_moving() {
        let original = b"\0<Module>\0Game\0";
        let mut heap = HeapBuilder::new(HeapKind::Strings, original);
        assert_eq!(string_at(original, 1).unwrap(), "<Module>");

        let offset = heap.add_str("CilHook").unwrap();
        assert_eq!(offset, original.len() as u32);
        assert_eq!(heap.add_str("CilHook").unwrap(), offset);
        assert_eq!(heap.add_str("").unwrap(), 0);
        assert!(heap.add_str("a\0b").is_err());

        let bytes = heap.into_bytes();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(string_at(&bytes, 10).unwrap(), "Game");
        assert_eq!(string_at(&bytes, offset).unwrap(), "CilHook");
        assert!(string_at(&bytes, 1000).is_err());
    }

    #[test]
    fn blobs_are_length_prefixed() {
        let mut heap = HeapBuilder::new(HeapKind::Blob, &[]);
        let offset = heap.add(&[0x00, 0x00, 0x01]).unwrap();
        assert_eq!(offset, 1);
        let bytes = heap.into_bytes();
        assert_eq!(blob_at(&bytes, offset).unwrap(), &[0x00, 0x00, 0x01]);
        assert_eq!(blob_at(&bytes, 0).unwrap(), &[] as &[u8]);
    }
}
