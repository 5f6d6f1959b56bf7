//! Memory-mapped file backend.

use super::Backend;
use crate::{Error::FileError, Result};

use memmap2::Mmap;
use std::{fs, path::Path};

/// Input file mapped into memory.
///
/// The mapping is read-only. Writers never go through it: an image is always serialized to a
/// fresh buffer and written out in full, after the mapping has been dropped.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path` into memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        // The mapping is only valid while nobody truncates the file; sessions are
        // single-writer and drop the mapping before writing.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(FileError(error)),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
