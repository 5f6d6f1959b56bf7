//! Raw image input.
//!
//! A [`File`] owns the bytes of an image, either memory-mapped from disk ([`physical::Physical`])
//! or held in a buffer ([`memory::Memory`]). Both sources sit behind the [`Backend`] trait so the
//! image reader does not care where the bytes came from.

pub(crate) mod io;
pub mod memory;
pub mod parser;
pub mod physical;

use std::path::{Path, PathBuf};

use memory::Memory;
use physical::Physical;

use crate::{Error::OutOfBounds, Result};

/// Backend trait for file data sources.
///
/// The trait provides a common interface for accessing image data regardless of whether it's
/// loaded from a file on disk or from a memory buffer.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };
        self.data().get(offset..end).ok_or(OutOfBounds)
    }

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }
}

/// The bytes of an image together with the path they were loaded from, if any.
pub struct File {
    data: Box<dyn Backend>,
    path: Option<PathBuf>,
}

impl File {
    /// Memory-map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Empty`] for an empty file.
    pub fn from_file(path: &Path) -> Result<File> {
        let physical = Physical::new(path)?;
        Self::load(Box::new(physical), Some(path.to_path_buf()))
    }

    /// Take ownership of an in-memory buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Box::new(Memory::new(data)), None)
    }

    fn load(data: Box<dyn Backend>, path: Option<PathBuf>) -> Result<File> {
        if data.len() == 0 {
            return Err(crate::Error::Empty);
        }

        Ok(File { data, path })
    }

    /// Returns the full contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns a bounds-checked slice of the contents.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the contents.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Returns the length of the contents in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the contents are empty. Never true for a successfully loaded file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// The path this file was loaded from, if it came from disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_mem() {
        let file = File::from_mem(vec![b'M', b'Z', 0x90, 0x00]).unwrap();
        assert_eq!(file.len(), 4);
        assert!(file.path().is_none());
        assert_eq!(file.data_slice(1, 2).unwrap(), b"Z\x90");
        assert!(file.data_slice(3, 2).is_err());
        assert!(file.data_slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn empty_is_rejected() {
        assert!(matches!(File::from_mem(Vec::new()), Err(crate::Error::Empty)));
    }

    #[test]
    fn from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.dll");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let file = File::from_file(&path).unwrap();
        assert_eq!(file.data(), &[1, 2, 3]);
        assert_eq!(file.path(), Some(path.as_path()));
    }
}
