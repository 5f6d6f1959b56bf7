//! Memory-mapped output for writing images.
//!
//! [`Output`] maps a temporary sibling of the target path, lets the caller fill it, and on
//! [`Output::finalize`] flushes the mapping and renames the temporary file over the target. An
//! output that is dropped without being finalized removes its temporary file, so the target is
//! either left untouched or fully replaced.

use std::{
    ffi::OsString,
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A memory-mapped output file that is moved into place once complete.
pub struct Output {
    /// The memory mapping of the temporary file
    mmap: MmapMut,
    /// Where the data is written until finalization
    temp_path: PathBuf,
    /// The final destination
    target_path: PathBuf,
    /// Whether the file has been moved into place
    finalized: bool,
}

fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(".cilhook-tmp");
    target.with_file_name(name)
}

impl Output {
    /// Create a mapped temporary file of `size` bytes next to `target_path`.
    ///
    /// # Errors
    /// Returns [`Error::Write`] if the temporary file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&target_path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::write(&target_path, e))?;

        file.set_len(size).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Error::write(&target_path, e)
        })?;

        let mmap = unsafe {
            MmapOptions::new().map_mut(&file).map_err(|e| {
                let _ = std::fs::remove_file(&temp_path);
                Error::write(&target_path, e)
            })?
        };

        Ok(Self {
            mmap,
            temp_path,
            target_path,
            finalized: false,
        })
    }

    /// Writes data at a specific offset in the file.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the write would exceed the file size.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let Some(end) = offset.checked_add(data.len()) else {
            return Err(Error::OutOfBounds);
        };
        if end > self.mmap.len() {
            return Err(Error::OutOfBounds);
        }

        self.mmap[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the output in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// The final destination
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flush the mapping and move the file over the target.
    ///
    /// # Errors
    /// Returns [`Error::Write`] if flushing or renaming fails; the temporary file is removed.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| Error::write(&self.target_path, e))?;

        std::fs::rename(&self.temp_path, &self.target_path)
            .map_err(|e| Error::write(&self.target_path, e))?;

        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finalize_replaces_target() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("image.bin");
        std::fs::write(&target_path, b"old contents").unwrap();

        let mut output = Output::create(&target_path, 4).unwrap();
        assert_eq!(output.size(), 4);
        output.write_at(0, b"MZ\x90\x00").unwrap();
        output.finalize().unwrap();

        assert_eq!(std::fs::read(&target_path).unwrap(), b"MZ\x90\x00");
        assert!(!temp_path_for(&target_path).exists());
    }

    #[test]
    fn drop_keeps_target() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("image.bin");
        std::fs::write(&target_path, b"old").unwrap();

        {
            let mut output = Output::create(&target_path, 8).unwrap();
            output.write_at(0, b"new").unwrap();
        }

        assert_eq!(std::fs::read(&target_path).unwrap(), b"old");
        assert!(!temp_path_for(&target_path).exists());
    }

    #[test]
    fn write_bounds() {
        let temp_dir = tempdir().unwrap();
        let mut output = Output::create(temp_dir.path().join("x.bin"), 4).unwrap();
        assert!(matches!(output.write_at(2, b"abc"), Err(Error::OutOfBounds)));
        assert!(matches!(output.write_at(usize::MAX, b"a"), Err(Error::OutOfBounds)));
    }

    #[test]
    fn missing_directory() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("missing").join("x.bin");
        assert!(matches!(
            Output::create(&target, 4),
            Err(Error::Write {
                cause: crate::WriteCause::MissingDirectory,
                ..
            })
        ));
    }
}
