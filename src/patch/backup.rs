//! Single-generation backup of the host image.

use std::path::{Path, PathBuf};

use log::info;

use crate::{Error, Result};

/// The backup of an image, kept next to it as `<image><suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    image: PathBuf,
    backup: PathBuf,
}

impl Backup {
    /// Backup of `image` using `suffix` (e.g. `.orig`).
    pub fn new(image: impl Into<PathBuf>, suffix: &str) -> Self {
        let image = image.into();
        let mut name = image.as_os_str().to_owned();
        name.push(suffix);
        Backup {
            image,
            backup: PathBuf::from(name),
        }
    }

    /// Path of the image
    #[must_use]
    pub fn image_path(&self) -> &Path {
        &self.image
    }

    /// Path of the backup file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.backup
    }

    /// True if a backup file is present
    #[must_use]
    pub fn exists(&self) -> bool {
        self.backup.is_file()
    }

    /// Copy the image over the backup, replacing any previous backup.
    ///
    /// # Errors
    /// Returns [`Error::Write`] if the copy fails.
    pub fn create(&self) -> Result<&Path> {
        std::fs::copy(&self.image, &self.backup).map_err(|e| Error::write(&self.backup, e))?;
        info!("Backed up {} to {}", self.image.display(), self.backup.display());
        Ok(&self.backup)
    }

    /// Copy the backup back over the image. The backup is kept.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if there is no backup and [`Error::Write`] if the copy fails.
    pub fn restore(&self) -> Result<()> {
        if !self.exists() {
            return Err(Error::FileError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no backup at {}", self.backup.display()),
            )));
        }
        std::fs::copy(&self.backup, &self.image).map_err(|e| Error::write(&self.image, e))?;
        info!("Restored {} from {}", self.image.display(), self.backup.display());
        Ok(())
    }
}
