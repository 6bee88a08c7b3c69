//! Firmware image loading.
//!
//! The image is an opaque binary; the device validates it itself. Loading
//! only checks what the wire protocol can express: a non-empty image whose
//! size fits the 32-bit START field.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;
use crate::session::chunk_count;
use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A firmware image ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    path: Option<PathBuf>,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image from disk.
    ///
    /// A missing file is reported as [`Error::FileNotFound`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;

        let mut image = Self::from_bytes(data)?;
        image.path = Some(path.to_path_buf());
        Ok(image)
    }

    /// Wrap an in-memory image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyImage);
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::ImageTooLarge(data.len() as u64));
        }
        Ok(Self { path: None, data })
    }

    /// Source path, if loaded from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; empty images are rejected on load.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of DATA frames the upload will send.
    pub fn chunk_count(&self) -> usize {
        chunk_count(self.data.len())
    }

    /// CRC16-XMODEM of the whole image, for display.
    pub fn crc16(&self) -> u16 {
        crc16_xmodem(&self.data)
    }
}
