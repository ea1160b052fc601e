#![forbid(unsafe_code)]
//! Read-only path resolution inside single-group ext2 images.
//!
//! The layers, leaf first:
//!
//! | Layer | Entry points |
//! |-------|--------------|
//! | Image Accessor | [`Ext2Image::superblock`], [`Ext2Image::block`], [`Ext2Image::block_group`] |
//! | Inode Resolver | [`Ext2Image::inode`], [`Ext2Image::root`] |
//! | Directory Scanner | [`Ext2Image::lookup`], [`Ext2Image::read_dir`] |
//! | Path Resolver | [`Ext2Image::resolve`], [`Ext2Image::resolve_raw`], [`split_path`] |
//!
//! The image is never copied or mutated. [`Ext2Image`] borrows it, and every
//! slice handed out borrows from the same buffer.

mod dir;
mod image;
mod path;

pub use e2l_error::{E2Error, Result};
pub use e2l_ondisk::{Ext2DirEntry, Ext2FileType, Ext2GroupDesc, Ext2Inode, Ext2Superblock};
pub use e2l_types::{BlockNumber, BlockSize, ByteOffset, GroupNumber, InodeNumber, ParseError};
pub use image::Ext2Image;
pub use path::split_path;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options for opening an ext2 image.
///
/// Validation is on by default. Turn it off only to inspect an image whose
/// superblock is known to be damaged.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Decode the superblock without checking magic, geometry or features.
    pub skip_validation: bool,
}

/// An image file read fully into memory.
///
/// Owns the bytes and lends [`Ext2Image`] views over them.
#[derive(Debug, Clone)]
pub struct ImageFile {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl ImageFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        debug!(path = %path.display(), len = bytes.len(), "loaded image file");
        Ok(Self { path, bytes })
    }

    /// Wrap bytes that are already in memory.
    #[must_use]
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn image(&self) -> Result<Ext2Image<'_>> {
        Ext2Image::open(&self.bytes)
    }

    pub fn image_with_options(&self, options: &OpenOptions) -> Result<Ext2Image<'_>> {
        Ext2Image::open_with_options(&self.bytes, options)
    }
}

/// Convert a decode failure into the runtime error taxonomy.
///
/// `block` names the block whose bytes were being decoded.
pub(crate) fn parse_to_e2_error(err: &ParseError, block: BlockNumber) -> E2Error {
    match err {
        ParseError::InvalidMagic { .. } => E2Error::Format(err.to_string()),
        // Scope limits: features, oversized blocks.
        ParseError::InvalidField { field, reason }
            if field.contains("feature")
                || reason.contains("unsupported")
                || reason.contains("invalid shift") =>
        {
            E2Error::Unsupported(format!("{field}: {reason}"))
        }
        ParseError::InvalidField { field, reason } if field.starts_with("s_") => {
            E2Error::Format(format!("{field}: {reason}"))
        }
        ParseError::InvalidField { reason, .. } => E2Error::Malformed {
            block: block.0,
            detail: (*reason).to_owned(),
        },
        ParseError::InsufficientData { .. } => E2Error::Malformed {
            block: block.0,
            detail: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2l_harness::ImageBuilder;

    #[test]
    fn parse_error_mapping() {
        let e = parse_to_e2_error(
            &ParseError::InvalidField {
                field: "s_feature_incompat",
                reason: "unknown incompatible feature flags present",
            },
            BlockNumber(0),
        );
        assert!(matches!(e, E2Error::Unsupported(_)));

        let e = parse_to_e2_error(
            &ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "unsupported block size",
            },
            BlockNumber(0),
        );
        assert!(matches!(e, E2Error::Unsupported(_)));

        let e = parse_to_e2_error(
            &ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two >= 128",
            },
            BlockNumber(0),
        );
        assert!(matches!(e, E2Error::Format(_)));

        let e = parse_to_e2_error(
            &ParseError::InvalidMagic {
                expected: 0xEF53,
                actual: 0,
            },
            BlockNumber(0),
        );
        assert!(matches!(e, E2Error::Format(_)));

        let e = parse_to_e2_error(
            &ParseError::InvalidField {
                field: "de_rec_len",
                reason: "directory entry rec_len is zero",
            },
            BlockNumber(17),
        );
        match e {
            E2Error::Malformed { block, detail } => {
                assert_eq!(block, 17);
                assert_eq!(detail, "directory entry rec_len is zero");
            }
            other => panic!("expected Malformed, got {other:?}"),
        }

        let e = parse_to_e2_error(
            &ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: 40,
            },
            BlockNumber(9),
        );
        assert!(matches!(e, E2Error::Malformed { block: 9, .. }));
    }

    #[test]
    fn open_options_default_validates() {
        assert!(!OpenOptions::default().skip_validation);
    }

    #[test]
    fn image_file_from_bytes() {
        let bytes = ImageBuilder::new().finish().unwrap().into_bytes();
        let file = ImageFile::from_bytes("mem.img", bytes);
        assert_eq!(file.path(), Path::new("mem.img"));
        let image = file.image().expect("open");
        assert_eq!(image.resolve("/").unwrap(), Some(InodeNumber::ROOT));
    }

    #[test]
    fn image_file_open_missing_is_io_error() {
        let err = ImageFile::open("/nonexistent/e2l/image.img").unwrap_err();
        assert!(matches!(err, E2Error::Io(_)));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }
}
