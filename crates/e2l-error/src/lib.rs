#![forbid(unsafe_code)]
//! Error types for e2lookup.
//!
//! # Error Taxonomy
//!
//! e2lookup uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e2l-types` | On-disk format violations detected while decoding a byte slice |
//! | Runtime | `E2Error` | `e2l-error` (this crate) | Errors returned by the image accessor, resolver and CLI |
//!
//! ## Mapping Policy: ParseError → E2Error
//!
//! `e2l-error` does not depend on `e2l-types`. The conversion lives in
//! `e2l-core`, which knows which block was being decoded when a parse failed:
//!
//! | ParseError Variant | E2Error Variant |
//! |--------------------|-----------------|
//! | `InsufficientData` | `Malformed { block, detail }` |
//! | `InvalidMagic` | `Format(detail)` |
//! | `InvalidField` | `Malformed` / `Format` / `Unsupported` depending on the field |
//!
//! Reads that would run past the end of the image never reach the parser:
//! the image accessor bounds-checks them first and returns `OutOfRange`.
//!
//! ## "Not found" is not an error
//!
//! A missing path component is an expected outcome and is reported as
//! `Ok(None)` by the resolver. `E2Error::NotFound` only appears when a caller
//! explicitly requires the path to exist.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `OutOfRange` | `EIO` |
//! | `Malformed` | `EIO` |
//! | `Unsupported` | `EOPNOTSUPP` |
//! | `InvalidInode` | `EINVAL` |
//! | `Format` | `EINVAL` |
//! | `InvalidPath` | `EINVAL` |
//! | `NotFound` | `ENOENT` |
//! | `NotDirectory` | `ENOTDIR` |

use thiserror::Error;

/// Unified error type for all e2lookup operations.
#[derive(Debug, Error)]
pub enum E2Error {
    /// Operating system I/O error while loading an image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A computed byte range falls outside the image.
    ///
    /// Indicates a truncated image or a corrupt block/inode pointer.
    #[error("read of {len} bytes at offset {offset} exceeds image length {image_len}")]
    OutOfRange {
        offset: u64,
        len: u64,
        image_len: u64,
    },

    /// The image uses a structure this implementation does not handle
    /// (additional block groups, large blocks, incompatible features).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// On-disk metadata is inconsistent at a known block.
    ///
    /// Raised for zero-length or overrunning directory records and for
    /// records that cannot be decoded.
    #[error("malformed metadata at block {block}: {detail}")]
    Malformed { block: u64, detail: String },

    /// Inode number 0 (or another reserved value) was requested.
    #[error("invalid inode number {0}")]
    InvalidInode(u32),

    /// The image is not an ext2 filesystem this build can read.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// The path string cannot be resolved as given (e.g. not absolute).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A path that was required to exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory operation was attempted on a non-directory inode.
    #[error("not a directory")]
    NotDirectory,
}

impl E2Error {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive, so adding a variant is a compile error
    /// until its errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::OutOfRange { .. } | Self::Malformed { .. } => libc::EIO,
            Self::Unsupported(_) => libc::EOPNOTSUPP,
            Self::InvalidInode(_) | Self::Format(_) | Self::InvalidPath(_) => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
        }
    }

    /// Whether this error reflects a damaged image rather than a caller
    /// mistake or a scope limit.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::Malformed { .. })
    }
}

/// Result alias using `E2Error`.
pub type Result<T> = std::result::Result<T, E2Error>;
