#![forbid(unsafe_code)]
//! Unit-carrying newtypes, decode errors and bounds-checked little-endian
//! readers shared by every ext2 layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const EXT2_SUPERBLOCK_OFFSET: usize = 1024;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Revision 0 images have fixed 128-byte inodes and no `s_inode_size` field.
pub const EXT2_GOOD_OLD_REV: u32 = 0;
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;

/// On-disk group descriptor size (ext2 has no 64-bit descriptors).
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

/// Number of direct block pointers in `i_block`.
pub const EXT2_NDIR_BLOCKS: usize = 12;
/// Total number of block pointers in `i_block` (direct + 3 indirect levels).
pub const EXT2_N_BLOCKS: usize = 15;

/// Maximum length of a single directory-entry name.
pub const EXT2_NAME_LEN: usize = 255;
/// Fixed header of `ext2_dir_entry_2`: inode, rec_len, name_len, file_type.
pub const EXT2_DIR_ENTRY_HEADER_LEN: usize = 8;

// ── Units ───────────────────────────────────────────────────────────────────

/// Physical block number within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// ext2 inode number. Numbering starts at 1; 0 marks an unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

/// Block size in bytes, always a power of two between 1 KiB and 64 KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Absolute byte position inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl InodeNumber {
    pub const ROOT: Self = Self(2);

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl BlockSize {
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if value.is_power_of_two() && (1024..=65536).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ParseError::InvalidField {
                field: "block_size",
                reason: "not a power of two between 1024 and 65536",
            })
        }
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a `usize` for slice lengths.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of blocks needed to hold `bytes` bytes.
    #[must_use]
    pub fn blocks_for(self, bytes: u64) -> u64 {
        bytes.div_ceil(u64::from(self.0))
    }
}

impl BlockNumber {
    /// Byte position of the start of this block, or `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self, block_size: BlockSize) -> Option<ByteOffset> {
        self.0
            .checked_mul(u64::from(block_size.get()))
            .map(ByteOffset)
    }
}

impl ByteOffset {
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

macro_rules! display_inner {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }
        )+
    };
}

display_inner!(BlockNumber, InodeNumber, BlockSize, GroupNumber, ByteOffset);

// ── Decode errors ───────────────────────────────────────────────────────────

/// Failure to decode an on-disk structure from a byte slice.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("need {needed} bytes at offset {offset}, only {actual} available")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Readers ─────────────────────────────────────────────────────────────────

/// Borrow `data[offset..offset + len]` or report how much was missing.
#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let end = offset.checked_add(len).ok_or(ParseError::InvalidField {
        field: "offset",
        reason: "overflow",
    })?;
    data.get(offset..end)
        .ok_or_else(|| ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        })
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let mut out = [0_u8; N];
    out.copy_from_slice(ensure_slice(data, offset, N)?);
    Ok(out)
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    let [byte] = read_fixed::<1>(data, offset)?;
    Ok(byte)
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    read_fixed(data, offset).map(u16::from_le_bytes)
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    read_fixed(data, offset).map(u32::from_le_bytes)
}

/// Decode a fixed-width, NUL-padded label such as `s_volume_name`.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let len = bytes.iter().take_while(|&&b| b != 0).count();
    String::from_utf8_lossy(&bytes[..len]).trim().to_owned()
}

/// Decode `s_log_block_size` (block size is `1024 << log`).
#[must_use]
pub fn ext2_block_size_from_log(log_block_size: u32) -> Option<u32> {
    let shift = log_block_size.checked_add(10)?;
    1_u32.checked_shl(shift)
}

/// Index of an inode within the inode table of the first group.
///
/// Single-group images index the table directly by `ino - 1`.
#[must_use]
pub fn inode_table_index(ino: InodeNumber) -> u32 {
    ino.0.saturating_sub(1)
}

// ── Mode bits ───────────────────────────────────────────────────────────────

pub const S_IFMT: u16 = 0o170_000;
pub const S_IFIFO: u16 = 0o010_000;
pub const S_IFCHR: u16 = 0o020_000;
pub const S_IFDIR: u16 = 0o040_000;
pub const S_IFBLK: u16 = 0o060_000;
pub const S_IFREG: u16 = 0o100_000;
pub const S_IFLNK: u16 = 0o120_000;
pub const S_IFSOCK: u16 = 0o140_000;
