#![forbid(unsafe_code)]

use e2l_types::{
    EXT2_DIR_ENTRY_HEADER_LEN, EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV, EXT2_GROUP_DESC_SIZE,
    EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET,
    EXT2_SUPERBLOCK_SIZE, GroupNumber, ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK,
    S_IFMT, S_IFREG, S_IFSOCK, ensure_slice, ext2_block_size_from_log, read_fixed, read_le_u16,
    read_le_u32, read_u8, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

/// Size of the base inode record every revision carries.
const EXT2_INODE_BASE_SIZE: usize = 128;

// ── ext2 feature flags ─────────────────────────────────────────────────────

/// ext2 incompatible feature flags (`s_feature_incompat`).
///
/// A reader that does not understand a set bit must refuse the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2IncompatFeatures(pub u32);

impl Ext2IncompatFeatures {
    pub const COMPRESSION: Self = Self(0x0001);
    pub const FILETYPE: Self = Self(0x0002);
    pub const RECOVER: Self = Self(0x0004);
    pub const JOURNAL_DEV: Self = Self(0x0008);
    pub const META_BG: Self = Self(0x0010);

    /// Bits a read-only single-group lookup can honour.
    pub const ALLOWED: Self = Self(Self::FILETYPE.0);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "COMPRESSION"),
        (0x0002, "FILETYPE"),
        (0x0004, "RECOVER"),
        (0x0008, "JOURNAL_DEV"),
        (0x0010, "META_BG"),
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Return names of all set flags. Unknown bits are omitted.
    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        Self::KNOWN
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }

    /// Return the raw unknown bits (not covered by any named constant).
    #[must_use]
    pub fn unknown_bits(self) -> u32 {
        let known_mask: u32 = Self::KNOWN.iter().map(|(bit, _)| bit).fold(0, |a, b| a | b);
        self.0 & !known_mask
    }
}

impl std::fmt::Display for Ext2IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return f.write_str("(none)");
        }
        let mut names = self.describe().join("|");
        let unknown = self.unknown_bits();
        if unknown != 0 {
            if !names.is_empty() {
                names.push('|');
            }
            names.push_str(&format!("0x{unknown:X}"));
        }
        f.write_str(&names)
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub first_ino: u32,
    pub inode_size: u16,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,

    // ── Revision and features ────────────────────────────────────────────
    pub rev_level: u32,
    pub feature_compat: u32,
    pub feature_incompat: Ext2IncompatFeatures,
    pub feature_ro_compat: u32,
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from a 1024-byte superblock region.
    ///
    /// Only structural decoding happens here; call [`validate`](Self::validate)
    /// to check magic, geometry and feature bits.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let Some(block_size) = ext2_block_size_from_log(log_block_size) else {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift",
            });
        };

        let rev_level = read_le_u32(region, 0x4C)?;
        // Revision 0 leaves these fields undefined; report the fixed values.
        let (first_ino, inode_size) = if rev_level == EXT2_GOOD_OLD_REV {
            (11, EXT2_GOOD_OLD_INODE_SIZE)
        } else {
            (read_le_u32(region, 0x54)?, read_le_u16(region, 0x58)?)
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            first_ino,
            inode_size,

            magic: read_le_u16(region, 0x38)?,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),

            rev_level,
            feature_compat: read_le_u32(region, 0x5C)?,
            feature_incompat: Ext2IncompatFeatures(read_le_u32(region, 0x60)?),
            feature_ro_compat: read_le_u32(region, 0x64)?,
        })
    }

    /// Parse an ext2 superblock from a full disk image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(image, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)?;
        Self::parse_superblock_region(region)
    }

    /// Number of block groups described by the superblock.
    #[must_use]
    pub fn groups_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        self.blocks_count
            .saturating_sub(self.first_data_block)
            .div_ceil(self.blocks_per_group)
    }

    /// On-disk stride of one inode record in the inode table.
    #[must_use]
    pub fn inode_record_size(&self) -> u16 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        }
    }

    /// Whether directory entries carry a file-type byte.
    #[must_use]
    pub fn has_filetype(&self) -> bool {
        self.feature_incompat
            .contains(Ext2IncompatFeatures::FILETYPE)
    }

    /// Byte offset of a group descriptor.
    ///
    /// The descriptor table occupies the block after the one holding the
    /// superblock: block 2 for 1K blocks, block 1 otherwise.
    #[must_use]
    pub fn group_desc_offset(&self, group: GroupNumber) -> Option<u64> {
        let gdt_start_block = if self.block_size == 1024 {
            2_u64
        } else {
            1_u64
        };
        let gdt_start_byte = gdt_start_block.checked_mul(u64::from(self.block_size))?;
        let desc_offset = u64::from(group.0).checked_mul(EXT2_GROUP_DESC_SIZE as u64)?;
        gdt_start_byte.checked_add(desc_offset)
    }

    /// Validate the fields path resolution depends on.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(self.magic),
            });
        }

        if !matches!(self.block_size, 1024 | 2048 | 4096) {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "unsupported block size",
            });
        }

        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "cannot be zero",
            });
        }

        let inode_size = self.inode_record_size();
        if !inode_size.is_power_of_two() || inode_size < EXT2_GOOD_OLD_INODE_SIZE {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two >= 128",
            });
        }
        if u32::from(inode_size) > self.block_size {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "inode_size exceeds block_size",
            });
        }

        if self.feature_incompat.unknown_bits() != 0 {
            return Err(ParseError::InvalidField {
                field: "s_feature_incompat",
                reason: "unknown incompatible feature flags present",
            });
        }
        if (self.feature_incompat.0 & !Ext2IncompatFeatures::ALLOWED.0) != 0 {
            return Err(ParseError::InvalidField {
                field: "s_feature_incompat",
                reason: "unsupported features present (COMPRESSION/RECOVER/JOURNAL_DEV/META_BG)",
            });
        }

        Ok(())
    }
}

// ── Block group descriptor ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    /// Allocated 512-byte sectors.
    pub blocks: u32,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u32,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    /// `i_block`: twelve direct pointers, then single, double and triple indirect.
    pub block: [u32; EXT2_N_BLOCKS],
}

impl Ext2Inode {
    /// Parse an ext2 inode from the first 128 bytes of an inode record.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_INODE_BASE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_INODE_BASE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mode = read_le_u16(bytes, 0x00)?;

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        // 0x6C is i_size_high for regular files and i_dir_acl for directories.
        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = if mode & S_IFMT == S_IFREG {
            u64::from(read_le_u32(bytes, 0x6C)?)
        } else {
            0
        };

        // Linux osd2 layout: uid/gid high halves.
        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);

        Ok(Self {
            mode,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            block,
        })
    }

    // ── File type detection ─────────────────────────────────────────────

    /// Extract the file type bits from the mode field.
    #[must_use]
    pub fn file_type_mode(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_mode() == S_IFREG
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_mode() == S_IFDIR
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_mode() == S_IFLNK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }

    #[must_use]
    pub fn file_type(&self) -> Ext2FileType {
        Ext2FileType::from_mode(self.mode)
    }

    // ── Block pointers ──────────────────────────────────────────────────

    /// The twelve direct block pointers.
    #[must_use]
    pub fn direct_blocks(&self) -> &[u32] {
        &self.block[..EXT2_NDIR_BLOCKS]
    }

    /// Whether any single/double/triple indirect pointer is set.
    #[must_use]
    pub fn has_indirect_blocks(&self) -> bool {
        self.block[EXT2_NDIR_BLOCKS..].iter().any(|&b| b != 0)
    }
}

// ── Directory entry parsing ─────────────────────────────────────────────────

/// ext2 file type constants from directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ext2FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl Ext2FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// Derive the directory-entry file type from an inode mode.
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::RegFile,
            S_IFDIR => Self::Dir,
            S_IFCHR => Self::Chrdev,
            S_IFBLK => Self::Blkdev,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Sock,
            S_IFLNK => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

/// A parsed ext2 directory entry (`ext2_dir_entry_2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: Vec<u8>,
}

impl Ext2DirEntry {
    /// The minimal on-disk size of this entry (padded to 4 bytes).
    #[must_use]
    pub fn actual_size(&self) -> usize {
        (EXT2_DIR_ENTRY_HEADER_LEN + usize::from(self.name_len) + 3) & !3
    }

    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// A borrowed directory entry (zero-copy reference into the block buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext2DirEntryRef<'a> {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: &'a [u8],
}

impl Ext2DirEntryRef<'_> {
    /// Convert to an owned [`Ext2DirEntry`] (allocates name bytes).
    #[must_use]
    pub fn to_owned(&self) -> Ext2DirEntry {
        Ext2DirEntry {
            inode: self.inode,
            rec_len: self.rec_len,
            name_len: self.name_len,
            file_type: self.file_type,
            name: self.name.to_vec(),
        }
    }

    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(self.name).into_owned()
    }
}

/// A zero-allocation iterator over ext2 directory entries in one block.
///
/// Yields `Result<Ext2DirEntryRef<'a>, ParseError>` for each live entry
/// (inode != 0), skipping deleted slots. Advancement is driven solely by
/// `rec_len`; the iterator stops after the first error, so a zero or
/// overrunning record can never cause it to spin.
///
/// On images without the FILETYPE feature byte 7 is the high byte of a
/// 16-bit name length, which is always 0 for names of at most 255 bytes,
/// so it decodes as [`Ext2FileType::Unknown`].
pub struct DirBlockIter<'a> {
    block: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> DirBlockIter<'a> {
    #[must_use]
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            block,
            offset: 0,
            done: false,
        }
    }

    fn fail(&mut self, err: ParseError) -> Option<Result<Ext2DirEntryRef<'a>, ParseError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for DirBlockIter<'a> {
    type Item = Result<Ext2DirEntryRef<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.offset >= self.block.len() {
                return None;
            }

            if self.offset + EXT2_DIR_ENTRY_HEADER_LEN > self.block.len() {
                return self.fail(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "directory entry header crosses block boundary",
                });
            }

            let header = (
                read_le_u32(self.block, self.offset),
                read_le_u16(self.block, self.offset + 4),
                read_u8(self.block, self.offset + 6),
                read_u8(self.block, self.offset + 7),
            );
            let (inode, rec_len, name_len, file_type_raw) = match header {
                (Ok(inode), Ok(rec_len), Ok(name_len), Ok(file_type)) => {
                    (inode, rec_len, name_len, file_type)
                }
                (Err(e), ..) | (_, Err(e), ..) | (_, _, Err(e), _) | (.., Err(e)) => {
                    return self.fail(e);
                }
            };

            if rec_len == 0 {
                return self.fail(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "directory entry rec_len is zero",
                });
            }
            if usize::from(rec_len) < EXT2_DIR_ENTRY_HEADER_LEN {
                return self.fail(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "directory entry rec_len < 8",
                });
            }

            let entry_end = self.offset + usize::from(rec_len);
            if entry_end > self.block.len() {
                return self.fail(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "directory entry extends past block boundary",
                });
            }

            // Deleted or never-used slot.
            if inode == 0 {
                self.offset = entry_end;
                continue;
            }

            let name_start = self.offset + EXT2_DIR_ENTRY_HEADER_LEN;
            let name_end = name_start + usize::from(name_len);
            if name_end > entry_end {
                return self.fail(ParseError::InvalidField {
                    field: "de_name_len",
                    reason: "name extends past rec_len",
                });
            }

            let name = &self.block[name_start..name_end];
            self.offset = entry_end;

            return Some(Ok(Ext2DirEntryRef {
                inode,
                rec_len,
                name_len,
                file_type: Ext2FileType::from_raw(file_type_raw),
                name,
            }));
        }
    }
}

/// Create an iterator over directory entries in a block buffer.
#[must_use]
pub fn iter_dir_block(block: &[u8]) -> DirBlockIter<'_> {
    DirBlockIter::new(block)
}

/// Parse all live directory entries from a single directory data block.
pub fn parse_dir_block(block: &[u8]) -> Result<Vec<Ext2DirEntry>, ParseError> {
    iter_dir_block(block)
        .map(|entry| entry.map(|e| e.to_owned()))
        .collect()
}

/// Look up a single name in a directory data block.
///
/// Matching is exact: the stored name length and bytes must both equal
/// `target`. The first match in record order wins.
pub fn lookup_in_dir_block<'a>(
    block: &'a [u8],
    target: &[u8],
) -> Result<Option<Ext2DirEntryRef<'a>>, ParseError> {
    for entry in iter_dir_block(block) {
        let entry = entry?;
        if entry.name == target {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}
