#![forbid(unsafe_code)]

use crate::{OpenOptions, parse_to_e2_error};
use e2l_error::{E2Error, Result};
use e2l_ondisk::{Ext2GroupDesc, Ext2Inode, Ext2Superblock};
use e2l_types::{
    BlockNumber, BlockSize, ByteOffset, EXT2_GROUP_DESC_SIZE, EXT2_SUPERBLOCK_OFFSET,
    EXT2_SUPERBLOCK_SIZE, GroupNumber, InodeNumber, inode_table_index,
};
use tracing::{debug, trace, warn};

/// Bytes of an inode record that carry the fields we decode.
const INODE_DECODE_LEN: usize = 128;

/// Read-only view of an ext2 image held in memory.
///
/// Borrows the image bytes for `'a` and caches the decoded superblock.
/// Every read is bounds-checked against the image length.
#[derive(Debug, Clone)]
pub struct Ext2Image<'a> {
    bytes: &'a [u8],
    superblock: Ext2Superblock,
    block_size: BlockSize,
}

impl<'a> Ext2Image<'a> {
    /// Open an image with default options (superblock validation enabled).
    pub fn open(bytes: &'a [u8]) -> Result<Self> {
        Self::open_with_options(bytes, &OpenOptions::default())
    }

    pub fn open_with_options(bytes: &'a [u8], options: &OpenOptions) -> Result<Self> {
        let region = slice_at(
            bytes,
            ByteOffset(EXT2_SUPERBLOCK_OFFSET as u64),
            EXT2_SUPERBLOCK_SIZE,
        )?;
        let superblock = Ext2Superblock::parse_superblock_region(region)
            .map_err(|e| parse_to_e2_error(&e, BlockNumber(0)))?;

        if options.skip_validation {
            debug!("superblock validation skipped");
        } else {
            superblock
                .validate()
                .map_err(|e| parse_to_e2_error(&e, BlockNumber(0)))?;
        }

        let block_size = BlockSize::new(superblock.block_size).map_err(|_| {
            E2Error::Unsupported(format!("block size {}", superblock.block_size))
        })?;

        let groups = superblock.groups_count();
        if groups > 1 {
            warn!(
                groups,
                "image has more than one block group; only group 0 is addressable"
            );
        }
        debug!(
            block_size = block_size.get(),
            inode_size = superblock.inode_record_size(),
            groups,
            image_len = bytes.len(),
            "opened ext2 image"
        );

        Ok(Self {
            bytes,
            superblock,
            block_size,
        })
    }

    // ── Image Accessor ──────────────────────────────────────────────────

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.superblock
    }

    /// The raw 1024-byte superblock region.
    #[must_use]
    pub fn superblock_bytes(&self) -> &'a [u8] {
        &self.bytes[EXT2_SUPERBLOCK_OFFSET..EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE]
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn image_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Borrow `len` bytes at `offset`, or fail with `OutOfRange`.
    pub fn bytes_at(&self, offset: ByteOffset, len: usize) -> Result<&'a [u8]> {
        slice_at(self.bytes, offset, len)
    }

    /// Borrow block `n` in full. Block 0 starts at image offset 0.
    pub fn block(&self, block: BlockNumber) -> Result<&'a [u8]> {
        let offset = block
            .to_byte_offset(self.block_size)
            .ok_or(E2Error::OutOfRange {
                offset: u64::MAX,
                len: u64::from(self.block_size.get()),
                image_len: self.image_len(),
            })?;
        self.bytes_at(offset, self.block_size.as_usize())
    }

    /// Decode the descriptor of block group `group`. Only group 0 exists here.
    pub fn block_group(&self, group: GroupNumber) -> Result<Ext2GroupDesc> {
        if group.0 != 0 {
            return Err(E2Error::Unsupported(format!(
                "block group {group}: only group 0 is addressable"
            )));
        }
        let offset = self
            .superblock
            .group_desc_offset(group)
            .ok_or_else(|| E2Error::Format("group descriptor offset overflows".to_owned()))?;
        let raw = self.bytes_at(ByteOffset(offset), EXT2_GROUP_DESC_SIZE)?;
        let gdt_block = BlockNumber(offset / u64::from(self.block_size.get()));
        Ext2GroupDesc::parse_from_bytes(raw).map_err(|e| parse_to_e2_error(&e, gdt_block))
    }

    // ── Inode Resolver ──────────────────────────────────────────────────

    /// Load inode `ino` from the first group's inode table.
    ///
    /// `ino` is not checked against `s_inodes_per_group`; a number past the
    /// table simply reads whatever follows, or fails with `OutOfRange` at the
    /// end of the image.
    pub fn inode(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        if ino.0 == 0 {
            return Err(E2Error::InvalidInode(ino.0));
        }

        let gd = self.block_group(GroupNumber(0))?;
        let record_size = u64::from(self.superblock.inode_record_size());
        let table = BlockNumber(u64::from(gd.inode_table))
            .to_byte_offset(self.block_size)
            .ok_or_else(|| E2Error::Format("inode table offset overflows".to_owned()))?;
        let within = u64::from(inode_table_index(ino)) * record_size;
        let offset = table.checked_add(within).ok_or(E2Error::OutOfRange {
            offset: u64::MAX,
            len: INODE_DECODE_LEN as u64,
            image_len: self.image_len(),
        })?;

        trace!(ino = ino.0, offset = offset.0, "reading inode");
        let raw = self.bytes_at(offset, INODE_DECODE_LEN)?;
        let block = BlockNumber(offset.0 / u64::from(self.block_size.get()));
        Ext2Inode::parse_from_bytes(raw).map_err(|e| parse_to_e2_error(&e, block))
    }

    /// The root directory inode (inode 2).
    pub fn root(&self) -> Result<Ext2Inode> {
        self.inode(InodeNumber::ROOT)
    }
}

fn slice_at(bytes: &[u8], offset: ByteOffset, len: usize) -> Result<&[u8]> {
    let out_of_range = || E2Error::OutOfRange {
        offset: offset.0,
        len: len as u64,
        image_len: bytes.len() as u64,
    };
    let start = usize::try_from(offset.0).map_err(|_| out_of_range())?;
    let end = start.checked_add(len).ok_or_else(out_of_range)?;
    bytes.get(start..end).ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2l_harness::ImageBuilder;

    fn built(block_size: u32) -> Vec<u8> {
        ImageBuilder::new()
            .block_size(block_size)
            .finish()
            .expect("build image")
            .into_bytes()
    }

    #[test]
    fn open_decodes_geometry() {
        for bs in [1024_u32, 2048, 4096] {
            let bytes = built(bs);
            let image = Ext2Image::open(&bytes).expect("open");
            assert_eq!(image.block_size().get(), bs);
            assert_eq!(image.superblock().magic, 0xEF53);
            assert_eq!(image.image_len(), bytes.len() as u64);
            assert_eq!(image.superblock_bytes().len(), 1024);
            assert_eq!(image.superblock_bytes(), &bytes[1024..2048]);
        }
    }

    #[test]
    fn open_rejects_short_image() {
        let err = Ext2Image::open(&[0_u8; 1500]).unwrap_err();
        assert!(
            matches!(
                err,
                E2Error::OutOfRange {
                    offset: 1024,
                    len: 1024,
                    image_len: 1500,
                }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn open_rejects_bad_magic_unless_skipped() {
        let mut bytes = built(1024);
        bytes[1024 + 0x38] = 0;
        assert!(matches!(
            Ext2Image::open(&bytes).unwrap_err(),
            E2Error::Format(_)
        ));

        let options = OpenOptions {
            skip_validation: true,
        };
        let image = Ext2Image::open_with_options(&bytes, &options).expect("skip validation");
        assert_ne!(image.superblock().magic, 0xEF53);
    }

    #[test]
    fn block_zero_is_image_start() {
        let bytes = built(1024);
        let image = Ext2Image::open(&bytes).unwrap();
        let zero = image.block(BlockNumber(0)).unwrap();
        assert_eq!(zero.as_ptr(), bytes.as_ptr());
        assert_eq!(zero.len(), 1024);

        let one = image.block(BlockNumber(1)).unwrap();
        assert_eq!(one, &bytes[1024..2048]);
    }

    #[test]
    fn block_past_end_is_out_of_range() {
        let bytes = built(1024);
        let image = Ext2Image::open(&bytes).unwrap();
        let blocks = bytes.len() as u64 / 1024;
        assert!(image.block(BlockNumber(blocks - 1)).is_ok());
        assert!(matches!(
            image.block(BlockNumber(blocks)).unwrap_err(),
            E2Error::OutOfRange { .. }
        ));
        assert!(matches!(
            image.block(BlockNumber(u64::MAX)).unwrap_err(),
            E2Error::OutOfRange { .. }
        ));
    }

    #[test]
    fn bytes_at_checks_overflow() {
        let bytes = built(1024);
        let image = Ext2Image::open(&bytes).unwrap();
        assert!(image.bytes_at(ByteOffset(u64::MAX), 2).is_err());
        assert!(image.bytes_at(ByteOffset(0), bytes.len()).is_ok());
        assert!(image.bytes_at(ByteOffset(1), bytes.len()).is_err());
    }

    #[test]
    fn only_group_zero_is_addressable() {
        let bytes = built(2048);
        let image = Ext2Image::open(&bytes).unwrap();
        let gd = image.block_group(GroupNumber(0)).unwrap();
        assert!(gd.inode_table > 0);
        let err = image.block_group(GroupNumber(1)).unwrap_err();
        assert!(matches!(err, E2Error::Unsupported(_)));
        assert_eq!(err.to_errno(), libc::EOPNOTSUPP);
    }

    #[test]
    fn inode_zero_is_invalid() {
        let bytes = built(1024);
        let image = Ext2Image::open(&bytes).unwrap();
        assert!(matches!(
            image.inode(InodeNumber(0)).unwrap_err(),
            E2Error::InvalidInode(0)
        ));
    }

    #[test]
    fn root_is_a_directory() {
        for inode_size in [128_u16, 256] {
            let bytes = ImageBuilder::new()
                .inode_size(inode_size)
                .finish()
                .unwrap()
                .into_bytes();
            let image = Ext2Image::open(&bytes).unwrap();
            let root = image.root().unwrap();
            assert!(root.is_dir(), "inode_size={inode_size}");
            assert_eq!(root, image.inode(InodeNumber::ROOT).unwrap());
        }
    }

    #[test]
    fn inode_past_image_end_is_out_of_range() {
        let bytes = built(1024);
        let image = Ext2Image::open(&bytes).unwrap();
        assert!(matches!(
            image.inode(InodeNumber(u32::MAX)).unwrap_err(),
            E2Error::OutOfRange { .. }
        ));
    }

    #[test]
    fn large_block_sizes_are_unsupported() {
        let mut bytes = built(4096);
        bytes[1024 + 0x18..1024 + 0x1C].copy_from_slice(&3_u32.to_le_bytes());
        let err = Ext2Image::open(&bytes).unwrap_err();
        assert!(matches!(err, E2Error::Unsupported(_)), "got {err:?}");
    }
}
