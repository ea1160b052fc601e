#![forbid(unsafe_code)]
//! Synthetic single-group ext2 images.
//!
//! [`ImageBuilder`] lays out a filesystem the way `mke2fs` does for a tiny
//! volume: boot area, superblock, one group descriptor, block and inode
//! bitmaps, the inode table, then data blocks in allocation order. The
//! result is plain bytes, so tests can corrupt any structure afterwards
//! through [`BuiltImage`].

use anyhow::{Context, Result, bail, ensure};
use e2l_ondisk::{Ext2FileType, Ext2IncompatFeatures};
use e2l_types::{
    EXT2_DIR_ENTRY_HEADER_LEN, EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV, EXT2_NAME_LEN,
    EXT2_NDIR_BLOCKS, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET, InodeNumber, S_IFDIR, S_IFMT,
    S_IFREG,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// First inode number handed out to user files.
pub const FIRST_USER_INO: u32 = 11;

const DEFAULT_INODES_PER_GROUP: u32 = 32;
const TIMESTAMP: u32 = 1_700_000_000;

#[derive(Debug, Clone)]
enum DirRecord {
    Live {
        ino: u32,
        name: Vec<u8>,
        file_type: Ext2FileType,
    },
    Deleted {
        name: Vec<u8>,
    },
    BlockBreak,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Dir(Vec<DirRecord>),
    Data(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Node {
    mode: u16,
    links: u16,
    kind: NodeKind,
}

/// Builder for a small ext2 image with a single block group.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    block_size: u32,
    inode_size: u16,
    rev_level: u32,
    filetype: bool,
    inodes_per_group: u32,
    extra_incompat: u32,
    volume_name: String,
    nodes: BTreeMap<u32, Node>,
    next_ino: u32,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// A 1K-block, revision-1 image with 128-byte inodes and only `/`.
    #[must_use]
    pub fn new() -> Self {
        let root = InodeNumber::ROOT.0;
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            Node {
                mode: S_IFDIR | 0o755,
                links: 2,
                kind: NodeKind::Dir(vec![dot_record(root), dotdot_record(root)]),
            },
        );
        Self {
            block_size: 1024,
            inode_size: EXT2_GOOD_OLD_INODE_SIZE,
            rev_level: 1,
            filetype: true,
            inodes_per_group: DEFAULT_INODES_PER_GROUP,
            extra_incompat: 0,
            volume_name: String::new(),
            nodes,
            next_ino: FIRST_USER_INO,
        }
    }

    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Inode record size for revision-1 images. Ignored for revision 0.
    #[must_use]
    pub fn inode_size(mut self, inode_size: u16) -> Self {
        self.inode_size = inode_size;
        self
    }

    /// Revision 0 images have fixed 128-byte inodes and no feature fields.
    #[must_use]
    pub fn revision(mut self, rev_level: u32) -> Self {
        self.rev_level = rev_level;
        if rev_level == EXT2_GOOD_OLD_REV {
            self.filetype = false;
        }
        self
    }

    /// Toggle the FILETYPE incompat feature and the type byte in entries.
    #[must_use]
    pub fn filetype(mut self, enabled: bool) -> Self {
        self.filetype = enabled;
        self
    }

    #[must_use]
    pub fn inodes_per_group(mut self, count: u32) -> Self {
        self.inodes_per_group = count;
        self
    }

    /// Set additional `s_feature_incompat` bits on top of FILETYPE.
    #[must_use]
    pub fn incompat_bits(mut self, bits: u32) -> Self {
        self.extra_incompat = bits;
        self
    }

    #[must_use]
    pub fn volume_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.volume_name);
        self
    }

    /// Inode number of `/`.
    #[must_use]
    pub fn root(&self) -> u32 {
        InodeNumber::ROOT.0
    }

    /// Create a directory named `name` inside `parent`.
    pub fn mkdir(&mut self, parent: u32, name: impl AsRef<[u8]>) -> Result<u32> {
        let name = checked_name(name.as_ref())?;
        self.check_parent(parent)?;
        let ino = self.alloc_ino();
        self.nodes.insert(
            ino,
            Node {
                mode: S_IFDIR | 0o755,
                links: 2,
                kind: NodeKind::Dir(vec![dot_record(ino), dotdot_record(parent)]),
            },
        );
        self.push_record(
            parent,
            DirRecord::Live {
                ino,
                name,
                file_type: Ext2FileType::Dir,
            },
        )?;
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.links += 1;
        }
        Ok(ino)
    }

    /// Create a regular file holding `contents`.
    pub fn create_file(
        &mut self,
        parent: u32,
        name: impl AsRef<[u8]>,
        contents: &[u8],
    ) -> Result<u32> {
        self.mknod(parent, name, S_IFREG | 0o644, contents)
    }

    /// Create an inode with an arbitrary mode whose data blocks hold
    /// `contents` (symlink targets, device placeholders and so on).
    pub fn mknod(
        &mut self,
        parent: u32,
        name: impl AsRef<[u8]>,
        mode: u16,
        contents: &[u8],
    ) -> Result<u32> {
        ensure!(
            mode & S_IFMT != S_IFDIR,
            "use mkdir for directories so '.' and '..' exist"
        );
        let name = checked_name(name.as_ref())?;
        self.check_parent(parent)?;
        let ino = self.alloc_ino();
        self.nodes.insert(
            ino,
            Node {
                mode,
                links: 1,
                kind: NodeKind::Data(contents.to_vec()),
            },
        );
        self.push_record(
            parent,
            DirRecord::Live {
                ino,
                name,
                file_type: Ext2FileType::from_mode(mode),
            },
        )?;
        Ok(ino)
    }

    /// Add a hard link to an existing inode.
    pub fn link(&mut self, parent: u32, name: impl AsRef<[u8]>, target: u32) -> Result<()> {
        let name = checked_name(name.as_ref())?;
        self.check_parent(parent)?;
        let node = self
            .nodes
            .get_mut(&target)
            .with_context(|| format!("link target inode {target} does not exist"))?;
        node.links += 1;
        let file_type = Ext2FileType::from_mode(node.mode);
        self.push_record(
            parent,
            DirRecord::Live {
                ino: target,
                name,
                file_type,
            },
        )
    }

    /// Add an entry slot whose inode field is 0, as left behind by unlink.
    pub fn add_deleted_entry(&mut self, parent: u32, name: impl AsRef<[u8]>) -> Result<()> {
        let name = checked_name(name.as_ref())?;
        self.check_parent(parent)?;
        self.push_record(parent, DirRecord::Deleted { name })
    }

    /// Close the directory's current data block; later entries start a new
    /// one. Calling this twice in a row leaves an empty block in between.
    pub fn next_block(&mut self, dir: u32) -> Result<()> {
        self.check_parent(dir)?;
        self.push_record(dir, DirRecord::BlockBreak)
    }

    fn alloc_ino(&mut self) -> u32 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn check_parent(&self, parent: u32) -> Result<()> {
        match self.nodes.get(&parent) {
            Some(Node {
                kind: NodeKind::Dir(_),
                ..
            }) => Ok(()),
            Some(_) => bail!("inode {parent} is not a directory"),
            None => bail!("directory inode {parent} does not exist"),
        }
    }

    fn push_record(&mut self, dir: u32, record: DirRecord) -> Result<()> {
        match self.nodes.get_mut(&dir) {
            Some(Node {
                kind: NodeKind::Dir(records),
                ..
            }) => {
                records.push(record);
                Ok(())
            }
            _ => bail!("inode {dir} is not a directory"),
        }
    }

    /// Lay out and serialize the image.
    pub fn finish(self) -> Result<BuiltImage> {
        let bs = self.block_size;
        ensure!(
            matches!(bs, 1024 | 2048 | 4096),
            "unsupported block size {bs}"
        );
        let bs_usize = bs as usize;
        let record_size = if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        };
        ensure!(
            record_size.is_power_of_two()
                && record_size >= EXT2_GOOD_OLD_INODE_SIZE
                && u32::from(record_size) <= bs,
            "invalid inode size {record_size}"
        );

        let highest_ino = self.next_ino - 1;
        let inodes_per_group = self.inodes_per_group.max(highest_ino.next_multiple_of(8));

        // ── Metadata layout ─────────────────────────────────────────────
        let first_data_block: u32 = u32::from(bs == 1024);
        let gdt_block = first_data_block + 1;
        let block_bitmap = gdt_block + 1;
        let inode_bitmap = block_bitmap + 1;
        let inode_table = inode_bitmap + 1;
        let itable_blocks = (inodes_per_group * u32::from(record_size)).div_ceil(bs);
        let mut next_block = inode_table + itable_blocks;

        // ── Data allocation ─────────────────────────────────────────────
        let pointers_per_block = bs / 4;
        let mut contents: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut layouts: BTreeMap<u32, NodeLayout> = BTreeMap::new();
        for (&ino, node) in &self.nodes {
            let blocks = match &node.kind {
                NodeKind::Dir(records) => pack_dir(records, bs_usize, self.filetype),
                NodeKind::Data(data) => data
                    .chunks(bs_usize)
                    .map(|chunk| {
                        let mut block = chunk.to_vec();
                        block.resize(bs_usize, 0);
                        block
                    })
                    .collect(),
            };
            let count = u32::try_from(blocks.len()).context("too many blocks")?;
            ensure!(
                count <= EXT2_NDIR_BLOCKS as u32 + pointers_per_block,
                "inode {ino} needs {count} blocks; only direct and single indirect are built"
            );

            let mut data_blocks = Vec::with_capacity(blocks.len());
            let mut indirect = None;
            for (index, block) in blocks.into_iter().enumerate() {
                if index == EXT2_NDIR_BLOCKS {
                    indirect = Some(next_block);
                    next_block += 1;
                }
                data_blocks.push(next_block);
                contents.push((next_block, block));
                next_block += 1;
            }
            layouts.insert(
                ino,
                NodeLayout {
                    data_blocks,
                    indirect,
                },
            );
        }

        let blocks_count = next_block;
        let blocks_per_group = bs * 8;
        ensure!(
            blocks_count - first_data_block <= blocks_per_group,
            "image needs {blocks_count} blocks, more than one group holds"
        );

        let mut image = BuiltImage {
            bytes: vec![0_u8; blocks_count as usize * bs_usize],
            block_size: bs,
            inode_record_size: record_size,
            inode_table_block: inode_table,
            inodes_per_group,
            layouts,
        };

        for (block, data) in &contents {
            let off = image.block_offset(*block);
            image.bytes[off..off + bs_usize].copy_from_slice(data);
        }

        // ── Inodes ──────────────────────────────────────────────────────
        let sectors_per_block = bs / 512;
        for (&ino, node) in &self.nodes {
            let layout = &image.layouts[&ino];
            let size: u64 = match &node.kind {
                NodeKind::Dir(_) => layout.data_blocks.len() as u64 * u64::from(bs),
                NodeKind::Data(data) => data.len() as u64,
            };
            let allocated = layout.data_blocks.len() as u32 + u32::from(layout.indirect.is_some());

            let off = image.inode_offset(ino);
            let raw = &mut image.bytes[off..off + usize::from(record_size)];
            put_u16(raw, 0x00, node.mode);
            put_u32(raw, 0x04, (size & 0xFFFF_FFFF) as u32);
            put_u32(raw, 0x08, TIMESTAMP);
            put_u32(raw, 0x0C, TIMESTAMP);
            put_u32(raw, 0x10, TIMESTAMP);
            put_u16(raw, 0x1A, node.links);
            put_u32(raw, 0x1C, allocated * sectors_per_block);
            for (index, block) in layout.data_blocks.iter().take(EXT2_NDIR_BLOCKS).enumerate() {
                put_u32(raw, 0x28 + index * 4, *block);
            }
            if let Some(indirect) = layout.indirect {
                put_u32(raw, 0x28 + EXT2_NDIR_BLOCKS * 4, indirect);
            }
            if matches!(node.kind, NodeKind::Data(_)) && node.mode & S_IFMT == S_IFREG {
                put_u32(raw, 0x6C, (size >> 32) as u32);
            }

            if let Some(indirect) = layout.indirect {
                let ind_off = image.block_offset(indirect);
                let spill: Vec<u32> = layout.data_blocks[EXT2_NDIR_BLOCKS..].to_vec();
                for (index, block) in spill.into_iter().enumerate() {
                    put_u32(&mut image.bytes[ind_off..], index * 4, block);
                }
            }
        }

        // ── Bitmaps ─────────────────────────────────────────────────────
        let bb_off = image.block_offset(block_bitmap);
        for bit in 0..(blocks_count - first_data_block) as usize {
            image.bytes[bb_off + bit / 8] |= 1 << (bit % 8);
        }
        let ib_off = image.block_offset(inode_bitmap);
        let used_inodes: Vec<u32> = (1..FIRST_USER_INO)
            .chain(self.nodes.keys().copied().filter(|&i| i >= FIRST_USER_INO))
            .collect();
        for ino in &used_inodes {
            let bit = (*ino - 1) as usize;
            image.bytes[ib_off + bit / 8] |= 1 << (bit % 8);
        }

        // ── Group descriptor ────────────────────────────────────────────
        let used_dirs = self
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Dir(_)))
            .count();
        let free_inodes = inodes_per_group - used_inodes.len() as u32;
        let gd_off = image.block_offset(gdt_block);
        let gd = &mut image.bytes[gd_off..gd_off + 32];
        put_u32(gd, 0x00, block_bitmap);
        put_u32(gd, 0x04, inode_bitmap);
        put_u32(gd, 0x08, inode_table);
        put_u16(gd, 0x0C, 0);
        put_u16(gd, 0x0E, free_inodes as u16);
        put_u16(gd, 0x10, used_dirs as u16);

        // ── Superblock ──────────────────────────────────────────────────
        let log = bs.trailing_zeros() - 10;
        let sb = &mut image.bytes[EXT2_SUPERBLOCK_OFFSET..EXT2_SUPERBLOCK_OFFSET + 1024];
        put_u32(sb, 0x00, inodes_per_group);
        put_u32(sb, 0x04, blocks_count);
        put_u32(sb, 0x08, 0);
        put_u32(sb, 0x0C, 0);
        put_u32(sb, 0x10, free_inodes);
        put_u32(sb, 0x14, first_data_block);
        put_u32(sb, 0x18, log);
        put_u32(sb, 0x1C, log);
        put_u32(sb, 0x20, blocks_per_group);
        put_u32(sb, 0x24, blocks_per_group);
        put_u32(sb, 0x28, inodes_per_group);
        put_u32(sb, 0x2C, TIMESTAMP);
        put_u32(sb, 0x30, TIMESTAMP);
        put_u16(sb, 0x36, 0xFFFF);
        put_u16(sb, 0x38, EXT2_SUPER_MAGIC);
        put_u16(sb, 0x3A, 1);
        put_u16(sb, 0x3C, 1);
        put_u32(sb, 0x4C, self.rev_level);
        if self.rev_level != EXT2_GOOD_OLD_REV {
            put_u32(sb, 0x54, FIRST_USER_INO);
            put_u16(sb, 0x58, record_size);
            let mut incompat = self.extra_incompat;
            if self.filetype {
                incompat |= Ext2IncompatFeatures::FILETYPE.bits();
            }
            put_u32(sb, 0x60, incompat);
            for (i, byte) in sb[0x68..0x78].iter_mut().enumerate() {
                *byte = 0xE2 ^ i as u8;
            }
            let name = self.volume_name.as_bytes();
            let len = name.len().min(16);
            sb[0x78..0x78 + len].copy_from_slice(&name[..len]);
        }

        Ok(image)
    }
}

#[derive(Debug, Clone)]
struct NodeLayout {
    data_blocks: Vec<u32>,
    indirect: Option<u32>,
}

/// A serialized image plus the allocation map used to build it.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    bytes: Vec<u8>,
    block_size: u32,
    inode_record_size: u16,
    inode_table_block: u32,
    inodes_per_group: u32,
    layouts: BTreeMap<u32, NodeLayout>,
}

impl BuiltImage {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn inode_table_block(&self) -> u32 {
        self.inode_table_block
    }

    #[must_use]
    pub fn inodes_per_group(&self) -> u32 {
        self.inodes_per_group
    }

    /// Data blocks of an inode in logical order (indirect block excluded).
    #[must_use]
    pub fn data_blocks(&self, ino: u32) -> &[u32] {
        self.layouts
            .get(&ino)
            .map_or(&[], |layout| layout.data_blocks.as_slice())
    }

    #[must_use]
    pub fn block_offset(&self, block: u32) -> usize {
        block as usize * self.block_size as usize
    }

    #[must_use]
    pub fn inode_offset(&self, ino: u32) -> usize {
        self.block_offset(self.inode_table_block)
            + (ino as usize - 1) * usize::from(self.inode_record_size)
    }

    /// # Panics
    ///
    /// Panics if the write falls outside the image.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    /// # Panics
    ///
    /// Panics if the write falls outside the image.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        put_u16(&mut self.bytes, offset, value);
    }

    /// # Panics
    ///
    /// Panics if the write falls outside the image.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        put_u32(&mut self.bytes, offset, value);
    }

    /// Overwrite a 32-bit superblock field at `field` (offset within the superblock).
    pub fn set_superblock_u32(&mut self, field: usize, value: u32) {
        self.write_u32(EXT2_SUPERBLOCK_OFFSET + field, value);
    }

    /// Overwrite `i_block[index]` of an inode.
    pub fn set_inode_block(&mut self, ino: u32, index: usize, block: u32) {
        let off = self.inode_offset(ino) + 0x28 + index * 4;
        self.write_u32(off, block);
    }

    /// Overwrite the low 32 bits of `i_size`.
    pub fn set_inode_size(&mut self, ino: u32, size: u32) {
        let off = self.inode_offset(ino) + 0x04;
        self.write_u32(off, size);
    }

    pub fn set_inode_mode(&mut self, ino: u32, mode: u16) {
        let off = self.inode_offset(ino);
        self.write_u16(off, mode);
    }

    /// Cut the image down to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write image {}", path.display()))
    }
}

// ── Directory packing ──────────────────────────────────────────────────────

fn dot_record(ino: u32) -> DirRecord {
    DirRecord::Live {
        ino,
        name: b".".to_vec(),
        file_type: Ext2FileType::Dir,
    }
}

fn dotdot_record(parent: u32) -> DirRecord {
    DirRecord::Live {
        ino: parent,
        name: b"..".to_vec(),
        file_type: Ext2FileType::Dir,
    }
}

fn checked_name(name: &[u8]) -> Result<Vec<u8>> {
    ensure!(!name.is_empty(), "empty entry name");
    ensure!(
        name.len() <= EXT2_NAME_LEN,
        "entry name longer than {EXT2_NAME_LEN} bytes"
    );
    ensure!(!name.contains(&b'/'), "entry name contains '/'");
    Ok(name.to_vec())
}

/// Minimal record length for a name, rounded to 4 bytes.
#[must_use]
pub fn required_rec_len(name_len: usize) -> usize {
    (EXT2_DIR_ENTRY_HEADER_LEN + name_len).next_multiple_of(4)
}

/// Pack records into blocks. Each block's last entry absorbs the slack.
fn pack_dir(records: &[DirRecord], block_size: usize, filetype: bool) -> Vec<Vec<u8>> {
    let mut blocks = Vec::new();
    let mut current: Vec<(u32, &[u8], Ext2FileType)> = Vec::new();
    let mut used = 0_usize;

    for record in records {
        let (ino, name, file_type) = match record {
            DirRecord::BlockBreak => {
                blocks.push(encode_dir_block(&current, block_size, filetype));
                current.clear();
                used = 0;
                continue;
            }
            DirRecord::Live {
                ino,
                name,
                file_type,
            } => (*ino, name.as_slice(), *file_type),
            DirRecord::Deleted { name } => (0, name.as_slice(), Ext2FileType::Unknown),
        };
        let need = required_rec_len(name.len());
        if used + need > block_size {
            blocks.push(encode_dir_block(&current, block_size, filetype));
            current.clear();
            used = 0;
        }
        current.push((ino, name, file_type));
        used += need;
    }
    blocks.push(encode_dir_block(&current, block_size, filetype));
    blocks
}

fn encode_dir_block(
    entries: &[(u32, &[u8], Ext2FileType)],
    block_size: usize,
    filetype: bool,
) -> Vec<u8> {
    let mut block = vec![0_u8; block_size];
    if entries.is_empty() {
        // One unused record spanning the whole block.
        put_u16(&mut block, 4, block_size as u16);
        return block;
    }

    let mut offset = 0_usize;
    for (index, (ino, name, file_type)) in entries.iter().enumerate() {
        let rec_len = if index + 1 == entries.len() {
            block_size - offset
        } else {
            required_rec_len(name.len())
        };
        put_u32(&mut block, offset, *ino);
        put_u16(&mut block, offset + 4, rec_len as u16);
        block[offset + 6] = name.len() as u8;
        block[offset + 7] = if filetype { *file_type as u8 } else { 0 };
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
        offset += rec_len;
    }
    block
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2l_ondisk::{Ext2GroupDesc, Ext2Inode, Ext2Superblock, parse_dir_block};

    #[test]
    fn empty_image_has_valid_superblock() {
        let image = ImageBuilder::new().volume_name("e2l").finish().unwrap();
        let sb = Ext2Superblock::parse_from_image(image.bytes()).unwrap();
        sb.validate().unwrap();
        assert_eq!(sb.block_size, 1024);
        assert_eq!(sb.first_data_block, 1);
        assert_eq!(sb.groups_count(), 1);
        assert_eq!(sb.volume_name, "e2l");
        assert!(sb.has_filetype());
        assert_eq!(image.bytes().len() % 1024, 0);
    }

    #[test]
    fn layout_places_gdt_after_superblock() {
        for bs in [1024_u32, 2048, 4096] {
            let image = ImageBuilder::new().block_size(bs).finish().unwrap();
            let sb = Ext2Superblock::parse_from_image(image.bytes()).unwrap();
            let off = sb.group_desc_offset(e2l_types::GroupNumber(0)).unwrap() as usize;
            let gd = Ext2GroupDesc::parse_from_bytes(&image.bytes()[off..off + 32]).unwrap();
            assert_eq!(gd.inode_table, image.inode_table_block(), "bs={bs}");
            assert_eq!(gd.used_dirs_count, 1);
        }
    }

    #[test]
    fn root_directory_holds_dot_entries() {
        let image = ImageBuilder::new().finish().unwrap();
        let root_off = image.inode_offset(2);
        let root = Ext2Inode::parse_from_bytes(&image.bytes()[root_off..root_off + 128]).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.size, 1024);
        assert_eq!(root.links_count, 2);

        let block = image.data_blocks(2)[0];
        assert_eq!(root.block[0], block);
        let off = image.block_offset(block);
        let entries = parse_dir_block(&image.bytes()[off..off + 1024]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].inode, 2);
        assert_eq!(entries[1].inode, 2);
        assert_eq!(usize::from(entries[1].rec_len), 1024 - 12);
    }

    #[test]
    fn entries_spill_into_new_blocks() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        for i in 0..100 {
            builder
                .create_file(root, format!("file-{i:03}"), b"")
                .unwrap();
        }
        let image = builder.finish().unwrap();
        // 12 + 100 * 16 bytes of records over 1K blocks
        assert_eq!(image.data_blocks(2).len(), 2);
    }

    #[test]
    fn next_block_forces_a_fresh_block() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.next_block(root).unwrap();
        builder.next_block(root).unwrap();
        builder.create_file(root, "late", b"x").unwrap();
        let image = builder.finish().unwrap();
        let blocks = image.data_blocks(2);
        assert_eq!(blocks.len(), 3);

        let empty_off = image.block_offset(blocks[1]);
        let empty = parse_dir_block(&image.bytes()[empty_off..empty_off + 1024]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn large_directories_use_single_indirect() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        for _ in 0..13 {
            builder.next_block(root).unwrap();
        }
        let image = builder.finish().unwrap();
        assert_eq!(image.data_blocks(2).len(), 14);
        let off = image.inode_offset(2);
        let root = Ext2Inode::parse_from_bytes(&image.bytes()[off..off + 128]).unwrap();
        assert!(root.has_indirect_blocks());
        assert_eq!(root.size, 14 * 1024);
    }

    #[test]
    fn names_are_validated() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        assert!(builder.mkdir(root, "").is_err());
        assert!(builder.mkdir(root, "a/b").is_err());
        assert!(builder.mkdir(root, vec![b'x'; 256]).is_err());
        assert!(builder.mkdir(root, vec![b'x'; 255]).is_ok());
    }

    #[test]
    fn revision_zero_has_no_filetype_bytes() {
        let mut builder = ImageBuilder::new().revision(0).inode_size(256);
        let root = builder.root();
        builder.create_file(root, "f", b"data").unwrap();
        let image = builder.finish().unwrap();
        let sb = Ext2Superblock::parse_from_image(image.bytes()).unwrap();
        assert_eq!(sb.inode_record_size(), 128);
        assert!(!sb.has_filetype());

        let off = image.block_offset(image.data_blocks(2)[0]);
        let entries = parse_dir_block(&image.bytes()[off..off + 1024]).unwrap();
        assert!(
            entries
                .iter()
                .all(|e| e.file_type == Ext2FileType::Unknown)
        );
    }
}
