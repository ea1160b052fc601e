#![forbid(unsafe_code)]

use crate::image::Ext2Image;
use crate::parse_to_e2_error;
use e2l_error::{E2Error, Result};
use e2l_ondisk::{Ext2DirEntry, Ext2Inode, lookup_in_dir_block, parse_dir_block};
use e2l_types::{BlockNumber, EXT2_NDIR_BLOCKS, InodeNumber, ParseError};
use tracing::{trace, warn};

impl<'a> Ext2Image<'a> {
    /// Look up `name` in directory inode `dir`.
    ///
    /// Returns `Ok(None)` when no live entry carries exactly that name.
    pub fn lookup(&self, dir: InodeNumber, name: &[u8]) -> Result<Option<InodeNumber>> {
        let inode = self.inode(dir)?;
        self.lookup_in(&inode, name)
    }

    /// Look up `name` in an already-loaded directory inode.
    ///
    /// Scans the direct blocks in order and returns the first live entry
    /// whose name matches exactly. A directory with `i_size == 0` exposes no
    /// entries, whatever its block pointers hold.
    pub fn lookup_in(&self, dir: &Ext2Inode, name: &[u8]) -> Result<Option<InodeNumber>> {
        if !dir.is_dir() {
            return Err(E2Error::NotDirectory);
        }
        for (block, data) in self.dir_blocks(dir) {
            let data = data?;
            let hit = lookup_in_dir_block(data, name).map_err(|e| malformed(&e, block))?;
            if let Some(entry) = hit {
                trace!(
                    block = block.0,
                    ino = entry.inode,
                    name = %String::from_utf8_lossy(name),
                    "directory hit"
                );
                return Ok(Some(InodeNumber(entry.inode)));
            }
        }
        Ok(None)
    }

    /// List every live entry of a directory in on-disk order.
    pub fn read_dir(&self, dir: &Ext2Inode) -> Result<Vec<Ext2DirEntry>> {
        if !dir.is_dir() {
            return Err(E2Error::NotDirectory);
        }
        let mut entries = Vec::new();
        for (block, data) in self.dir_blocks(dir) {
            let data = data?;
            entries.extend(parse_dir_block(data).map_err(|e| malformed(&e, block))?);
        }
        Ok(entries)
    }

    /// The directory's allocated direct blocks within `i_size`.
    ///
    /// Entries reachable only through indirect blocks are not visited.
    fn dir_blocks<'s>(
        &'s self,
        dir: &'s Ext2Inode,
    ) -> impl Iterator<Item = (BlockNumber, Result<&'a [u8]>)> + 's {
        let logical = self.block_size().blocks_for(dir.size);
        let visible =
            usize::try_from(logical).map_or(EXT2_NDIR_BLOCKS, |n| n.min(EXT2_NDIR_BLOCKS));
        dir.direct_blocks()[..visible]
            .iter()
            .filter(|&&ptr| ptr != 0)
            .map(move |&ptr| {
                let block = BlockNumber(u64::from(ptr));
                (block, self.block(block))
            })
    }
}

fn malformed(err: &ParseError, block: BlockNumber) -> E2Error {
    warn!(block = block.0, error = %err, "malformed directory block");
    parse_to_e2_error(err, block)
}
