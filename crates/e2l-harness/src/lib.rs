#![forbid(unsafe_code)]

pub mod image;

pub use image::{BuiltImage, FIRST_USER_INO, ImageBuilder, required_rec_len};

use anyhow::{Context, Result, bail};
use e2l_ondisk::{Ext2DirEntry, Ext2GroupDesc, Ext2Inode, Ext2Superblock, parse_dir_block};
use e2l_types::{EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

/// Path of a file under `conformance/fixtures/` at the workspace root.
///
/// # Panics
///
/// Panics if the crate is not laid out as `<root>/crates/<name>`.
#[must_use]
pub fn fixture_path(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("workspace root")
        .join("conformance")
        .join("fixtures")
        .join(rel)
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    materialize(&fixture)
}

/// Expand a sparse fixture into a zero-filled buffer with its writes applied.
pub fn materialize(fixture: &SparseFixture) -> Result<Vec<u8>> {
    let mut bytes = vec![0_u8; fixture.size];
    for write in &fixture.writes {
        let payload = hex::decode(&write.hex)
            .with_context(|| format!("invalid hex at offset {}", write.offset))?;

        let end = write
            .offset
            .checked_add(payload.len())
            .context("fixture offset overflow")?;
        if end > bytes.len() {
            bail!(
                "fixture write out of bounds: offset={} payload={} size={}",
                write.offset,
                payload.len(),
                bytes.len()
            );
        }

        bytes[write.offset..end].copy_from_slice(&payload);
    }

    Ok(bytes)
}

/// Build a sparse fixture from `len` bytes of `data` starting at `offset`.
///
/// Runs of zero bytes shorter than 16 stay inside a write; longer runs split it.
pub fn extract_region(data: &[u8], offset: usize, len: usize) -> Result<SparseFixture> {
    let end = offset.checked_add(len).context("region overflow")?;
    if end > data.len() {
        bail!(
            "region out of bounds: offset={offset} len={len} image={}",
            data.len()
        );
    }
    let region = &data[offset..end];

    let mut writes = Vec::new();
    let mut index = 0_usize;
    while index < region.len() {
        if region[index] == 0 {
            index += 1;
            continue;
        }
        let start = index;
        let mut last_nonzero = index;
        while index < region.len() && index - last_nonzero < 16 {
            if region[index] != 0 {
                last_nonzero = index;
            }
            index += 1;
        }
        writes.push(FixtureWrite {
            offset: start,
            hex: hex::encode(&region[start..=last_nonzero]),
        });
        index = last_nonzero + 1;
    }

    Ok(SparseFixture { size: len, writes })
}

/// Extract the superblock region of an ext2 image as a fixture, checking
/// that it decodes first.
pub fn extract_ext2_superblock(image: &[u8]) -> Result<SparseFixture> {
    let sb = Ext2Superblock::parse_from_image(image).context("no ext2 superblock at 1024")?;
    sb.validate().context("ext2 superblock does not validate")?;
    extract_region(image, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)
}

pub fn validate_ext2_fixture(path: &Path) -> Result<Ext2Superblock> {
    let data = load_sparse_fixture(path)?;
    let sb = Ext2Superblock::parse_superblock_region(&data)
        .with_context(|| format!("failed ext2 parse for fixture {}", path.display()))?;
    sb.validate()
        .with_context(|| format!("ext2 validation failed for fixture {}", path.display()))?;
    Ok(sb)
}

pub fn validate_group_desc_fixture(path: &Path) -> Result<Ext2GroupDesc> {
    let data = load_sparse_fixture(path)?;
    Ext2GroupDesc::parse_from_bytes(&data)
        .with_context(|| format!("failed group desc parse for fixture {}", path.display()))
}

pub fn validate_inode_fixture(path: &Path) -> Result<Ext2Inode> {
    let data = load_sparse_fixture(path)?;
    Ext2Inode::parse_from_bytes(&data)
        .with_context(|| format!("failed inode parse for fixture {}", path.display()))
}

pub fn validate_dir_block_fixture(path: &Path) -> Result<Vec<Ext2DirEntry>> {
    let data = load_sparse_fixture(path)?;
    parse_dir_block(&data)
        .with_context(|| format!("failed dir block parse for fixture {}", path.display()))
}
