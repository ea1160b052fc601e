#![forbid(unsafe_code)]
//! Resolution against a hand-checked 64 KiB image stored as a sparse fixture.
//!
//! Layout of `ext2_image_tiny.json` (1 KiB blocks, inode table at block 5):
//!
//! ```text
//! /                  ino 2
//! /docs              ino 11
//! /docs/readme.txt   ino 12  "read me first"
//! /docs/stale        deleted entry
//! /docs/latest       ino 14  fast symlink -> readme.txt
//! /hello.txt         ino 13  "hello\n"
//! ```

use e2l_core::{E2Error, Ext2FileType, Ext2Image, InodeNumber, split_path};
use e2l_harness::{extract_ext2_superblock, fixture_path, load_sparse_fixture};

fn tiny() -> Vec<u8> {
    load_sparse_fixture(&fixture_path("ext2_image_tiny.json")).expect("tiny image fixture")
}

#[test]
fn tiny_image_superblock() {
    let bytes = tiny();
    let image = Ext2Image::open(&bytes).expect("open");
    let sb = image.superblock();
    assert_eq!(sb.volume_name, "tiny");
    assert_eq!(sb.block_size, 1024);
    assert_eq!(sb.inodes_per_group, 32);
    assert_eq!(sb.groups_count(), 1);
    assert!(sb.has_filetype());
    assert_eq!(image.image_len(), 65536);

    let gd = image
        .block_group(e2l_core::GroupNumber(0))
        .expect("group 0");
    assert_eq!(gd.inode_table, 5);
}

#[test]
fn tiny_image_resolves_known_paths() {
    let bytes = tiny();
    let image = Ext2Image::open(&bytes).expect("open");

    let cases: &[(&str, u32)] = &[
        ("/", 2),
        ("/docs", 11),
        ("/docs/", 11),
        ("//docs//readme.txt", 12),
        ("/hello.txt", 13),
        ("/docs/latest", 14),
        ("/docs/.", 11),
        ("/docs/..", 2),
        ("/docs/../hello.txt", 13),
        // Stops at the regular file and reports it.
        ("/hello.txt/x", 13),
        ("/docs/stale", 0),
        ("/missing", 0),
        ("/docs/readme", 0),
        ("/docs/readme.txt.bak", 0),
    ];
    for (path, expected) in cases {
        assert_eq!(image.resolve_raw(path).expect(path), *expected, "{path}");
    }
}

#[test]
fn tiny_image_listings_skip_deleted_entries() {
    let bytes = tiny();
    let image = Ext2Image::open(&bytes).expect("open");

    let docs = image.inode(InodeNumber(11)).expect("docs inode");
    assert!(docs.is_dir());
    let listing = image.read_dir(&docs).expect("read docs");
    let names: Vec<String> = listing.iter().map(|e| e.name_str()).collect();
    assert_eq!(names, [".", "..", "readme.txt", "latest"]);
    assert_eq!(listing[3].file_type, Ext2FileType::Symlink);

    let root = image.root().expect("root");
    let names: Vec<String> = image
        .read_dir(&root)
        .expect("read root")
        .iter()
        .map(|e| e.name_str())
        .collect();
    assert_eq!(names, [".", "..", "docs", "hello.txt"]);
}

#[test]
fn tiny_image_file_contents_are_addressable() {
    let bytes = tiny();
    let image = Ext2Image::open(&bytes).expect("open");

    let (_, readme) = image.resolve_inode("/docs/readme.txt").expect("readme");
    assert!(readme.is_regular());
    assert_eq!(readme.size, 13);
    let block = image
        .block(e2l_core::BlockNumber(u64::from(readme.block[0])))
        .expect("data block");
    assert_eq!(&block[..13], b"read me first");

    let (_, latest) = image.resolve_inode("/docs/latest").expect("latest");
    assert!(latest.is_symlink());
    assert_eq!(latest.size, 10);
}

#[test]
fn tiny_image_lookup_by_name() {
    let bytes = tiny();
    let image = Ext2Image::open(&bytes).expect("open");

    assert_eq!(
        image.lookup(InodeNumber::ROOT, b"docs").expect("lookup"),
        Some(InodeNumber(11))
    );
    assert_eq!(
        image.lookup(InodeNumber::ROOT, b"doc").expect("lookup"),
        None
    );
    let err = image.lookup(InodeNumber(13), b"x").unwrap_err();
    assert!(matches!(err, E2Error::NotDirectory), "{err:?}");
}

#[test]
fn relative_paths_are_rejected() {
    let bytes = tiny();
    let image = Ext2Image::open(&bytes).expect("open");
    assert!(matches!(
        image.resolve("docs").unwrap_err(),
        E2Error::InvalidPath(_)
    ));
    assert_eq!(split_path("/a//b/").expect("split"), ["a", "b"]);
}

#[test]
fn superblock_extraction_matches_checked_in_fixture() {
    let bytes = tiny();
    let fixture = extract_ext2_superblock(&bytes).expect("extract");
    assert_eq!(fixture.size, 1024);
    assert!(!fixture.writes.is_empty());
}
