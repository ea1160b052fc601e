#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2l_harness::{
    ImageBuilder, extract_ext2_superblock, extract_region, fixture_path, validate_dir_block_fixture,
    validate_ext2_fixture, validate_group_desc_fixture, validate_inode_fixture,
};
use e2l_types::S_IFLNK;
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("check-fixtures") => check_fixtures(),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("build-sample") => build_sample(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn check_fixtures() -> Result<()> {
    for name in ["ext2_superblock_sparse.json", "ext2_superblock_4k.json"] {
        let sb = validate_ext2_fixture(&fixture_path(name))?;
        println!(
            "{name}: block_size={} inode_size={} volume={}",
            sb.block_size,
            sb.inode_record_size(),
            sb.volume_name
        );
    }

    let gd = validate_group_desc_fixture(&fixture_path("ext2_group_desc.json"))?;
    println!("ext2_group_desc.json: inode_table={}", gd.inode_table);

    for name in ["ext2_inode_directory.json", "ext2_inode_regular_file.json"] {
        let inode = validate_inode_fixture(&fixture_path(name))?;
        println!("{name}: mode={:o} size={}", inode.mode, inode.size);
    }

    let entries = validate_dir_block_fixture(&fixture_path("ext2_dir_block.json"))?;
    let names: Vec<String> = entries.iter().map(|e| e.name_str()).collect();
    println!("ext2_dir_block.json: {}", names.join(" "));
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: e2l-harness generate-fixture <image> [ext2-superblock|region <offset> <len>]");
    }

    let image_path = Path::new(&args[0]);
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let kind = args.get(1).map_or("ext2-superblock", String::as_str);

    let fixture = match kind {
        "ext2-superblock" => extract_ext2_superblock(&image_data)?,
        "region" => {
            let offset: usize = args
                .get(2)
                .context("region requires <offset>")?
                .parse()
                .context("invalid offset")?;
            let len: usize = args
                .get(3)
                .context("region requires <len>")?
                .parse()
                .context("invalid len")?;
            extract_region(&image_data, offset, len)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}

/// Write a small populated image: `/etc/hostname`, `/usr/bin/tool` and a
/// symlink `/bin -> usr/bin`.
fn build_sample(args: &[String]) -> Result<()> {
    let mut out = None;
    let mut block_size = 1024_u32;
    let mut index = 0_usize;
    while index < args.len() {
        match args[index].as_str() {
            "--block-size" => {
                let raw = args.get(index + 1).context("--block-size requires a value")?;
                block_size = raw.parse().context("invalid --block-size value")?;
                index += 2;
            }
            other if other.starts_with("--") => bail!("unknown build-sample option: {other}"),
            path => {
                if out.replace(path.to_owned()).is_some() {
                    bail!("build-sample takes a single <out> path");
                }
                index += 1;
            }
        }
    }
    let out = out.context("build-sample requires <out>")?;

    let mut builder = ImageBuilder::new()
        .block_size(block_size)
        .volume_name("e2l-sample");
    let root = builder.root();
    let etc = builder.mkdir(root, "etc")?;
    builder.create_file(etc, "hostname", b"sample\n")?;
    let usr = builder.mkdir(root, "usr")?;
    let bin = builder.mkdir(usr, "bin")?;
    builder.create_file(bin, "tool", b"#!/bin/sh\necho tool\n")?;
    builder.mknod(root, "bin", S_IFLNK | 0o777, b"usr/bin")?;

    let image = builder.finish()?;
    image.write_to(Path::new(&out))?;
    eprintln!(
        "wrote {} ({} bytes, block_size={block_size})",
        out,
        image.bytes().len()
    );
    Ok(())
}

fn print_usage() {
    println!("e2l-harness: fixture management for e2lookup");
    println!();
    println!("USAGE:");
    println!("  e2l-harness check-fixtures");
    println!("  e2l-harness generate-fixture <image> [ext2-superblock|region <offset> <len>]");
    println!("  e2l-harness build-sample <out> [--block-size N]");
    println!();
    println!("FIXTURE GENERATION:");
    println!("  Extracts sparse JSON fixtures from ext2 images. The default mode");
    println!("  extracts the superblock; 'region' extracts any byte range, such as");
    println!("  a group descriptor, an inode record or a directory block.");
    println!();
    println!("EXAMPLES:");
    println!("  e2l-harness build-sample /tmp/sample.img");
    println!("  e2l-harness generate-fixture /tmp/sample.img > conformance/fixtures/sb.json");
    println!("  e2l-harness generate-fixture /tmp/sample.img region 2048 32 > conformance/fixtures/gd.json");
}
