#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2l::{Ext2DirEntry, Ext2FileType, Ext2Image, ImageFile, OpenOptions};
use serde::Serialize;
use std::env;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`EnvFilter` syntax).
const LOG_ENV: &str = "E2L_LOG";

#[derive(Debug, Serialize)]
struct InspectOutput {
    block_size: u32,
    inode_size: u16,
    inodes_count: u32,
    blocks_count: u32,
    inodes_per_group: u32,
    groups: u32,
    rev_level: u32,
    incompat: String,
    uuid: String,
    volume_name: String,
    inode_table: u32,
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    path: String,
    inode: u32,
    found: bool,
}

#[derive(Debug, Serialize)]
struct LsEntry {
    name: String,
    inode: u32,
    file_type: Ext2FileType,
    rec_len: u16,
}

/// Whether the command produced its answer or reported "not found".
enum Outcome {
    Done,
    NotFound,
}

#[derive(Debug, Default)]
struct CommonArgs {
    positional: Vec<String>,
    json: bool,
    skip_validation: bool,
}

impl CommonArgs {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self> {
        let mut out = Self::default();
        for arg in args {
            match arg.as_str() {
                "--json" => out.json = true,
                "--skip-validation" => out.skip_validation = true,
                flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
                _ => out.positional.push(arg),
            }
        }
        Ok(out)
    }

    fn options(&self) -> OpenOptions {
        OpenOptions {
            skip_validation: self.skip_validation,
        }
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(Outcome::Done) => {}
        Ok(Outcome::NotFound) => std::process::exit(1),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("warning: logging disabled: {err}");
    }
}

fn run() -> Result<Outcome> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(Outcome::Done);
    };

    match command.as_str() {
        "inspect" => {
            let args = CommonArgs::parse(args)?;
            let [image] = args.positional.as_slice() else {
                bail!("inspect requires <image>");
            };
            inspect(Path::new(image), &args)
        }
        "resolve" => {
            let args = CommonArgs::parse(args)?;
            let [image, path] = args.positional.as_slice() else {
                bail!("resolve requires <image> <path>");
            };
            resolve(Path::new(image), path, &args)
        }
        "ls" => {
            let args = CommonArgs::parse(args)?;
            let (image, path) = match args.positional.as_slice() {
                [image] => (image, "/"),
                [image, path] => (image, path.as_str()),
                _ => bail!("ls requires <image> [path]"),
            };
            ls(Path::new(image), path, &args)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(Outcome::Done)
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("e2l: resolve paths inside read-only ext2 images\n");
    println!("USAGE:");
    println!("  e2l inspect <image> [--json] [--skip-validation]");
    println!("  e2l resolve <image> <path> [--json] [--skip-validation]");
    println!("  e2l ls <image> [path] [--json] [--skip-validation]");
    println!();
    println!("ENVIRONMENT:");
    println!("  {LOG_ENV}  log filter, e.g. {LOG_ENV}=debug or {LOG_ENV}=e2l_core=trace");
}

fn load(path: &Path) -> Result<ImageFile> {
    ImageFile::open(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn open<'a>(file: &'a ImageFile, args: &CommonArgs) -> Result<Ext2Image<'a>> {
    file.image_with_options(&args.options())
        .with_context(|| format!("failed to open ext2 image {}", file.path().display()))
}

fn inspect(path: &Path, args: &CommonArgs) -> Result<Outcome> {
    let file = load(path)?;
    let image = open(&file, args)?;
    let sb = image.superblock();
    let gd = image
        .block_group(e2l::GroupNumber(0))
        .context("failed to read group descriptor 0")?;

    let output = InspectOutput {
        block_size: sb.block_size,
        inode_size: sb.inode_record_size(),
        inodes_count: sb.inodes_count,
        blocks_count: sb.blocks_count,
        inodes_per_group: sb.inodes_per_group,
        groups: sb.groups_count(),
        rev_level: sb.rev_level,
        incompat: sb.feature_incompat.to_string(),
        uuid: hex::encode(sb.uuid),
        volume_name: sb.volume_name.clone(),
        inode_table: gd.inode_table,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("filesystem: ext2");
        println!("block_size: {}", output.block_size);
        println!("inode_size: {}", output.inode_size);
        println!("inodes_count: {}", output.inodes_count);
        println!("blocks_count: {}", output.blocks_count);
        println!("inodes_per_group: {}", output.inodes_per_group);
        println!("groups: {}", output.groups);
        println!("rev_level: {}", output.rev_level);
        println!("incompat: {}", output.incompat);
        println!("uuid: {}", output.uuid);
        println!("volume_name: {}", output.volume_name);
        println!("inode_table: {}", output.inode_table);
    }
    Ok(Outcome::Done)
}

fn resolve(image_path: &Path, path: &str, args: &CommonArgs) -> Result<Outcome> {
    let file = load(image_path)?;
    let image = open(&file, args)?;
    let inode = image
        .resolve_raw(path)
        .with_context(|| format!("failed to resolve {path}"))?;
    debug!(path, inode, "resolved");

    if args.json {
        let output = ResolveOutput {
            path: path.to_owned(),
            inode,
            found: inode != 0,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("{inode}");
    }

    Ok(if inode == 0 {
        Outcome::NotFound
    } else {
        Outcome::Done
    })
}

fn ls(image_path: &Path, path: &str, args: &CommonArgs) -> Result<Outcome> {
    let file = load(image_path)?;
    let image = open(&file, args)?;
    let (_, inode) = image
        .resolve_inode(path)
        .with_context(|| format!("failed to resolve {path}"))?;
    let entries = image
        .read_dir(&inode)
        .with_context(|| format!("failed to list {path}"))?;

    if args.json {
        let listing: Vec<LsEntry> = entries.iter().map(ls_entry).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&listing).context("serialize output")?
        );
    } else {
        for entry in &entries {
            println!(
                "{} {:>8} {}",
                type_char(entry.file_type),
                entry.inode,
                entry.name_str()
            );
        }
    }
    Ok(Outcome::Done)
}

fn ls_entry(entry: &Ext2DirEntry) -> LsEntry {
    LsEntry {
        name: entry.name_str(),
        inode: entry.inode,
        file_type: entry.file_type,
        rec_len: entry.rec_len,
    }
}

fn type_char(file_type: Ext2FileType) -> char {
    match file_type {
        Ext2FileType::RegFile => '-',
        Ext2FileType::Dir => 'd',
        Ext2FileType::Chrdev => 'c',
        Ext2FileType::Blkdev => 'b',
        Ext2FileType::Fifo => 'p',
        Ext2FileType::Sock => 's',
        Ext2FileType::Symlink => 'l',
        Ext2FileType::Unknown => '?',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> impl Iterator<Item = String> {
        args.iter()
            .map(|s| (*s).to_owned())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn flags_are_separated_from_positionals() {
        let args = CommonArgs::parse(strings(&["img", "--json", "/a", "--skip-validation"]))
            .expect("parse");
        assert_eq!(args.positional, ["img", "/a"]);
        assert!(args.json);
        assert!(args.skip_validation);
        assert!(args.options().skip_validation);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let err = CommonArgs::parse(strings(&["img", "--verbose"])).unwrap_err();
        assert!(err.to_string().contains("--verbose"));
    }

    #[test]
    fn type_chars_cover_common_kinds() {
        assert_eq!(type_char(Ext2FileType::Dir), 'd');
        assert_eq!(type_char(Ext2FileType::RegFile), '-');
        assert_eq!(type_char(Ext2FileType::Symlink), 'l');
        assert_eq!(type_char(Ext2FileType::Unknown), '?');
    }
}
