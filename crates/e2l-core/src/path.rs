#![forbid(unsafe_code)]

use crate::image::Ext2Image;
use e2l_error::{E2Error, Result};
use e2l_ondisk::Ext2Inode;
use e2l_types::InodeNumber;
use tracing::trace;

/// Split an absolute path into its non-empty components.
///
/// Leading, trailing and repeated separators produce no components, so `/`
/// yields an empty list.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(E2Error::InvalidPath(path.to_owned()));
    }
    Ok(path.split('/').filter(|c| !c.is_empty()).collect())
}

impl Ext2Image<'_> {
    /// Resolve an absolute path to an inode number, starting at the root.
    ///
    /// Returns `Ok(None)` when a component does not exist. When a component
    /// resolves to something that is not a directory, the walk stops there
    /// and that inode is returned even if components remain.
    pub fn resolve(&self, path: &str) -> Result<Option<InodeNumber>> {
        let components = split_path(path)?;
        let mut current = InodeNumber::ROOT;

        for component in components {
            let inode = self.inode(current)?;
            if !inode.is_dir() {
                trace!(ino = current.0, component, "stopping at non-directory");
                break;
            }
            match self.lookup_in(&inode, component.as_bytes())? {
                Some(next) => {
                    trace!(component, ino = next.0, "resolved component");
                    current = next;
                }
                None => {
                    trace!(component, dir = current.0, "component not found");
                    return Ok(None);
                }
            }
        }

        Ok(Some(current))
    }

    /// Resolve a path to a raw inode number, with 0 meaning "not found".
    pub fn resolve_raw(&self, path: &str) -> Result<u32> {
        Ok(self.resolve(path)?.map_or(0, InodeNumber::get))
    }

    /// Resolve a path that must exist and load its inode.
    pub fn resolve_inode(&self, path: &str) -> Result<(InodeNumber, Ext2Inode)> {
        let ino = self
            .resolve(path)?
            .ok_or_else(|| E2Error::NotFound(path.to_owned()))?;
        Ok((ino, self.inode(ino)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2l_harness::ImageBuilder;
    use e2l_types::S_IFLNK;

    #[test]
    fn split_path_drops_empty_components() {
        assert!(split_path("/").unwrap().is_empty());
        assert_eq!(split_path("/a/b").unwrap(), ["a", "b"]);
        assert_eq!(split_path("//a///b/").unwrap(), ["a", "b"]);
        assert_eq!(split_path("/a/./..").unwrap(), ["a", ".", ".."]);
    }

    #[test]
    fn split_path_requires_leading_slash() {
        for bad in ["", "a", "a/b", "./a"] {
            assert!(
                matches!(split_path(bad), Err(E2Error::InvalidPath(ref p)) if p == bad),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn root_resolves_to_two() {
        let bytes = ImageBuilder::new().finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();
        assert_eq!(image.resolve("/").unwrap(), Some(InodeNumber::ROOT));
        assert_eq!(image.resolve_raw("/").unwrap(), 2);
        assert_eq!(image.resolve_raw("///").unwrap(), 2);
    }

    #[test]
    fn nested_resolution() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        let dir1 = builder.mkdir(root, "dir1").unwrap();
        let dir2 = builder.mkdir(dir1, "dir2").unwrap();
        let file = builder.create_file(dir2, "file.txt", b"hi").unwrap();
        let bytes = builder.finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();

        assert_eq!(image.resolve_raw("/dir1").unwrap(), dir1);
        assert_eq!(image.resolve_raw("/dir1/dir2").unwrap(), dir2);
        assert_eq!(image.resolve_raw("/dir1/dir2/file.txt").unwrap(), file);
        assert_eq!(image.resolve_raw("/dir1/dir2/").unwrap(), dir2);
        assert_eq!(image.resolve_raw("/dir1/dir2/..").unwrap(), dir1);
        assert_eq!(image.resolve_raw("/dir1/missing").unwrap(), 0);
        assert_eq!(image.resolve("/missing").unwrap(), None);
    }

    #[test]
    fn non_directory_stops_the_walk() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        let dir1 = builder.create_file(root, "dir1", b"plain").unwrap();
        let bytes = builder.finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();

        assert_eq!(image.resolve_raw("/dir1/dir2").unwrap(), dir1);
        assert_eq!(image.resolve_raw("/dir1/dir2/file.txt").unwrap(), dir1);
    }

    #[test]
    fn symlinks_are_not_followed() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.mkdir(root, "target").unwrap();
        let link = builder
            .mknod(root, "link", S_IFLNK | 0o777, b"/target")
            .unwrap();
        let bytes = builder.finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();
        assert_eq!(image.resolve_raw("/link/anything").unwrap(), link);
    }

    #[test]
    fn relative_paths_are_rejected() {
        let bytes = ImageBuilder::new().finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();
        assert!(matches!(
            image.resolve("etc").unwrap_err(),
            E2Error::InvalidPath(_)
        ));
        assert!(image.resolve_raw("").is_err());
    }

    #[test]
    fn resolve_inode_requires_existence() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        let file = builder.create_file(root, "f", b"12345").unwrap();
        let bytes = builder.finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();

        let (ino, inode) = image.resolve_inode("/f").unwrap();
        assert_eq!(ino.0, file);
        assert!(inode.is_regular());
        assert_eq!(inode.size, 5);

        let err = image.resolve_inode("/nope").unwrap_err();
        assert!(matches!(err, E2Error::NotFound(ref p) if p == "/nope"));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn repeated_calls_agree() {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        let d = builder.mkdir(root, "d").unwrap();
        builder.create_file(d, "x", b"").unwrap();
        let bytes = builder.finish().unwrap().into_bytes();
        let image = Ext2Image::open(&bytes).unwrap();
        let first = image.resolve("/d/x").unwrap();
        for _ in 0..10 {
            assert_eq!(image.resolve("/d/x").unwrap(), first);
        }
    }
}
