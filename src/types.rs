//! Types module: the inode metadata every field function reads from.
//!
//! All values the language handles are `i64`; FileStat keeps the raw widths and
//! converts at the accessor.

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// Every value in the expression language.
pub type Value = i64;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_ISUID: u32 = 0o4000;
pub const S_ISGID: u32 = 0o2000;
pub const S_ISVTX: u32 = 0o1000;

/// stat(2) fields, in a platform independent shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileStat {
    pub(crate) fn from_raw(st: &nix::sys::stat::FileStat) -> Self {
        Self {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u64,
            uid: st.st_uid as u32,
            gid: st.st_gid as u32,
            rdev: st.st_rdev as u64,
            size: st.st_size as i64,
            blksize: st.st_blksize as i64,
            blocks: st.st_blocks as i64,
            atime: st.st_atime as i64,
            mtime: st.st_mtime as i64,
            ctime: st.st_ctime as i64,
        }
    }

    pub fn from_metadata(md: &Metadata) -> Self {
        Self {
            dev: md.dev(),
            ino: md.ino(),
            mode: md.mode(),
            nlink: md.nlink(),
            uid: md.uid(),
            gid: md.gid(),
            rdev: md.rdev(),
            size: md.size() as i64,
            blksize: md.blksize() as i64,
            blocks: md.blocks() as i64,
            atime: md.atime(),
            mtime: md.mtime(),
            ctime: md.ctime(),
        }
    }

    /// Builds a stat for a synthetic entry with the given mode and size.
    pub fn synthetic(mode: u32, size: i64) -> Self {
        Self { mode, size, nlink: 1, ..Self::default() }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// The (device, inode) pair identifying this object on the system.
    pub fn identity(&self) -> (u64, u64) {
        (self.dev, self.ino)
    }

    pub fn major(&self) -> i64 {
        dev_major(self.dev)
    }

    pub fn minor(&self) -> i64 {
        dev_minor(self.dev)
    }

    pub fn rmajor(&self) -> i64 {
        dev_major(self.rdev)
    }

    pub fn rminor(&self) -> i64 {
        dev_minor(self.rdev)
    }
}

fn dev_major(dev: u64) -> i64 {
    nix::sys::stat::major(dev as _) as i64
}

fn dev_minor(dev: u64) -> i64 {
    nix::sys::stat::minor(dev as _) as i64
}
