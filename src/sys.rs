//! Parent-relative filesystem syscalls.
//!
//! Every lookup during a walk goes through the open handle of the parent
//! directory, never through a re-resolved path string.

use crate::types::FileStat;
use nix::dir::Dir;
use nix::fcntl::{self, AtFlags, OFlag};
use nix::sys::stat::{self, Mode};
use std::ffi::{CStr, CString};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStringExt;

/// An open directory stream. The descriptor is close-on-exec and closed on
/// drop.
#[derive(Debug)]
pub(crate) struct DirHandle {
    dir: Dir,
}

impl AsRawFd for DirHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.dir.as_raw_fd()
    }
}

pub(crate) fn cstring(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a nul byte"))
}

/// fstatat(2) relative to `dir` (or the working directory).
pub(crate) fn stat_at(dir: Option<RawFd>, name: &CStr, follow: bool) -> io::Result<FileStat> {
    let flags = if follow { AtFlags::empty() } else { AtFlags::AT_SYMLINK_NOFOLLOW };
    let st = stat::fstatat(dir, name, flags)?;
    Ok(FileStat::from_raw(&st))
}

/// Opens a directory relative to `dir`. Without `follow`, a symlink swapped
/// in after the stat makes the open fail instead of escaping the tree.
pub(crate) fn open_dir_at(dir: Option<RawFd>, name: &CStr, follow: bool) -> io::Result<DirHandle> {
    let mut flags = OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC;
    if !follow {
        flags |= OFlag::O_NOFOLLOW;
    }
    let dir = Dir::openat(dir, name, flags, Mode::empty())?;
    Ok(DirHandle { dir })
}

/// readlinkat(2).
pub(crate) fn read_link_at(dir: Option<RawFd>, name: &CStr) -> io::Result<Vec<u8>> {
    Ok(fcntl::readlinkat(dir, name)?.into_vec())
}

impl DirHandle {
    pub(crate) fn stat(&self) -> io::Result<FileStat> {
        let st = stat::fstat(self.dir.as_raw_fd())?;
        Ok(FileStat::from_raw(&st))
    }

    /// Reads every entry name except `.` and `..`.
    ///
    /// The `*at` calls on the children only need the descriptor, so the
    /// stream position left behind does not matter.
    pub(crate) fn read_names(&mut self) -> io::Result<Vec<CString>> {
        let mut names = Vec::new();
        for entry in self.dir.iter() {
            let entry = entry?;
            let name = entry.file_name();
            let bytes = name.to_bytes();
            if bytes == b"." || bytes == b".." {
                continue;
            }
            names.push(name.to_owned());
        }
        Ok(names)
    }
}

/// How many directory levels may be open at once.
pub(crate) fn depth_ceiling() -> usize {
    const RESERVE: i64 = 16;
    let open_max = nix::unistd::sysconf(nix::unistd::SysconfVar::OPEN_MAX)
        .ok()
        .flatten()
        .map(|n| n as i64)
        .unwrap_or(256);
    (open_max - RESERVE).clamp(16, 65536) as usize
}
