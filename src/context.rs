//! Context module: the per-entry state a predicate is evaluated against.
//!
//! One [`Candidate`] is reused for every entry of a walk. The search resets
//! its per-entry part before each evaluation; derived attributes such as the
//! symlink target are computed on first use and memoized until the next reset.

use crate::sys;
use crate::types::FileStat;
use nix::unistd::{Gid, Group, Uid, User};
use std::ffi::OsStr;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Candidate {
    path: Vec<u8>,
    name_start: usize,
    name_end: usize,
    stat: FileStat,
    depth: usize,
    parent: Option<RawFd>,
    prune: bool,
    exit: bool,
    link_target: Option<Option<Vec<u8>>>,
    owner_missing: Option<bool>,
    group_missing: Option<bool>,
}

impl Candidate {
    /// A free-standing candidate, not attached to any open directory.
    pub fn new(path: impl AsRef<[u8]>, stat: FileStat, depth: usize) -> Self {
        let mut candidate = Self::default();
        candidate.set_root(path.as_ref());
        candidate.reset(stat, depth, None);
        candidate
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn as_path(&self) -> &Path {
        Path::new(OsStr::from_bytes(&self.path))
    }

    /// The last path component, ignoring trailing slashes.
    pub fn name(&self) -> &[u8] {
        &self.path[self.name_start..self.name_end]
    }

    pub fn stat(&self) -> &FileStat {
        &self.stat
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn pruned(&self) -> bool {
        self.prune
    }

    pub fn exited(&self) -> bool {
        self.exit
    }

    pub fn set_prune(&mut self) {
        self.prune = true;
    }

    pub fn set_exit(&mut self) {
        self.exit = true;
    }

    /// The symlink's target, or `None` for anything that is not a readable link.
    pub fn link_target(&mut self) -> Option<&[u8]> {
        if self.link_target.is_none() {
            let target = if self.stat.is_symlink() { self.read_link().ok() } else { None };
            self.link_target = Some(target);
        }
        self.link_target.as_ref().and_then(|t| t.as_deref())
    }

    /// True when the owning uid has no entry in the user database.
    pub fn owner_missing(&mut self) -> bool {
        let uid = self.stat.uid;
        *self
            .owner_missing
            .get_or_insert_with(|| matches!(User::from_uid(Uid::from_raw(uid)), Ok(None)))
    }

    /// True when the owning gid has no entry in the group database.
    pub fn group_missing(&mut self) -> bool {
        let gid = self.stat.gid;
        *self
            .group_missing
            .get_or_insert_with(|| matches!(Group::from_gid(Gid::from_raw(gid)), Ok(None)))
    }

    fn read_link(&self) -> std::io::Result<Vec<u8>> {
        match self.parent {
            Some(fd) => sys::read_link_at(Some(fd), &sys::cstring(self.name())?),
            None => sys::read_link_at(None, &sys::cstring(&self.path)?),
        }
    }

    /// Clears the per-entry state for a freshly stat'd entry.
    pub(crate) fn reset(&mut self, stat: FileStat, depth: usize, parent: Option<RawFd>) {
        self.stat = stat;
        self.depth = depth;
        self.parent = parent;
        self.prune = false;
        self.exit = false;
        self.link_target = None;
        self.owner_missing = None;
        self.group_missing = None;
    }

    pub(crate) fn set_root(&mut self, path: &[u8]) {
        self.path.clear();
        self.path.extend_from_slice(path);
        let trimmed = path.len() - path.iter().rev().take_while(|&&b| b == b'/').count();
        if trimmed == 0 {
            self.name_start = 0;
            self.name_end = path.len();
        } else {
            self.name_start = path[..trimmed].iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
            self.name_end = trimmed;
        }
    }

    /// Replaces everything past `dir_len` with `/name`.
    pub(crate) fn set_child(&mut self, dir_len: usize, name: &[u8]) {
        self.path.truncate(dir_len);
        if !self.path.ends_with(b"/") {
            self.path.push(b'/');
        }
        self.name_start = self.path.len();
        self.path.extend_from_slice(name);
        self.name_end = self.path.len();
    }

    /// Restores a path previously built by `set_root` or `set_child`.
    pub(crate) fn restore(&mut self, path_len: usize, name_start: usize, name_end: usize) {
        self.path.truncate(path_len);
        self.name_start = name_start;
        self.name_end = name_end;
    }

    pub(crate) fn name_range(&self) -> (usize, usize) {
        (self.name_start, self.name_end)
    }
}
