//! Reference files: external paths named inside an expression, such as
//! `"/etc/passwd".mtime`. Each distinct path is stat'd once, at compile time.

use crate::types::FileStat;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub path: PathBuf,
    /// False when the stat failed; every other field then reads as zero.
    pub exists: bool,
    pub base_name_length: usize,
    pub stat: FileStat,
}

impl ReferenceFile {
    fn stat(path: &[u8]) -> Self {
        let path_ref = Path::new(OsStr::from_bytes(path));
        let (exists, stat) = match std::fs::metadata(path_ref) {
            Ok(md) => (true, FileStat::from_metadata(&md)),
            Err(err) => {
                debug!(path = %path_ref.display(), %err, "reference file not found");
                (false, FileStat::default())
            }
        };
        Self { path: path_ref.to_path_buf(), exists, base_name_length: base_name_length(path), stat }
    }
}

fn base_name_length(path: &[u8]) -> usize {
    let trimmed = path.len() - path.iter().rev().take_while(|&&b| b == b'/').count();
    let start = path[..trimmed].iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
    trimmed - start
}

/// Every reference file of one compile session, addressed by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFiles {
    files: Vec<ReferenceFile>,
}

impl ReferenceFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index for `path`, stat'ing it the first time it is seen.
    ///
    /// An empty path names the most recent reference file and yields `None`
    /// when there is none yet.
    pub fn resolve(&mut self, path: &[u8]) -> Option<usize> {
        if path.is_empty() {
            return self.files.len().checked_sub(1);
        }
        if let Some(index) = self.files.iter().position(|f| f.path.as_os_str().as_bytes() == path) {
            return Some(index);
        }
        self.files.push(ReferenceFile::stat(path));
        Some(self.files.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceFile> {
        self.files.get(index)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceFile> {
        self.files.iter()
    }
}
