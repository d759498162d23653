//! Search module: the race-resistant directory walk.
//!
//! Every entry is looked up relative to an open handle on its parent
//! directory, so renaming or swapping a directory mid-walk cannot redirect
//! the search. Open directories live on an explicit work stack; tree depth
//! never grows the native stack.

use crate::context::Candidate;
use crate::engine::Predicate;
use crate::options::{Order, SearchOptions};
use crate::sys::{self, DirHandle};
use crate::types::FileStat;
use crate::vm::Vm;
use crate::{RhError, SearchError};
use std::ffi::{CStr, CString};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Receives every entry that satisfies the predicate.
pub trait Visitor {
    fn visit(&mut self, candidate: &Candidate) -> io::Result<()>;
}

impl<F> Visitor for F
where
    F: FnMut(&Candidate) -> io::Result<()>,
{
    fn visit(&mut self, candidate: &Candidate) -> io::Result<()> {
        self(candidate)
    }
}

/// Called for every failure and every enabled notice.
pub type ErrorCallback = Arc<dyn Fn(&SearchError) + Send + Sync>;

/// Counters for one [`Search::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Entries handed to the visitor.
    pub visited: usize,
    /// Entries the predicate ran against.
    pub evaluated: usize,
    pub errors: usize,
    pub notices: usize,
    /// The predicate evaluated `exit`.
    pub exited: bool,
}

impl Summary {
    pub fn success(&self) -> bool {
        self.errors == 0
    }
}

pub struct Search<'p> {
    predicate: &'p Predicate,
    options: SearchOptions,
    on_error: ErrorCallback,
    depth_ceiling: usize,
}

impl<'p> Search<'p> {
    pub fn new(predicate: &'p Predicate, options: SearchOptions) -> Self {
        Self {
            predicate,
            options,
            on_error: Arc::new(|err: &SearchError| warn!("{}", err)),
            depth_ceiling: sys::depth_ceiling(),
        }
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SearchError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(callback);
        self
    }

    /// Caps how many directories may be open at once.
    pub fn depth_ceiling(mut self, levels: usize) -> Self {
        self.depth_ceiling = levels.max(1);
        self
    }

    /// Walks each starting path in turn.
    ///
    /// Per-entry problems are reported through the error callback and
    /// counted; only a fatal VM error ends the search with `Err`.
    pub fn run<I, P, V>(&self, paths: I, visitor: &mut V) -> Result<Summary, RhError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        V: Visitor + ?Sized,
    {
        let mut walk = Walk::new(self, visitor);
        for path in paths {
            if walk.walk_root(path.as_ref().as_os_str().as_bytes())? == Flow::Exit {
                break;
            }
        }
        debug!(summary = ?walk.summary, "search finished");
        Ok(walk.summary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// One open directory on the work stack.
struct Level {
    dir: DirHandle,
    names: std::vec::IntoIter<CString>,
    /// Length of the directory's own path in the path buffer.
    path_len: usize,
    name_range: (usize, usize),
    depth: usize,
    /// Kept for post-order evaluation.
    stat: FileStat,
}

struct Walk<'s, 'p, V: Visitor + ?Sized> {
    search: &'s Search<'p>,
    vm: Vm,
    candidate: Candidate,
    visitor: &'s mut V,
    summary: Summary,
    levels: Vec<Level>,
    /// `(dev, ino)` of every open level, in step with `levels`.
    cycles: Vec<(u64, u64)>,
    root_dev: u64,
}

impl<'s, 'p, V: Visitor + ?Sized> Walk<'s, 'p, V> {
    fn new(search: &'s Search<'p>, visitor: &'s mut V) -> Self {
        Self {
            search,
            vm: search.predicate.new_vm(),
            candidate: Candidate::default(),
            visitor,
            summary: Summary::default(),
            levels: Vec::new(),
            cycles: Vec::new(),
            root_dev: 0,
        }
    }

    fn options(&self) -> &SearchOptions {
        &self.search.options
    }

    fn current_path(&self) -> PathBuf {
        self.candidate.as_path().to_path_buf()
    }

    fn report(&mut self, err: SearchError) {
        if err.is_failure() {
            self.summary.errors += 1;
        } else {
            self.summary.notices += 1;
        }
        (self.search.on_error)(&err);
    }

    fn walk_root(&mut self, root: &[u8]) -> Result<Flow, RhError> {
        self.levels.clear();
        self.cycles.clear();
        self.candidate.set_root(root);
        let name = match sys::cstring(root) {
            Ok(name) => name,
            Err(source) => {
                let path = self.current_path();
                self.report(SearchError::Stat { path, source });
                return Ok(Flow::Continue);
            }
        };
        if self.visit_entry(None, &name, 0)? == Flow::Exit {
            return Ok(Flow::Exit);
        }

        while let Some(level) = self.levels.last_mut() {
            match level.names.next() {
                Some(name) => {
                    let parent = level.dir.as_raw_fd();
                    let depth = level.depth + 1;
                    let path_len = level.path_len;
                    self.candidate.set_child(path_len, name.to_bytes());
                    if self.visit_entry(Some(parent), &name, depth)? == Flow::Exit {
                        return Ok(Flow::Exit);
                    }
                }
                None => {
                    if self.leave_level()? == Flow::Exit {
                        return Ok(Flow::Exit);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Stats, evaluates and possibly descends into one entry whose path is
    /// already in the candidate's buffer.
    fn visit_entry(&mut self, parent: Option<RawFd>, name: &CStr, depth: usize) -> Result<Flow, RhError> {
        let mut stat = match sys::stat_at(parent, name, false) {
            Ok(stat) => stat,
            Err(source) => {
                let path = self.current_path();
                self.report(SearchError::Stat { path, source });
                return Ok(Flow::Continue);
            }
        };
        let mut followed = false;
        if stat.is_symlink() && self.options().follow.applies_at(depth) {
            match sys::stat_at(parent, name, true) {
                Ok(target) => {
                    stat = target;
                    followed = true;
                }
                Err(source) => {
                    if self.options().report_broken_symlinks {
                        let path = self.current_path();
                        self.report(SearchError::BrokenSymlink { path, source });
                    }
                }
            }
        }
        if parent.is_none() {
            self.root_dev = stat.dev;
        }
        self.candidate.reset(stat, depth, parent);

        let pre_order = self.options().order == Order::PreOrder;
        if pre_order && self.evaluate()? == Flow::Exit {
            return Ok(Flow::Exit);
        }
        let descended = stat.is_dir() && self.descend(parent, name, stat, depth, followed);
        if !pre_order && !descended {
            return self.evaluate();
        }
        Ok(Flow::Continue)
    }

    /// Opens `name` as a new level. Returns false when the entry is not
    /// descended into for any reason.
    fn descend(&mut self, parent: Option<RawFd>, name: &CStr, stat: FileStat, depth: usize, follow: bool) -> bool {
        if self.candidate.pruned() || depth >= self.options().max_depth {
            return false;
        }
        if self.options().single_filesystem && stat.dev != self.root_dev {
            trace!(path = %self.candidate.as_path().display(), "not crossing filesystem boundary");
            return false;
        }
        if self.cycles.contains(&stat.identity()) {
            debug!(path = %self.candidate.as_path().display(), "filesystem loop");
            if self.options().report_cycles {
                let path = self.current_path();
                self.report(SearchError::Cycle { path });
            }
            return false;
        }
        if self.levels.len() >= self.search.depth_ceiling {
            let path = self.current_path();
            let limit = self.search.depth_ceiling;
            self.report(SearchError::TooDeep { path, limit });
            return false;
        }

        let mut dir = match sys::open_dir_at(parent, name, follow) {
            Ok(dir) => dir,
            Err(source) => {
                let path = self.current_path();
                self.report(SearchError::OpenDir { path, source });
                return false;
            }
        };
        match dir.stat() {
            Ok(opened) if opened.identity() == stat.identity() => {}
            Ok(_) => {
                let path = self.current_path();
                self.report(SearchError::Changed { path });
                return false;
            }
            Err(source) => {
                let path = self.current_path();
                self.report(SearchError::OpenDir { path, source });
                return false;
            }
        }
        let names = match dir.read_names() {
            Ok(names) => names,
            Err(source) => {
                let path = self.current_path();
                self.report(SearchError::ReadDir { path, source });
                return false;
            }
        };

        debug!(path = %self.candidate.as_path().display(), depth, entries = names.len(), "descending");
        self.cycles.push(stat.identity());
        self.levels.push(Level {
            dir,
            names: names.into_iter(),
            path_len: self.candidate.path().len(),
            name_range: self.candidate.name_range(),
            depth,
            stat,
        });
        true
    }

    /// Pops the finished level, evaluating the directory itself in post-order.
    fn leave_level(&mut self) -> Result<Flow, RhError> {
        let Some(level) = self.levels.pop() else {
            return Ok(Flow::Continue);
        };
        self.cycles.pop();
        if self.options().order == Order::PostOrder {
            let (start, end) = level.name_range;
            self.candidate.restore(level.path_len, start, end);
            let parent = self.levels.last().map(|l| l.dir.as_raw_fd());
            self.candidate.reset(level.stat, level.depth, parent);
            return self.evaluate();
        }
        Ok(Flow::Continue)
    }

    fn evaluate(&mut self) -> Result<Flow, RhError> {
        self.summary.evaluated += 1;
        let value = self.search.predicate.evaluate(&mut self.vm, &mut self.candidate)?;
        trace!(path = %self.candidate.as_path().display(), value, "evaluated");
        if value != 0 && !self.candidate.pruned() && self.candidate.depth() >= self.options().min_depth {
            self.summary.visited += 1;
            if let Err(source) = self.visitor.visit(&self.candidate) {
                let path = self.current_path();
                self.report(SearchError::Visit { path, source });
            }
        }
        if self.candidate.exited() {
            debug!(path = %self.candidate.as_path().display(), "exit requested");
            self.summary.exited = true;
            return Ok(Flow::Exit);
        }
        Ok(Flow::Continue)
    }
}
