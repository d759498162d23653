//! rh: find files using C-like expressions.
//!
//! An expression such as `size > 10M && "*.log"` is compiled once into a flat
//! bytecode program, then evaluated by a small stack machine for every entry
//! of a race-resistant directory walk.
//!
//! # Architecture
//! - Symbol table (built-in fields/constants, transient user scopes)
//! - Lexer and recursive-descent compiler emitting bytecode
//! - Stack VM with explicit call frames
//! - Traversal engine using parent-relative syscalls
//! - Extensible visitor for matches

mod symbols;
mod lexer;
mod date;
mod ir;
mod compiler;
mod reffile;
mod glob;
mod functions;
mod context;
mod vm;
mod sys;
mod options;
mod search;
mod engine;
mod types;

pub use symbols::*;
pub use lexer::{Source, Token};
pub use ir::*;
pub use reffile::*;
pub use glob::*;
pub use functions::*;
pub use context::*;
pub use vm::*;
pub use options::*;
pub use search::*;
pub use engine::*;
pub use types::*;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A fatal problem found while compiling expression source.
///
/// Compilation never recovers: the first error aborts the whole compile and
/// no partial program is left runnable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}: line {line}, byte {column}: {message}{}", near(.excerpt))]
pub struct CompileError {
    pub source_name: String,
    pub line: usize,
    pub column: usize,
    pub excerpt: String,
    pub message: String,
}

fn near(excerpt: &str) -> String {
    if excerpt.is_empty() {
        String::new()
    } else {
        format!(" (near {:?})", excerpt)
    }
}

/// Symbol table failures, reported by the lexer as a [`CompileError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("too many identifiers (limit {0})")]
    TooManyIdentifiers(usize),
    #[error("unknown pattern modifier or field \"{0}\"")]
    UnknownModifier(String),
    #[error("ambiguous pattern modifier \"{text}\" (could be {candidates})")]
    AmbiguousModifier { text: String, candidates: String },
}

/// The program has no room left for another instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("program too big (limit {0} instructions)")]
pub struct ProgramTooBig(pub usize);

/// Errors raised while evaluating a compiled predicate. All of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivideByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("parameter slot {0} is outside the stack")]
    BadParameter(usize),
    #[error("program counter {0} is outside the program")]
    BadProgramCounter(usize),
    #[error("reference file {0} does not exist")]
    BadReference(usize),
    #[error("pattern {0} does not exist")]
    BadPattern(usize),
}

/// Problems met while walking the filesystem.
///
/// Only the affected entry or subtree is skipped. Cycles and broken symlinks
/// are notices rather than failures, see [`SearchError::is_failure`].
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{}: {source}", .path.display())]
    Stat { path: PathBuf, source: io::Error },
    #[error("{}: cannot open directory: {source}", .path.display())]
    OpenDir { path: PathBuf, source: io::Error },
    #[error("{}: cannot read directory: {source}", .path.display())]
    ReadDir { path: PathBuf, source: io::Error },
    #[error("{}: directory changed during traversal", .path.display())]
    Changed { path: PathBuf },
    #[error("{}: too deep (limit {limit}), skipping", .path.display())]
    TooDeep { path: PathBuf, limit: usize },
    #[error("{}: {source}", .path.display())]
    Visit { path: PathBuf, source: io::Error },
    #[error("{}: filesystem loop detected", .path.display())]
    Cycle { path: PathBuf },
    #[error("{}: broken symlink: {source}", .path.display())]
    BrokenSymlink { path: PathBuf, source: io::Error },
}

impl SearchError {
    /// Whether this problem should make the overall search fail.
    pub fn is_failure(&self) -> bool {
        !matches!(self, SearchError::Cycle { .. } | SearchError::BrokenSymlink { .. })
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            SearchError::Stat { path, .. }
            | SearchError::OpenDir { path, .. }
            | SearchError::ReadDir { path, .. }
            | SearchError::Changed { path }
            | SearchError::TooDeep { path, .. }
            | SearchError::Visit { path, .. }
            | SearchError::Cycle { path }
            | SearchError::BrokenSymlink { path, .. } => path,
        }
    }
}

/// Unified error type for rh operations
#[derive(Debug, Error)]
pub enum RhError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] VmError),
    #[error("no start expression specified")]
    NoExpression,
    #[error("{name}: {source}")]
    Io { name: String, source: io::Error },
}
