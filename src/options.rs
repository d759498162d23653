//! Options module: search configuration and compile/evaluation capacities.
//!
//! Both structs are plain serde types with a `Default`, and [`SearchOptions`]
//! gets a builder in the same style as the rest of the crate.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// When a directory's entry is evaluated relative to its subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Evaluate an entry before descending into it.
    #[default]
    PreOrder,
    /// Evaluate an entry after its whole subtree ("depth-first" listing).
    PostOrder,
}

/// Which symbolic links are followed during the walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowMode {
    #[default]
    Never,
    /// Only the starting paths themselves.
    Args,
    Always,
}

impl FollowMode {
    pub fn applies_at(self, depth: usize) -> bool {
        match self {
            FollowMode::Never => false,
            FollowMode::Args => depth == 0,
            FollowMode::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SearchOptions {
    pub min_depth: usize,
    pub max_depth: usize,
    pub order: Order,
    pub follow: FollowMode,
    pub single_filesystem: bool,
    pub report_cycles: bool,
    pub report_broken_symlinks: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            min_depth: 0,
            max_depth: usize::MAX,
            order: Order::PreOrder,
            follow: FollowMode::Never,
            single_filesystem: false,
            report_cycles: true,
            report_broken_symlinks: false,
        }
    }
}

impl SearchOptions {
    pub fn builder() -> SearchOptionsBuilder {
        SearchOptionsBuilder::new()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SearchOptionsBuilder {
    options: SearchOptions,
}

impl SearchOptionsBuilder {
    pub fn new() -> Self {
        Self { options: SearchOptions::default() }
    }
    pub fn min_depth(mut self, depth: usize) -> Self {
        self.options.min_depth = depth;
        self
    }
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth;
        self
    }
    pub fn order(mut self, order: Order) -> Self {
        self.options.order = order;
        self
    }
    pub fn follow(mut self, follow: FollowMode) -> Self {
        self.options.follow = follow;
        self
    }
    pub fn single_filesystem(mut self, yes: bool) -> Self {
        self.options.single_filesystem = yes;
        self
    }
    pub fn report_cycles(mut self, yes: bool) -> Self {
        self.options.report_cycles = yes;
        self
    }
    pub fn report_broken_symlinks(mut self, yes: bool) -> Self {
        self.options.report_broken_symlinks = yes;
        self
    }
    pub fn build(self) -> SearchOptions {
        self.options
    }
}

/// Fixed capacities of the compiled program, the value stack and the
/// transient symbol scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub program_size: usize,
    pub stack_size: usize,
    pub max_identifiers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { program_size: 10_000, stack_size: 1_000, max_identifiers: 1_000 }
    }
}

const PROGRAM_SIZE_RANGE: RangeInclusive<usize> = 64..=1_000_000;
const STACK_SIZE_RANGE: RangeInclusive<usize> = 16..=1_000_000;
const MAX_IDENTIFIERS_RANGE: RangeInclusive<usize> = 16..=100_000;

impl Limits {
    /// Defaults overridden by `RH_PROGRAM_SIZE`, `RH_STACK_SIZE` and
    /// `RH_MAX_IDENTIFIERS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Limits::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &str, default: usize, range: RangeInclusive<usize>| -> usize {
            match lookup(name).and_then(|v| v.trim().parse::<usize>().ok()) {
                Some(v) => v.clamp(*range.start(), *range.end()),
                None => default,
            }
        };
        Self {
            program_size: read("RH_PROGRAM_SIZE", defaults.program_size, PROGRAM_SIZE_RANGE),
            stack_size: read("RH_STACK_SIZE", defaults.stack_size, STACK_SIZE_RANGE),
            max_identifiers: read("RH_MAX_IDENTIFIERS", defaults.max_identifiers, MAX_IDENTIFIERS_RANGE),
        }
    }
}
