//! Functions module: the built-in field catalogue and pattern modifiers.
//!
//! Field functions read one value from the current [`Candidate`] (or from a
//! [`ReferenceFile`] resolved at compile time). They may set the prune/exit
//! flags and may memoize lazy I/O inside the candidate.

use crate::context::Candidate;
use crate::glob::{fnmatch, MatchFlags};
use crate::reffile::ReferenceFile;
use crate::types::{Value, S_IFMT};
use serde::{Deserialize, Serialize};

/// Permission bits including setuid/setgid/sticky.
const PERM_MASK: u32 = 0o7777;

macro_rules! builtin_fields {
    ($(#[$meta:meta])* $enum:ident($ctx:ident: $ctx_ty:ty) {
        $( $variant:ident: $name:literal => $body:expr ),* $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $enum {
            $($variant,)*
        }

        impl $enum {
            /// Every variant, in registration order.
            pub const ALL: &'static [$enum] = &[$($enum::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $($enum::$variant => $name,)*
                }
            }

            pub fn eval(self, $ctx: $ctx_ty) -> Value {
                match self {
                    $($enum::$variant => $body,)*
                }
            }
        }
    };
}

builtin_fields! {
    /// A field of the entry currently being evaluated.
    FieldOp(ctx: &mut Candidate) {
        Dev: "dev" => ctx.stat().dev as Value,
        Major: "major" => ctx.stat().major(),
        Minor: "minor" => ctx.stat().minor(),
        Ino: "ino" => ctx.stat().ino as Value,
        Mode: "mode" => ctx.stat().mode as Value,
        Nlink: "nlink" => ctx.stat().nlink as Value,
        Uid: "uid" => ctx.stat().uid as Value,
        Gid: "gid" => ctx.stat().gid as Value,
        Rdev: "rdev" => ctx.stat().rdev as Value,
        Rmajor: "rmajor" => ctx.stat().rmajor(),
        Rminor: "rminor" => ctx.stat().rminor(),
        Size: "size" => ctx.stat().size,
        Blksize: "blksize" => ctx.stat().blksize,
        Blocks: "blocks" => ctx.stat().blocks,
        Atime: "atime" => ctx.stat().atime,
        Mtime: "mtime" => ctx.stat().mtime,
        Ctime: "ctime" => ctx.stat().ctime,
        Depth: "depth" => ctx.depth() as Value,
        Prune: "prune" => {
            ctx.set_prune();
            1
        },
        Exit: "exit" => {
            ctx.set_exit();
            1
        },
        Strlen: "strlen" => ctx.name().len() as Value,
        Type: "type" => (ctx.stat().mode & S_IFMT) as Value,
        Perm: "perm" => (ctx.stat().mode & PERM_MASK) as Value,
        Nouser: "nouser" => ctx.owner_missing() as Value,
        Nogroup: "nogroup" => ctx.group_missing() as Value,
    }
}

builtin_fields! {
    /// A field of a reference file, written `"path".field`.
    RefField(file: &ReferenceFile) {
        Exists: "exists" => file.exists as Value,
        Dev: "dev" => file.stat.dev as Value,
        Major: "major" => file.stat.major(),
        Minor: "minor" => file.stat.minor(),
        Ino: "ino" => file.stat.ino as Value,
        Mode: "mode" => file.stat.mode as Value,
        Nlink: "nlink" => file.stat.nlink as Value,
        Uid: "uid" => file.stat.uid as Value,
        Gid: "gid" => file.stat.gid as Value,
        Rdev: "rdev" => file.stat.rdev as Value,
        Rmajor: "rmajor" => file.stat.rmajor(),
        Rminor: "rminor" => file.stat.rminor(),
        Size: "size" => file.stat.size,
        Blksize: "blksize" => file.stat.blksize,
        Blocks: "blocks" => file.stat.blocks,
        Atime: "atime" => file.stat.atime,
        Mtime: "mtime" => file.stat.mtime,
        Ctime: "ctime" => file.stat.ctime,
        Strlen: "strlen" => file.base_name_length as Value,
        Type: "type" => (file.stat.mode & S_IFMT) as Value,
        Perm: "perm" => (file.stat.mode & PERM_MASK) as Value,
    }
}

/// How a string pattern is applied to a candidate, written `"text".modifier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternOp {
    /// Basename glob.
    Glob,
    /// Full path glob.
    Path,
    /// Case-insensitive basename glob.
    I,
    IPath,
    /// Glob against a symlink's target.
    Link,
    ILink,
    #[cfg(feature = "regex")]
    Re,
    #[cfg(feature = "regex")]
    Rei,
    #[cfg(feature = "regex")]
    RePath,
    #[cfg(feature = "regex")]
    ReiPath,
    #[cfg(feature = "regex")]
    ReLink,
    #[cfg(feature = "regex")]
    ReiLink,
}

impl PatternOp {
    #[cfg(not(feature = "regex"))]
    pub const ALL: &'static [PatternOp] =
        &[PatternOp::Glob, PatternOp::Path, PatternOp::I, PatternOp::IPath, PatternOp::Link, PatternOp::ILink];

    #[cfg(feature = "regex")]
    pub const ALL: &'static [PatternOp] = &[
        PatternOp::Glob,
        PatternOp::Path,
        PatternOp::I,
        PatternOp::IPath,
        PatternOp::Link,
        PatternOp::ILink,
        PatternOp::Re,
        PatternOp::Rei,
        PatternOp::RePath,
        PatternOp::ReiPath,
        PatternOp::ReLink,
        PatternOp::ReiLink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PatternOp::Glob => "glob",
            PatternOp::Path => "path",
            PatternOp::I => "i",
            PatternOp::IPath => "ipath",
            PatternOp::Link => "link",
            PatternOp::ILink => "ilink",
            #[cfg(feature = "regex")]
            PatternOp::Re => "re",
            #[cfg(feature = "regex")]
            PatternOp::Rei => "rei",
            #[cfg(feature = "regex")]
            PatternOp::RePath => "repath",
            #[cfg(feature = "regex")]
            PatternOp::ReiPath => "reipath",
            #[cfg(feature = "regex")]
            PatternOp::ReLink => "relink",
            #[cfg(feature = "regex")]
            PatternOp::ReiLink => "reilink",
        }
    }

    /// The full-path equivalent of a basename modifier. Used when the
    /// pattern text contains a `/`.
    pub fn upgraded(self) -> Self {
        match self {
            PatternOp::Glob => PatternOp::Path,
            PatternOp::I => PatternOp::IPath,
            #[cfg(feature = "regex")]
            PatternOp::Re => PatternOp::RePath,
            #[cfg(feature = "regex")]
            PatternOp::Rei => PatternOp::ReiPath,
            other => other,
        }
    }

    fn casefold(self) -> bool {
        match self {
            PatternOp::I | PatternOp::IPath | PatternOp::ILink => true,
            #[cfg(feature = "regex")]
            PatternOp::Rei | PatternOp::ReiPath | PatternOp::ReiLink => true,
            _ => false,
        }
    }

    fn subject(self) -> Subject {
        match self {
            PatternOp::Glob | PatternOp::I => Subject::Name,
            PatternOp::Path | PatternOp::IPath => Subject::Path,
            PatternOp::Link | PatternOp::ILink => Subject::LinkTarget,
            #[cfg(feature = "regex")]
            PatternOp::Re | PatternOp::Rei => Subject::Name,
            #[cfg(feature = "regex")]
            PatternOp::RePath | PatternOp::ReiPath => Subject::Path,
            #[cfg(feature = "regex")]
            PatternOp::ReLink | PatternOp::ReiLink => Subject::LinkTarget,
        }
    }

    #[cfg(feature = "regex")]
    fn is_regex(self) -> bool {
        matches!(
            self,
            PatternOp::Re
                | PatternOp::Rei
                | PatternOp::RePath
                | PatternOp::ReiPath
                | PatternOp::ReLink
                | PatternOp::ReiLink
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Name,
    Path,
    LinkTarget,
}

/// A compiled pattern from the program's pattern pool.
#[derive(Debug, Clone)]
pub struct Pattern {
    op: PatternOp,
    text: Vec<u8>,
    #[cfg(feature = "regex")]
    regex: Option<regex::bytes::Regex>,
}

impl Pattern {
    /// Compiles `text` for `op`. Fails only for an invalid regular expression.
    pub fn new(op: PatternOp, text: impl Into<Vec<u8>>) -> Result<Self, String> {
        let text = text.into();
        #[cfg(feature = "regex")]
        let regex = if op.is_regex() {
            let source = std::str::from_utf8(&text).map_err(|_| "regular expression is not valid UTF-8".to_string())?;
            let re = regex::bytes::RegexBuilder::new(source)
                .case_insensitive(op.casefold())
                .build()
                .map_err(|e| e.to_string())?;
            Some(re)
        } else {
            None
        };
        Ok(Self {
            op,
            text,
            #[cfg(feature = "regex")]
            regex,
        })
    }

    pub fn op(&self) -> PatternOp {
        self.op
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn matches(&self, ctx: &mut Candidate) -> bool {
        match self.op.subject() {
            Subject::Name => self.matches_bytes(ctx.name(), MatchFlags::new().period()),
            Subject::Path => self.matches_bytes(ctx.path(), MatchFlags::new()),
            Subject::LinkTarget => match ctx.link_target() {
                Some(target) => self.matches_bytes(target, MatchFlags::new()),
                None => false,
            },
        }
    }

    fn matches_bytes(&self, subject: &[u8], flags: MatchFlags) -> bool {
        #[cfg(feature = "regex")]
        if let Some(re) = &self.regex {
            return re.is_match(subject);
        }
        fnmatch(&self.text, subject, flags.casefold(self.op.casefold()))
    }
}
