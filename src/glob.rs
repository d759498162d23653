//! Glob module: fnmatch-style matching over raw path bytes.
//!
//! Supports `*`, `?`, bracket sets (`[abc]`, `[a-z]`, `[!x]`, `[^x]`) and
//! backslash escapes. A bracket without its closing `]` matches a literal `[`.

use serde::{Deserialize, Serialize};

/// Total recursive calls allowed for one match. Patterns like `*a*a*a*b`
/// backtrack heavily; past this budget the match simply fails.
const MAX_MATCH_CALLS: usize = 100_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFlags {
    /// A leading `.` must be matched literally.
    pub period: bool,
    /// ASCII case-insensitive comparison.
    pub casefold: bool,
}

impl MatchFlags {
    pub const fn new() -> Self {
        Self { period: false, casefold: false }
    }
    pub const fn period(mut self) -> Self {
        self.period = true;
        self
    }
    pub const fn casefold(mut self, yes: bool) -> Self {
        self.casefold = yes;
        self
    }
}

/// Returns true if `pattern` matches the whole of `text`.
pub fn fnmatch(pattern: &[u8], text: &[u8], flags: MatchFlags) -> bool {
    let mut matcher = Matcher { flags, calls: 0 };
    matcher.run(pattern, 0, text, 0)
}

struct Matcher {
    flags: MatchFlags,
    calls: usize,
}

impl Matcher {
    fn run(&mut self, p: &[u8], mut pi: usize, t: &[u8], mut ti: usize) -> bool {
        self.calls += 1;
        if self.calls > MAX_MATCH_CALLS {
            return false;
        }
        while pi < p.len() {
            match p[pi] {
                b'*' => {
                    while pi < p.len() && p[pi] == b'*' {
                        pi += 1;
                    }
                    if self.leading_period(t, ti) {
                        return false;
                    }
                    let mut end = ti;
                    loop {
                        if self.run(p, pi, t, end) {
                            return true;
                        }
                        if end >= t.len() {
                            return false;
                        }
                        end += 1;
                    }
                }
                b'?' => {
                    if ti >= t.len() || self.leading_period(t, ti) {
                        return false;
                    }
                    pi += 1;
                    ti += 1;
                }
                b'[' => match self.bracket(p, pi, t.get(ti).copied()) {
                    Some((matched, next)) => {
                        if !matched || self.leading_period(t, ti) {
                            return false;
                        }
                        pi = next;
                        ti += 1;
                    }
                    None => {
                        if ti >= t.len() || !self.same(b'[', t[ti]) {
                            return false;
                        }
                        pi += 1;
                        ti += 1;
                    }
                },
                c => {
                    let (literal, width) = if c == b'\\' && pi + 1 < p.len() { (p[pi + 1], 2) } else { (c, 1) };
                    if ti >= t.len() || !self.same(literal, t[ti]) {
                        return false;
                    }
                    pi += width;
                    ti += 1;
                }
            }
        }
        ti == t.len()
    }

    /// Parses the bracket set starting at `p[start] == '['`.
    ///
    /// Returns whether `c` is in the set and the index after the closing `]`,
    /// or `None` when the set is never closed. A missing `c` never matches.
    fn bracket(&self, p: &[u8], start: usize, c: Option<u8>) -> Option<(bool, usize)> {
        let mut i = start + 1;
        let negate = i < p.len() && (p[i] == b'!' || p[i] == b'^');
        if negate {
            i += 1;
        }
        let mut found = false;
        let mut first = true;
        loop {
            if i >= p.len() {
                return None;
            }
            if p[i] == b']' && !first {
                i += 1;
                break;
            }
            first = false;
            if p[i] == b'\\' && i + 1 < p.len() {
                i += 1;
            }
            let lo = p[i];
            i += 1;
            let mut hi = lo;
            if i + 1 < p.len() && p[i] == b'-' && p[i + 1] != b']' {
                i += 1;
                if p[i] == b'\\' && i + 1 < p.len() {
                    i += 1;
                }
                hi = p[i];
                i += 1;
            }
            if let Some(c) = c {
                found |= self.in_range(lo, hi, c);
            }
        }
        match c {
            Some(_) => Some((found != negate, i)),
            None => Some((false, i)),
        }
    }

    fn in_range(&self, lo: u8, hi: u8, c: u8) -> bool {
        let range = lo..=hi;
        range.contains(&c)
            || (self.flags.casefold
                && (range.contains(&c.to_ascii_lowercase()) || range.contains(&c.to_ascii_uppercase())))
    }

    fn same(&self, a: u8, b: u8) -> bool {
        a == b || (self.flags.casefold && a.eq_ignore_ascii_case(&b))
    }

    fn leading_period(&self, t: &[u8], ti: usize) -> bool {
        self.flags.period && ti == 0 && t.first() == Some(&b'.')
    }
}
