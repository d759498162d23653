//! Lexer: expression source to tokens.
//!
//! The lexer consults the symbol table for every name, inserting unknown
//! ones as identifiers, and resolves reference file paths as soon as it sees
//! them. Any violation is a [`CompileError`]; there is no recovery.

use crate::functions::{PatternOp, RefField};
use crate::reffile::ReferenceFiles;
use crate::symbols::{Symbol, SymbolKind, SymbolTable};
use crate::types::Value;
use crate::CompileError;
use nix::unistd::{getgid, getuid, Group, User};
use std::io::{self, Read};
use std::path::Path;

/// Bytes of the current line shown before the error position.
const EXCERPT_LEN: usize = 40;

/// Expression text together with the name used in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    name: String,
    text: Vec<u8>,
}

impl Source {
    pub fn new(name: impl Into<String>, text: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), text: text.into() }
    }

    /// Reads the whole stream up front.
    pub fn from_reader<R: Read>(name: impl Into<String>, mut reader: R) -> io::Result<Self> {
        let mut text = Vec::new();
        reader.read_to_end(&mut text)?;
        Ok(Self::new(name, text))
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(path.display().to_string(), file)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Eof,
    Number(Value),
    Pattern { text: Vec<u8>, op: PatternOp },
    RefFile { index: usize, field: RefField },
    Symbol(Symbol),
    Or,
    And,
    Eq,
    Ne,
    Le,
    Ge,
    Shl,
    Shr,
    /// Any other single byte: `( ) { } [ ] ? : , ; + - * / % < > ! ~ & | ^` and so on.
    Char(u8),
}

impl Token {
    /// A short rendering for "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Eof => "end of input".to_string(),
            Token::Number(n) => format!("number {}", n),
            Token::Pattern { text, .. } => format!("pattern \"{}\"", String::from_utf8_lossy(text)),
            Token::RefFile { field, .. } => format!("reference file field .{}", field.name()),
            Token::Symbol(sym) => format!("{} {}", sym.kind.describe(), sym.name),
            Token::Or => "'||'".to_string(),
            Token::And => "'&&'".to_string(),
            Token::Eq => "'=='".to_string(),
            Token::Ne => "'!='".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::Shl => "'<<'".to_string(),
            Token::Shr => "'>>'".to_string(),
            Token::Char(c) if c.is_ascii_graphic() => format!("'{}'", *c as char),
            Token::Char(c) => format!("byte 0x{:02x}", c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Account {
    User,
    Group,
}

pub(crate) struct Lexer {
    source: Source,
    pos: usize,
    decimal_only: bool,
    /// The previous token was `-`, so a decimal literal may reach 2^63.
    after_minus: bool,
}

impl Lexer {
    pub(crate) fn new(source: Source) -> Self {
        Self { source, pos: 0, decimal_only: false, after_minus: false }
    }

    /// While set, a leading `0` does not switch to octal (date fields like `08`).
    pub(crate) fn set_decimal_only(&mut self, on: bool) {
        self.decimal_only = on;
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> CompileError {
        let text = &self.source.text;
        let pos = self.pos.min(text.len());
        let line_start = text[..pos].iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let line = text[..line_start].iter().filter(|&&b| b == b'\n').count() + 1;
        let excerpt_start = line_start.max(pos.saturating_sub(EXCERPT_LEN));
        CompileError {
            source_name: self.source.name.clone(),
            line,
            column: pos - line_start,
            excerpt: String::from_utf8_lossy(&text[excerpt_start..pos]).trim().to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.text.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.text.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    /// Consumes `want` if it is next.
    fn eat(&mut self, want: u8) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn next_token(
        &mut self,
        symbols: &mut SymbolTable,
        refs: &mut ReferenceFiles,
    ) -> Result<Token, CompileError> {
        self.skip_trivia()?;
        let c = match self.bump() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };
        let token = match c {
            b'0'..=b'9' => self.number(c)?,
            c if is_ident_start(c) => self.identifier(symbols)?,
            b'$' => self.account(Account::User)?,
            b'@' => self.account(Account::Group)?,
            b'"' => self.string(symbols, refs)?,
            b'=' if self.eat(b'=') => Token::Eq,
            b'!' if self.eat(b'=') => Token::Ne,
            b'<' if self.eat(b'=') => Token::Le,
            b'<' if self.eat(b'<') => Token::Shl,
            b'>' if self.eat(b'=') => Token::Ge,
            b'>' if self.eat(b'>') => Token::Shr,
            b'&' if self.eat(b'&') => Token::And,
            b'|' if self.eat(b'|') => Token::Or,
            other => Token::Char(other),
        };
        self.after_minus = token == Token::Char(b'-');
        Ok(token)
    }

    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'#') => self.skip_line(),
                Some(b'/') if self.peek_at(1) == Some(b'/') => self.skip_line(),
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    loop {
                        match self.bump() {
                            None => return Err(self.error("unterminated comment")),
                            Some(b'*') if self.eat(b'/') => break,
                            Some(_) => {}
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == b'\n' {
                break;
            }
        }
    }

    fn number(&mut self, first: u8) -> Result<Token, CompileError> {
        let radix: u32 = if first == b'0' && matches!(self.peek(), Some(b'x') | Some(b'X')) {
            self.pos += 1;
            if !self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                return Err(self.error("missing digits after 0x"));
            }
            16
        } else if first == b'0' && !self.decimal_only {
            8
        } else {
            10
        };
        // Hex and octal literals are bit patterns and may fill all 64 bits.
        let limit: u64 = match radix {
            10 if self.after_minus => 1 << 63,
            10 => Value::MAX as u64,
            _ => u64::MAX,
        };
        let mut value: u64 = if radix == 16 { 0 } else { u64::from(first - b'0') };
        while let Some(c) = self.peek() {
            let digit = match (c as char).to_digit(16) {
                Some(d) if radix == 16 || c.is_ascii_digit() => d,
                _ => break,
            };
            if digit >= radix {
                return Err(self.error(format!("bad digit '{}' in octal number", c as char)));
            }
            self.pos += 1;
            value = value
                .checked_mul(u64::from(radix))
                .and_then(|v| v.checked_add(u64::from(digit)))
                .filter(|v| *v <= limit)
                .ok_or_else(|| self.error("number too large"))?;
        }
        if radix == 10 {
            if let Some(scale) = self.peek().and_then(scale_factor) {
                self.pos += 1;
                value = value
                    .checked_mul(scale as u64)
                    .filter(|v| *v <= limit)
                    .ok_or_else(|| self.error("number too large"))?;
            }
        }
        if let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == b'_') {
            return Err(self.error(format!("bad character '{}' after number", c as char)));
        }
        Ok(Token::Number(value as Value))
    }

    fn identifier(&mut self, symbols: &mut SymbolTable) -> Result<Token, CompileError> {
        let start = self.pos - 1;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.source.text[start..self.pos]).into_owned();
        if let Some(sym) = symbols.lookup(&name) {
            return Ok(Token::Symbol(sym.clone()));
        }
        let sym = symbols.insert_front(&name, SymbolKind::Identifier).map_err(|e| self.error(e.to_string()))?;
        Ok(Token::Symbol(sym.clone()))
    }

    /// `$name`, `$$`, `@name`, `@@`.
    fn account(&mut self, account: Account) -> Result<Token, CompileError> {
        let sigil = if account == Account::User { b'$' } else { b'@' };
        if self.eat(sigil) {
            let id = match account {
                Account::User => getuid().as_raw(),
                Account::Group => getgid().as_raw(),
            };
            return Ok(Token::Number(Value::from(id)));
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.')) {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.source.text[start..self.pos]).into_owned();
        if name.is_empty() {
            let what = if account == Account::User { "user" } else { "group" };
            return Err(self.error(format!("missing {} name", what)));
        }
        let id = match account {
            Account::User => User::from_name(&name).map(|u| u.map(|u| u.uid.as_raw())),
            Account::Group => Group::from_name(&name).map(|g| g.map(|g| g.gid.as_raw())),
        };
        match id {
            Ok(Some(id)) => Ok(Token::Number(Value::from(id))),
            Ok(None) if account == Account::User => Err(self.error(format!("unknown user \"{}\"", name))),
            Ok(None) => Err(self.error(format!("unknown group \"{}\"", name))),
            Err(err) => Err(self.error(format!("{}: {}", name, err))),
        }
    }

    fn string(&mut self, symbols: &mut SymbolTable, refs: &mut ReferenceFiles) -> Result<Token, CompileError> {
        let mut text = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => break,
                Some(b'\\') if matches!(self.peek(), Some(b'"') | Some(b'\\')) => {
                    text.extend(self.bump());
                }
                Some(c) => text.push(c),
            }
        }
        let has_slash = text.contains(&b'/');
        let suffix = if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(is_ident_start) {
            self.pos += 1;
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            Some(String::from_utf8_lossy(&self.source.text[start..self.pos]).into_owned())
        } else {
            None
        };
        let Some(suffix) = suffix else {
            let op = if has_slash { PatternOp::Path } else { PatternOp::Glob };
            return Ok(Token::Pattern { text, op });
        };
        let kind = match symbols.lookup_suffix(&suffix) {
            Some(sym) => sym.kind.clone(),
            None => symbols
                .lookup_unique_pattern_modifier_prefix(&suffix)
                .map(|sym| sym.kind.clone())
                .map_err(|e| self.error(e.to_string()))?,
        };
        match kind {
            SymbolKind::RefFileField(field) => match refs.resolve(&text) {
                Some(index) => Ok(Token::RefFile { index, field }),
                None => Err(self.error("no previous reference file for \"\"")),
            },
            SymbolKind::PatternModifier(op) => {
                let op = if has_slash { op.upgraded() } else { op };
                Ok(Token::Pattern { text, op })
            }
            _ => Err(self.error(format!("unknown string suffix \".{}\"", suffix))),
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

fn scale_factor(c: u8) -> Option<Value> {
    let (base, power): (Value, u32) = match c {
        b'K' => (1024, 1),
        b'M' => (1024, 2),
        b'G' => (1024, 3),
        b'T' => (1024, 4),
        b'P' => (1024, 5),
        b'E' => (1024, 6),
        b'k' => (1000, 1),
        b'm' => (1000, 2),
        b'g' => (1000, 3),
        b't' => (1000, 4),
        b'p' => (1000, 5),
        b'e' => (1000, 6),
        _ => return None,
    };
    Some(base.pow(power))
}
