//! Symbols module: the name registry shared by the lexer and the compiler.
//!
//! Built-in names live in a permanent scope. Names defined by expressions
//! (functions, their parameters, and identifiers not yet defined) go into a
//! stack of transient scopes that shadow the built-ins and each other, and
//! are dropped all at once before any search starts.

use crate::date;
use crate::functions::{FieldOp, PatternOp, RefField};
use crate::options::Limits;
use crate::types::*;
use crate::SymbolError;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Field(FieldOp),
    Number(Value),
    /// A user function: the PC of its arity header and its parameter count.
    Function { entry: usize, params: usize },
    /// A parameter's offset from the frame pointer.
    Param(usize),
    /// Seen by the lexer but not (yet) defined.
    Identifier,
    RefFileField(RefField),
    PatternModifier(PatternOp),
    Return,
}

impl SymbolKind {
    pub fn describe(&self) -> &'static str {
        match self {
            SymbolKind::Field(_) => "field",
            SymbolKind::Number(_) => "constant",
            SymbolKind::Function { .. } => "function",
            SymbolKind::Param(_) => "parameter",
            SymbolKind::Identifier => "identifier",
            SymbolKind::RefFileField(_) => "reference file field",
            SymbolKind::PatternModifier(_) => "pattern modifier",
            SymbolKind::Return => "keyword",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    entries: HashMap<String, Symbol>,
    order: Vec<String>,
}

impl Scope {
    /// Returns true when the name is new to this scope.
    fn insert(&mut self, name: &str, kind: SymbolKind) -> bool {
        let fresh = !self.entries.contains_key(name);
        if fresh {
            self.order.push(name.to_string());
        }
        self.entries.insert(name.to_string(), Symbol { name: name.to_string(), kind });
        fresh
    }

    fn get(&self, name: &str) -> Option<&Symbol> {
        self.entries.get(name)
    }

    fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.order.iter().filter_map(move |name| self.entries.get(name))
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    builtins: Scope,
    /// Names only reachable after a string's `.`: reference file fields and
    /// pattern modifiers.
    suffixes: Scope,
    globals: Scope,
    frames: Vec<Scope>,
    transient: usize,
    max_identifiers: usize,
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTableBuilder::with_builtins().build()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First match, from the innermost scope out to the built-ins.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.frames
            .iter()
            .rev()
            .chain(std::iter::once(&self.globals))
            .chain(std::iter::once(&self.builtins))
            .find_map(|scope| scope.get(name))
    }

    /// Defines `name` in the innermost scope, shadowing any outer definition.
    pub fn insert_front(&mut self, name: &str, kind: SymbolKind) -> Result<&Symbol, SymbolError> {
        let scope = self.frames.last_mut().unwrap_or(&mut self.globals);
        Self::insert_into(scope, &mut self.transient, self.max_identifiers, name, kind)
    }

    /// Defines `name` in the outermost transient scope, whatever frames are open.
    pub fn insert_global(&mut self, name: &str, kind: SymbolKind) -> Result<&Symbol, SymbolError> {
        Self::insert_into(&mut self.globals, &mut self.transient, self.max_identifiers, name, kind)
    }

    fn insert_into<'s>(
        scope: &'s mut Scope,
        transient: &mut usize,
        limit: usize,
        name: &str,
        kind: SymbolKind,
    ) -> Result<&'s Symbol, SymbolError> {
        if scope.get(name).is_none() && *transient >= limit {
            return Err(SymbolError::TooManyIdentifiers(limit));
        }
        if scope.insert(name, kind) {
            *transient += 1;
        }
        scope.get(name).ok_or(SymbolError::TooManyIdentifiers(limit))
    }

    /// Exact lookup of a reference file field or pattern modifier.
    pub fn lookup_suffix(&self, name: &str) -> Option<&Symbol> {
        self.suffixes.get(name)
    }

    /// Resolves an abbreviated pattern modifier. An exact name always wins;
    /// otherwise exactly one modifier may start with `text`.
    pub fn lookup_unique_pattern_modifier_prefix(&self, text: &str) -> Result<&Symbol, SymbolError> {
        let is_modifier = |s: &&Symbol| matches!(s.kind, SymbolKind::PatternModifier(_));
        if let Some(exact) = self.suffixes.get(text).filter(is_modifier) {
            return Ok(exact);
        }
        let mut candidates = self.suffixes.iter().filter(is_modifier).filter(|s| s.name.starts_with(text));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Ok(only),
            (None, _) => Err(SymbolError::UnknownModifier(text.to_string())),
            (Some(first), Some(second)) => {
                let mut names = vec![first.name.clone(), second.name.clone()];
                names.extend(candidates.map(|s| s.name.clone()));
                Err(SymbolError::AmbiguousModifier { text: text.to_string(), candidates: names.join(", ") })
            }
        }
    }

    /// Opens a scope for one function body's parameters.
    pub fn push_scope(&mut self) {
        self.frames.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        if let Some(scope) = self.frames.pop() {
            self.transient -= scope.len();
        }
    }

    /// Drops every user-defined name, leaving only the built-ins.
    pub fn release_transient(&mut self) {
        debug!(released = self.transient, "releasing transient symbols");
        self.frames.clear();
        self.globals = Scope::default();
        self.transient = 0;
    }

    pub fn transient_len(&self) -> usize {
        self.transient
    }

    /// Built-in names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.builtins.order.iter().map(String::as_str).collect()
    }

    pub fn builtins(&self) -> impl Iterator<Item = &Symbol> {
        self.builtins.iter()
    }

    pub fn suffixes(&self) -> impl Iterator<Item = &Symbol> {
        self.suffixes.iter()
    }
}

/// Assembles the permanent scopes of a [`SymbolTable`].
#[derive(Debug, Clone, Default)]
pub struct SymbolTableBuilder {
    builtins: Scope,
    suffixes: Scope,
    max_identifiers: Option<usize>,
}

impl SymbolTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard catalogue: stat fields, time units, mode bits,
    /// `return`, reference file fields and pattern modifiers.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        for field in FieldOp::ALL {
            builder = builder.field(*field);
        }
        let now = date::now();
        let constants = [
            ("now", now),
            ("NOW", now),
            ("today", date::today()),
            ("IFMT", S_IFMT as Value),
            ("IFREG", S_IFREG as Value),
            ("IFDIR", S_IFDIR as Value),
            ("IFLNK", S_IFLNK as Value),
            ("IFCHR", S_IFCHR as Value),
            ("IFBLK", S_IFBLK as Value),
            ("IFIFO", S_IFIFO as Value),
            ("IFSOCK", S_IFSOCK as Value),
            ("ISUID", S_ISUID as Value),
            ("ISGID", S_ISGID as Value),
            ("ISVTX", S_ISVTX as Value),
            ("second", 1),
            ("seconds", 1),
            ("minute", 60),
            ("minutes", 60),
            ("hour", 3_600),
            ("hours", 3_600),
            ("day", 86_400),
            ("days", 86_400),
            ("week", 604_800),
            ("weeks", 604_800),
            ("true", 1),
            ("false", 0),
        ];
        for (name, value) in constants {
            builder = builder.constant(name, value);
        }
        builder.builtins.insert("return", SymbolKind::Return);
        for field in RefField::ALL {
            builder.suffixes.insert(field.name(), SymbolKind::RefFileField(*field));
        }
        for op in PatternOp::ALL {
            builder.suffixes.insert(op.name(), SymbolKind::PatternModifier(*op));
        }
        builder
    }

    pub fn constant(mut self, name: &str, value: Value) -> Self {
        self.builtins.insert(name, SymbolKind::Number(value));
        self
    }

    pub fn field(mut self, field: FieldOp) -> Self {
        self.builtins.insert(field.name(), SymbolKind::Field(field));
        self
    }

    pub fn max_identifiers(mut self, limit: usize) -> Self {
        self.max_identifiers = Some(limit);
        self
    }

    pub fn build(self) -> SymbolTable {
        SymbolTable {
            builtins: self.builtins,
            suffixes: self.suffixes,
            globals: Scope::default(),
            frames: Vec::new(),
            transient: 0,
            max_identifiers: self.max_identifiers.unwrap_or(Limits::default().max_identifiers),
        }
    }
}
