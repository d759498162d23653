//! Engine module: a compile session and the predicate it produces.
//!
//! An [`Engine`] accumulates any number of sources (a system file, a user
//! file, the command line) into one program and symbol table. Finishing the
//! session drops every user-defined name and yields an immutable
//! [`Predicate`] ready for a search.

use crate::compiler::Compiler;
use crate::context::Candidate;
use crate::ir::Program;
use crate::lexer::Source;
use crate::options::Limits;
use crate::reffile::ReferenceFiles;
use crate::symbols::{SymbolTable, SymbolTableBuilder};
use crate::types::Value;
use crate::vm::Vm;
use crate::{CompileError, RhError, VmError};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Engine {
    symbols: SymbolTable,
    program: Program,
    refs: ReferenceFiles,
    start_pc: Option<usize>,
    limits: Limits,
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_limits(Limits::default())
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            symbols: SymbolTableBuilder::with_builtins().max_identifiers(limits.max_identifiers).build(),
            program: Program::with_capacity(limits.program_size),
            refs: ReferenceFiles::new(),
            start_pc: None,
            limits,
        }
    }

    /// Compiles one source into the session.
    ///
    /// Returns the start PC when the source ended with an expression; that
    /// expression then replaces any earlier one as the predicate. On error
    /// the session is left exactly as it was before the call.
    pub fn compile(&mut self, source: Source) -> Result<Option<usize>, CompileError> {
        let name = source.name().to_string();
        let pc = self.program.pc();
        let patterns = self.program.patterns().len();
        let saved_symbols = self.symbols.clone();
        let saved_refs = self.refs.clone();

        let result = Compiler::new(source, &mut self.symbols, &mut self.refs, &mut self.program).compile_program();
        match result {
            Ok(start) => {
                if start.is_some() {
                    self.start_pc = start;
                }
                debug!(
                    source = %name,
                    emitted = self.program.pc() - pc,
                    start_pc = ?self.start_pc,
                    references = self.refs.len(),
                    "compiled expression source"
                );
                Ok(start)
            }
            Err(err) => {
                self.program.truncate(pc, patterns);
                self.symbols = saved_symbols;
                self.refs = saved_refs;
                Err(err)
            }
        }
    }

    pub fn compile_str(&mut self, name: &str, text: &str) -> Result<Option<usize>, CompileError> {
        self.compile(Source::new(name, text))
    }

    pub fn start_pc(&self) -> Option<usize> {
        self.start_pc
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Releases every user-defined symbol and hands over the program.
    pub fn finish(mut self) -> Result<Predicate, RhError> {
        self.symbols.release_transient();
        let start_pc = self.start_pc.ok_or(RhError::NoExpression)?;
        debug!(instructions = self.program.len(), start_pc, "predicate ready");
        Ok(Predicate { program: self.program, refs: self.refs, start_pc, stack_size: self.limits.stack_size })
    }
}

/// A compiled, immutable predicate.
#[derive(Debug, Clone)]
pub struct Predicate {
    program: Program,
    refs: ReferenceFiles,
    start_pc: usize,
    stack_size: usize,
}

impl Predicate {
    /// Compiles a single expression with the default limits.
    pub fn compile(text: &str) -> Result<Self, RhError> {
        let mut engine = Engine::new();
        engine.compile_str("expression", text)?;
        engine.finish()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn start_pc(&self) -> usize {
        self.start_pc
    }

    /// A VM sized for this predicate's stack limit.
    pub fn new_vm(&self) -> Vm {
        Vm::new(self.stack_size)
    }

    pub fn evaluate(&self, vm: &mut Vm, candidate: &mut Candidate) -> Result<Value, VmError> {
        vm.execute(&self.program, self.start_pc, candidate, &self.refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileStat, S_IFDIR, S_IFREG};

    fn eval(predicate: &Predicate, candidate: &mut Candidate) -> Value {
        predicate.evaluate(&mut predicate.new_vm(), candidate).unwrap()
    }

    #[test]
    fn test_compile_and_evaluate() {
        let predicate = Predicate::compile("size > 1K && \"*.log\"").unwrap();
        let mut big_log = Candidate::new("var/app.log", FileStat::synthetic(S_IFREG, 4096), 1);
        let mut small_log = Candidate::new("var/app.log", FileStat::synthetic(S_IFREG, 10), 1);
        let mut big_txt = Candidate::new("var/app.txt", FileStat::synthetic(S_IFREG, 4096), 1);
        assert_eq!(eval(&predicate, &mut big_log), 1);
        assert_eq!(eval(&predicate, &mut small_log), 0);
        assert_eq!(eval(&predicate, &mut big_txt), 0);
    }

    #[test]
    fn test_sources_accumulate() {
        let mut engine = Engine::new();
        assert_eq!(engine.compile_str("system", "isdir { (mode & IFMT) == IFDIR }").unwrap(), None);
        assert_eq!(engine.start_pc(), None);
        let start = engine.compile_str("command line", "isdir").unwrap();
        assert!(start.is_some());
        let predicate = engine.finish().unwrap();
        let mut dir = Candidate::new("d", FileStat::synthetic(S_IFDIR | 0o755, 0), 0);
        assert_eq!(eval(&predicate, &mut dir), 1);
    }

    #[test]
    fn test_later_expression_replaces_earlier() {
        let mut engine = Engine::new();
        engine.compile_str("first", "0").unwrap();
        engine.compile_str("second", "1").unwrap();
        let predicate = engine.finish().unwrap();
        assert_eq!(eval(&predicate, &mut Candidate::default()), 1);
    }

    #[test]
    fn test_failed_compile_leaves_session_untouched() {
        let mut engine = Engine::new();
        engine.compile_str("good", "f { 1 }").unwrap();
        let before = engine.program().len();
        let err = engine.compile_str("bad", "g { 2 } h(x) { x + }").unwrap_err();
        assert_eq!(err.source_name, "bad");
        assert_eq!(engine.program().len(), before);
        assert!(engine.symbols().lookup("g").is_none());
        assert!(engine.symbols().lookup("f").is_some());
        assert!(matches!(engine.finish(), Err(RhError::NoExpression)));
    }

    #[test]
    fn test_finish_releases_user_symbols() {
        let mut engine = Engine::new();
        engine.compile_str("expr", "f(size) { size + 1 } f(2)").unwrap();
        assert!(engine.symbols().transient_len() > 0);
        let predicate = engine.finish().unwrap();
        assert_eq!(eval(&predicate, &mut Candidate::default()), 3);
    }

    #[test]
    fn test_limits_are_applied() {
        let limits = Limits { program_size: 3, ..Limits::default() };
        let mut engine = Engine::with_limits(limits);
        let err = engine.compile_str("expr", "1 + 2 + 3").unwrap_err();
        assert!(err.message.starts_with("program too big"));
    }

    #[test]
    fn test_no_expression() {
        assert!(matches!(Engine::new().finish(), Err(RhError::NoExpression)));
        assert!(matches!(Predicate::compile("f { 1 }"), Err(RhError::NoExpression)));
    }
}
