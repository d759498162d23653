//! Compiler module: a recursive-descent parser that emits bytecode directly.
//!
//! There is no syntax tree. Each `parse_*` level emits its operator after
//! its operands, and forward branches are patched once their targets are
//! known.

use crate::date::DateParts;
use crate::functions::Pattern;
use crate::ir::{Opcode, Program};
use crate::lexer::{Lexer, Source, Token};
use crate::reffile::ReferenceFiles;
use crate::symbols::{SymbolKind, SymbolTable};
use crate::types::Value;
use crate::CompileError;

/// Binary precedence levels between `&&` and the unary operators.
const BINARY_LEVELS: usize = 8;

/// Nesting of parentheses and unary operators accepted before giving up.
const MAX_NESTING: usize = 64;

/// The binary operator `token` denotes at precedence `level` (0 binds loosest).
fn binary_op(level: usize, token: &Token) -> Option<Opcode> {
    let op = match (level, token) {
        (0, Token::Char(b'|')) => Opcode::BitOr,
        (1, Token::Char(b'^')) => Opcode::BitXor,
        (2, Token::Char(b'&')) => Opcode::BitAnd,
        (3, Token::Eq) => Opcode::Eq,
        (3, Token::Ne) => Opcode::Ne,
        (4, Token::Char(b'<')) => Opcode::Lt,
        (4, Token::Le) => Opcode::Le,
        (4, Token::Char(b'>')) => Opcode::Gt,
        (4, Token::Ge) => Opcode::Ge,
        (5, Token::Shl) => Opcode::Shl,
        (5, Token::Shr) => Opcode::Shr,
        (6, Token::Char(b'+')) => Opcode::Add,
        (6, Token::Char(b'-')) => Opcode::Sub,
        (7, Token::Char(b'*')) => Opcode::Mul,
        (7, Token::Char(b'/')) => Opcode::Div,
        (7, Token::Char(b'%')) => Opcode::Mod,
        _ => return None,
    };
    Some(op)
}

pub(crate) struct Compiler<'a> {
    lexer: Lexer,
    symbols: &'a mut SymbolTable,
    refs: &'a mut ReferenceFiles,
    program: &'a mut Program,
    token: Token,
    nesting: usize,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        source: Source,
        symbols: &'a mut SymbolTable,
        refs: &'a mut ReferenceFiles,
        program: &'a mut Program,
    ) -> Self {
        Self { lexer: Lexer::new(source), symbols, refs, program, token: Token::Eof, nesting: 0 }
    }

    /// `{ function } [ expression ] [ ; ] EOF`
    ///
    /// Returns the start PC of the expression, if the source had one.
    pub(crate) fn compile_program(mut self) -> Result<Option<usize>, CompileError> {
        self.advance()?;
        while let Token::Symbol(sym) = &self.token {
            if sym.kind != SymbolKind::Identifier {
                break;
            }
            let name = sym.name.clone();
            self.parse_function(&name)?;
        }
        let start = if matches!(self.token, Token::Eof | Token::Char(b';')) {
            None
        } else {
            let start = self.program.pc();
            self.parse_expr()?;
            self.emit(Opcode::Nop, 0)?;
            Some(start)
        };
        if self.token == Token::Char(b';') {
            self.advance()?;
        }
        if self.token != Token::Eof {
            return Err(self.expected("end of input"));
        }
        Ok(start)
    }

    fn advance(&mut self) -> Result<(), CompileError> {
        self.token = self.lexer.next_token(self.symbols, self.refs)?;
        Ok(())
    }

    fn emit(&mut self, op: Opcode, operand: Value) -> Result<usize, CompileError> {
        self.program.emit(op, operand).map_err(|e| self.lexer.error(e.to_string()))
    }

    /// Points the branch at `at` to the next instruction to be emitted.
    fn patch_here(&mut self, at: usize) {
        let here = self.program.pc() as Value;
        self.program.patch(at, here);
    }

    fn expected(&self, what: &str) -> CompileError {
        self.lexer.error(format!("expected {}, found {}", what, self.token.describe()))
    }

    fn check_char(&self, c: u8) -> Result<(), CompileError> {
        if self.token == Token::Char(c) {
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", c as char)))
        }
    }

    fn eat_char(&mut self, c: u8) -> Result<(), CompileError> {
        self.check_char(c)?;
        self.advance()
    }

    /// `name [ ( params ) ] { [return] expr [;] }`
    fn parse_function(&mut self, name: &str) -> Result<(), CompileError> {
        // parameters must land in the new scope, so open it before lexing them
        self.symbols.push_scope();
        self.advance()?;
        let mut params = 0;
        if self.token == Token::Char(b'(') {
            self.advance()?;
            while self.token != Token::Char(b')') {
                let param = match &self.token {
                    Token::Symbol(sym) if sym.kind != SymbolKind::Return => sym.name.clone(),
                    _ => return Err(self.expected("parameter name")),
                };
                self.symbols
                    .insert_front(&param, SymbolKind::Param(params))
                    .map_err(|e| self.lexer.error(e.to_string()))?;
                params += 1;
                self.advance()?;
                if self.token == Token::Char(b',') {
                    self.advance()?;
                } else {
                    self.check_char(b')')?;
                }
            }
            self.advance()?;
        } else if self.token != Token::Char(b'{') {
            return Err(self.lexer.error(format!("undefined identifier {}", name)));
        }
        self.check_char(b'{')?;

        let entry = self.emit(Opcode::Arity, params as Value)?;
        self.symbols
            .insert_global(name, SymbolKind::Function { entry, params })
            .map_err(|e| self.lexer.error(e.to_string()))?;

        self.advance()?;
        if matches!(&self.token, Token::Symbol(sym) if sym.kind == SymbolKind::Return) {
            self.advance()?;
        }
        self.parse_expr()?;
        if self.token == Token::Char(b';') {
            self.advance()?;
        }
        self.check_char(b'}')?;
        self.symbols.pop_scope();
        self.advance()?;
        self.emit(Opcode::Return, params as Value)?;
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<(), CompileError> {
        self.parse_ternary()
    }

    /// `a ? b : c ? d : e` groups to the right. The else chain is compiled
    /// in a loop and every taken branch jumps straight to the end.
    fn parse_ternary(&mut self) -> Result<(), CompileError> {
        self.parse_or()?;
        let mut done = Vec::new();
        while self.token == Token::Char(b'?') {
            self.advance()?;
            let skip_then = self.emit(Opcode::JumpIfFalse, 0)?;
            self.enter()?;
            self.parse_ternary()?;
            self.nesting -= 1;
            self.eat_char(b':')?;
            done.push(self.emit(Opcode::Jump, 0)?);
            self.patch_here(skip_then);
            self.parse_or()?;
        }
        for jump in done {
            self.patch_here(jump);
        }
        Ok(())
    }

    /// `a || b` as `a ? 1 : (b ? 1 : 0)`.
    fn parse_or(&mut self) -> Result<(), CompileError> {
        self.parse_and()?;
        while self.token == Token::Or {
            self.advance()?;
            let left_false = self.emit(Opcode::JumpIfFalse, 0)?;
            self.emit(Opcode::Number, 1)?;
            let left_true = self.emit(Opcode::Jump, 0)?;
            self.patch_here(left_false);
            self.parse_and()?;
            let right_false = self.emit(Opcode::JumpIfFalse, 0)?;
            self.emit(Opcode::Number, 1)?;
            let right_true = self.emit(Opcode::Jump, 0)?;
            self.patch_here(right_false);
            self.emit(Opcode::Number, 0)?;
            self.patch_here(left_true);
            self.patch_here(right_true);
        }
        Ok(())
    }

    /// `a && b` as `a ? (b ? 1 : 0) : 0`.
    fn parse_and(&mut self) -> Result<(), CompileError> {
        self.parse_binary(0)?;
        while self.token == Token::And {
            self.advance()?;
            let left_false = self.emit(Opcode::JumpIfFalse, 0)?;
            self.parse_binary(0)?;
            let right_false = self.emit(Opcode::JumpIfFalse, 0)?;
            self.emit(Opcode::Number, 1)?;
            let done = self.emit(Opcode::Jump, 0)?;
            self.patch_here(left_false);
            self.patch_here(right_false);
            self.emit(Opcode::Number, 0)?;
            self.patch_here(done);
        }
        Ok(())
    }

    fn parse_binary(&mut self, level: usize) -> Result<(), CompileError> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }
        self.parse_binary(level + 1)?;
        while let Some(op) = binary_op(level, &self.token) {
            self.advance()?;
            self.parse_binary(level + 1)?;
            self.emit(op, 0)?;
        }
        Ok(())
    }

    /// Counts one more level of recursion, failing past `MAX_NESTING`.
    fn enter(&mut self) -> Result<(), CompileError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.lexer.error("expression nested too deeply"));
        }
        self.nesting += 1;
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<(), CompileError> {
        let op = match self.token {
            Token::Char(b'!') => Opcode::Not,
            Token::Char(b'~') => Opcode::BitNot,
            Token::Char(b'-') => Opcode::Neg,
            _ => {
                self.enter()?;
                self.parse_factor()?;
                self.nesting -= 1;
                return Ok(());
            }
        };
        self.enter()?;
        self.advance()?;
        self.parse_unary()?;
        self.emit(op, 0)?;
        self.nesting -= 1;
        Ok(())
    }

    fn parse_factor(&mut self) -> Result<(), CompileError> {
        match self.token.clone() {
            Token::Number(n) => {
                self.emit(Opcode::Number, n)?;
                self.advance()
            }
            Token::Char(b'(') => {
                self.advance()?;
                self.parse_expr()?;
                self.eat_char(b')')
            }
            Token::Char(b'[') => self.parse_date(),
            Token::Pattern { text, op } => {
                let pattern = Pattern::new(op, text).map_err(|msg| self.lexer.error(msg))?;
                let index = self.program.add_pattern(pattern);
                self.emit(Opcode::Match, index as Value)?;
                self.advance()
            }
            Token::RefFile { index, field } => {
                self.emit(Opcode::RefField(field), index as Value)?;
                self.advance()
            }
            Token::Symbol(sym) => match sym.kind {
                SymbolKind::Field(field) => {
                    self.emit(Opcode::Field(field), 0)?;
                    self.advance()
                }
                SymbolKind::Number(value) => {
                    self.emit(Opcode::Number, value)?;
                    self.advance()
                }
                SymbolKind::Param(offset) => {
                    self.emit(Opcode::Param, offset as Value)?;
                    self.advance()
                }
                SymbolKind::Function { entry, params } => {
                    self.advance()?;
                    self.parse_call(&sym.name, entry, params)
                }
                SymbolKind::Identifier => Err(self.lexer.error(format!("undefined identifier {}", sym.name))),
                SymbolKind::Return | SymbolKind::RefFileField(_) | SymbolKind::PatternModifier(_) => {
                    Err(self.expected("expression"))
                }
            },
            _ => Err(self.expected("expression")),
        }
    }

    /// Arguments are pushed left to right, then the call.
    fn parse_call(&mut self, name: &str, entry: usize, params: usize) -> Result<(), CompileError> {
        let mut args = 0;
        if self.token == Token::Char(b'(') {
            self.advance()?;
            while self.token != Token::Char(b')') {
                self.parse_expr()?;
                args += 1;
                if self.token == Token::Char(b',') {
                    self.advance()?;
                } else {
                    self.check_char(b')')?;
                }
            }
            self.advance()?;
        }
        if args != params {
            let plural = if params == 1 { "argument" } else { "arguments" };
            return Err(self.lexer.error(format!("function {} expects {} {}, got {}", name, params, plural, args)));
        }
        self.emit(Opcode::Call, entry as Value)?;
        Ok(())
    }

    /// `[yyyy/mm/dd[ hh[:mm[:ss]]]]`, every field decimal.
    fn parse_date(&mut self) -> Result<(), CompileError> {
        self.lexer.set_decimal_only(true);
        self.advance()?;
        let mut parts = DateParts { year: self.date_number("year")?, ..DateParts::default() };
        self.eat_char(b'/')?;
        parts.month = self.date_number("month")?;
        self.eat_char(b'/')?;
        parts.day = self.date_number("day")?;
        if matches!(self.token, Token::Number(_)) {
            parts.hour = self.date_number("hour")?;
            if self.token == Token::Char(b':') {
                self.advance()?;
                parts.minute = self.date_number("minute")?;
                if self.token == Token::Char(b':') {
                    self.advance()?;
                    parts.second = self.date_number("second")?;
                }
            }
        }
        self.check_char(b']')?;
        self.lexer.set_decimal_only(false);
        let timestamp = parts.to_timestamp().map_err(|msg| self.lexer.error(msg))?;
        self.emit(Opcode::Number, timestamp)?;
        self.advance()
    }

    fn date_number(&mut self, field: &str) -> Result<Value, CompileError> {
        match self.token {
            Token::Number(n) => {
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.expected(field)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FieldOp;

    #[derive(Debug)]
    struct Compiled {
        program: Program,
        symbols: SymbolTable,
        start: Option<usize>,
    }

    fn compile(text: &str) -> Result<Compiled, CompileError> {
        let mut symbols = SymbolTable::new();
        let mut refs = ReferenceFiles::new();
        let mut program = Program::with_capacity(1000);
        let start = Compiler::new(Source::new("test", text), &mut symbols, &mut refs, &mut program).compile_program()?;
        Ok(Compiled { program, symbols, start })
    }

    fn ops(program: &Program) -> Vec<(Opcode, Value)> {
        program.instructions().iter().map(|i| (i.op, i.operand)).collect()
    }

    #[test]
    fn test_precedence_emits_postfix() {
        let compiled = compile("1 + 2 * 3").unwrap();
        assert_eq!(compiled.start, Some(0));
        assert_eq!(
            ops(&compiled.program),
            vec![
                (Opcode::Number, 1),
                (Opcode::Number, 2),
                (Opcode::Number, 3),
                (Opcode::Mul, 0),
                (Opcode::Add, 0),
                (Opcode::Nop, 0),
            ]
        );
    }

    #[test]
    fn test_left_associativity() {
        let compiled = compile("8 - 2 - 1").unwrap();
        assert_eq!(
            ops(&compiled.program),
            vec![
                (Opcode::Number, 8),
                (Opcode::Number, 2),
                (Opcode::Sub, 0),
                (Opcode::Number, 1),
                (Opcode::Sub, 0),
                (Opcode::Nop, 0),
            ]
        );
    }

    #[test]
    fn test_ternary_branch_targets() {
        let compiled = compile("size ? 10 : 20").unwrap();
        assert_eq!(
            ops(&compiled.program),
            vec![
                (Opcode::Field(FieldOp::Size), 0),
                (Opcode::JumpIfFalse, 4),
                (Opcode::Number, 10),
                (Opcode::Jump, 5),
                (Opcode::Number, 20),
                (Opcode::Nop, 0),
            ]
        );
    }

    #[test]
    fn test_and_shape() {
        let compiled = compile("1 && 2").unwrap();
        assert_eq!(
            ops(&compiled.program),
            vec![
                (Opcode::Number, 1),
                (Opcode::JumpIfFalse, 6),
                (Opcode::Number, 2),
                (Opcode::JumpIfFalse, 6),
                (Opcode::Number, 1),
                (Opcode::Jump, 7),
                (Opcode::Number, 0),
                (Opcode::Nop, 0),
            ]
        );
    }

    #[test]
    fn test_or_shape() {
        let compiled = compile("1 || 2").unwrap();
        assert_eq!(
            ops(&compiled.program),
            vec![
                (Opcode::Number, 1),
                (Opcode::JumpIfFalse, 4),
                (Opcode::Number, 1),
                (Opcode::Jump, 9),
                (Opcode::Number, 2),
                (Opcode::JumpIfFalse, 8),
                (Opcode::Number, 1),
                (Opcode::Jump, 9),
                (Opcode::Number, 0),
                (Opcode::Nop, 0),
            ]
        );
    }

    #[test]
    fn test_function_definition_and_call() {
        let compiled = compile("big(n) { return size > n; } big(100)").unwrap();
        let program = &compiled.program;
        assert_eq!(program.get(0).unwrap().op, Opcode::Arity);
        assert_eq!(program.get(0).unwrap().operand, 1);
        assert_eq!(
            ops(program)[1..],
            [
                (Opcode::Field(FieldOp::Size), 0),
                (Opcode::Param, 0),
                (Opcode::Gt, 0),
                (Opcode::Return, 1),
                (Opcode::Number, 100),
                (Opcode::Call, 0),
                (Opcode::Nop, 0),
            ]
        );
        assert_eq!(compiled.start, Some(5));
        assert_eq!(compiled.symbols.lookup("big").unwrap().kind, SymbolKind::Function { entry: 0, params: 1 });
        // the parameter went out of scope with the body
        assert!(compiled.symbols.lookup("n").is_none());
    }

    #[test]
    fn test_parameter_shadows_field_only_in_body() {
        let compiled = compile("f(size) { size } f(1) + size").unwrap();
        let program = &compiled.program;
        assert_eq!(program.get(1).unwrap().op, Opcode::Param);
        assert!(program.instructions().iter().skip(3).any(|i| i.op == Opcode::Field(FieldOp::Size)));
    }

    #[test]
    fn test_zero_parameter_call_without_parens() {
        let compiled = compile("dir { (mode & IFMT) == IFDIR } dir && !dir()").unwrap();
        let calls = compiled.program.instructions().iter().filter(|i| i.op == Opcode::Call).count();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_functions_only_has_no_start() {
        let compiled = compile("f { 1 } g { 2 };").unwrap();
        assert_eq!(compiled.start, None);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = compile("f(a, b) { a + b } f(1)").unwrap_err();
        assert_eq!(err.message, "function f expects 2 arguments, got 1");
        let err = compile("g(a) { a } g").unwrap_err();
        assert_eq!(err.message, "function g expects 1 argument, got 0");
    }

    #[test]
    fn test_undefined_identifier() {
        assert_eq!(compile("nosuch + 1").unwrap_err().message, "undefined identifier nosuch");
        assert_eq!(compile("1 + nosuch").unwrap_err().message, "undefined identifier nosuch");
    }

    #[test]
    fn test_expected_found_messages() {
        assert_eq!(compile("(1 + 2").unwrap_err().message, "expected ')', found end of input");
        assert_eq!(compile("1 2").unwrap_err().message, "expected end of input, found number 2");
        assert_eq!(compile("1 ? 2").unwrap_err().message, "expected ':', found end of input");
        assert_eq!(compile("*").unwrap_err().message, "expected expression, found '*'");
    }

    #[test]
    fn test_date_literal() {
        let compiled = compile("[2020/02/29 08:09:07]").unwrap();
        let expected = DateParts { year: 2020, month: 2, day: 29, hour: 8, minute: 9, second: 7 }.to_timestamp().unwrap();
        assert_eq!(ops(&compiled.program), vec![(Opcode::Number, expected), (Opcode::Nop, 0)]);
        assert_eq!(compile("[2021/02/29]").unwrap_err().message, "invalid day in date");
        // octal comes back once the literal is closed
        assert_eq!(ops(&compile("[2020/1/1] - 010").unwrap().program)[1], (Opcode::Number, 8));
    }

    #[test]
    fn test_patterns_go_to_pool() {
        let compiled = compile(r#""*.txt" || "*.md""#).unwrap();
        assert_eq!(compiled.program.patterns().len(), 2);
        assert_eq!(compiled.program.get(0).unwrap().op, Opcode::Match);
        assert_eq!(compiled.program.get(0).unwrap().operand, 0);
    }

    #[test]
    fn test_program_too_big() {
        let mut symbols = SymbolTable::new();
        let mut refs = ReferenceFiles::new();
        let mut program = Program::with_capacity(4);
        let err = Compiler::new(Source::new("test", "1 + 2 + 3"), &mut symbols, &mut refs, &mut program)
            .compile_program()
            .unwrap_err();
        assert_eq!(err.message, "program too big (limit 4 instructions)");
    }

    #[test]
    fn test_ternary_else_chain_jumps_to_end() {
        let compiled = compile("0 ? 1 : size ? 2 : 3").unwrap();
        assert_eq!(
            ops(&compiled.program),
            vec![
                (Opcode::Number, 0),
                (Opcode::JumpIfFalse, 4),
                (Opcode::Number, 1),
                (Opcode::Jump, 9),
                (Opcode::Field(FieldOp::Size), 0),
                (Opcode::JumpIfFalse, 8),
                (Opcode::Number, 2),
                (Opcode::Jump, 9),
                (Opcode::Number, 3),
                (Opcode::Nop, 0),
            ]
        );
    }

    #[test]
    fn test_long_ternary_else_chain() {
        let mut symbols = SymbolTable::new();
        let mut refs = ReferenceFiles::new();
        let mut program = Program::with_capacity(100_000);
        let chain = format!("{}0", "1 ? 1 : ".repeat(20_000));
        let start = Compiler::new(Source::new("test", chain), &mut symbols, &mut refs, &mut program)
            .compile_program()
            .unwrap();
        assert_eq!(start, Some(0));
        assert_eq!(program.len(), 20_000 * 4 + 2);
    }

    #[test]
    fn test_ternary_then_chain_is_bounded() {
        let chain = format!("{}0{}", "1 ? ".repeat(5000), " : 0".repeat(5000));
        assert_eq!(compile(&chain).unwrap_err().message, "expression nested too deeply");
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert_eq!(compile(&deep).unwrap_err().message, "expression nested too deeply");
        let negations = format!("{}1", "!".repeat(1000));
        assert!(compile(&negations).is_err());
    }
}
