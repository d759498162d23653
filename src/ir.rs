//! Intermediate Representation (IR) for compiled predicates.
//!
//! A [`Program`] is a flat, capacity-bounded array of [`Instruction`]s
//! addressed by program counter, plus a pool of compiled patterns. Branches
//! and calls carry absolute PCs in their operand.

use crate::functions::{FieldOp, Pattern, RefField};
use crate::types::Value;
use crate::ProgramTooBig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Ends evaluation. Installed once after each top-level expression.
    Nop,
    /// Push the operand.
    Number,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitOr,
    BitAnd,
    BitXor,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    BitNot,
    Neg,
    /// Pop; when zero continue at the operand PC.
    JumpIfFalse,
    /// Continue at the operand PC.
    Jump,
    /// Push the parameter at frame pointer + operand.
    Param,
    /// Call the function whose arity header sits at the operand PC.
    Call,
    /// Return from a function taking operand parameters.
    Return,
    /// Function header holding the parameter count. Never executed.
    Arity,
    Field(FieldOp),
    /// Push a field of the reference file at index operand.
    RefField(RefField),
    /// Push 1 if pattern number operand matches the candidate, else 0.
    Match,
}

impl Opcode {
    pub fn mnemonic(&self) -> String {
        match self {
            Opcode::Field(field) => field.name().to_string(),
            Opcode::RefField(field) => format!("ref.{}", field.name()),
            other => format!("{:?}", other).to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub operand: Value,
}

#[derive(Debug, Clone)]
pub struct Program {
    instructions: Vec<Instruction>,
    patterns: Vec<Pattern>,
    capacity: usize,
}

impl Program {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { instructions: Vec::new(), patterns: Vec::new(), capacity }
    }

    /// The PC the next emitted instruction will get.
    pub fn pc(&self) -> usize {
        self.instructions.len()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn pattern(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub(crate) fn emit(&mut self, op: Opcode, operand: Value) -> Result<usize, ProgramTooBig> {
        if self.instructions.len() >= self.capacity {
            return Err(ProgramTooBig(self.capacity));
        }
        self.instructions.push(Instruction { op, operand });
        Ok(self.instructions.len() - 1)
    }

    /// Rewrites the operand of an already emitted branch.
    pub(crate) fn patch(&mut self, at: usize, operand: Value) {
        if let Some(instruction) = self.instructions.get_mut(at) {
            instruction.operand = operand;
        }
    }

    pub(crate) fn add_pattern(&mut self, pattern: Pattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    /// Drops everything emitted after `pc` (and patterns after `patterns`).
    pub(crate) fn truncate(&mut self, pc: usize, patterns: usize) {
        self.instructions.truncate(pc);
        self.patterns.truncate(patterns);
    }
}

impl fmt::Display for Program {
    /// One instruction per line: PC, mnemonic, operand.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, ins) in self.instructions.iter().enumerate() {
            write!(f, "{:5}  {:<10}", pc, ins.op.mnemonic())?;
            match ins.op {
                Opcode::Match => match self.pattern(ins.operand as usize) {
                    Some(p) => writeln!(f, " {} \"{}\"", p.op().name(), String::from_utf8_lossy(p.text()))?,
                    None => writeln!(f, " {}", ins.operand)?,
                },
                Opcode::Field(_) => writeln!(f)?,
                _ => writeln!(f, " {}", ins.operand)?,
            }
        }
        Ok(())
    }
}
