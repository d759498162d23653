//! VM module: the stack machine that runs a compiled [`Program`].
//!
//! Values are `i64`. User function calls keep their bookkeeping in explicit
//! [`Frame`]s, so neither recursion in an expression nor a long program ever
//! grows the native stack.

use crate::context::Candidate;
use crate::ir::{Opcode, Program};
use crate::options::Limits;
use crate::reffile::ReferenceFiles;
use crate::types::Value;
use crate::VmError;

/// Saved caller state for one active user function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub return_pc: usize,
    pub saved_fp: usize,
    pub param_count: usize,
}

/// Value stack and call frames, reused across evaluations.
#[derive(Debug, Clone)]
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    fp: usize,
    capacity: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Limits::default().stack_size)
    }
}

impl Vm {
    /// `capacity` bounds both the value stack and the number of open frames.
    pub fn new(capacity: usize) -> Self {
        Self { stack: Vec::with_capacity(capacity.min(1024)), frames: Vec::new(), fp: 0, capacity }
    }

    /// The value stack left by the last evaluation.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= self.capacity {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pops two operands and pushes `f(a, b)`.
    fn binary<F>(&mut self, f: F) -> Result<(), VmError>
    where
        F: FnOnce(Value, Value) -> Result<Value, VmError>,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b)?)
    }

    fn top(&mut self) -> Result<&mut Value, VmError> {
        self.stack.last_mut().ok_or(VmError::StackUnderflow)
    }

    /// Runs from `start_pc` until the `Nop` terminator and returns the
    /// bottom stack value. Arithmetic wraps on overflow.
    pub fn execute(
        &mut self,
        program: &Program,
        start_pc: usize,
        candidate: &mut Candidate,
        refs: &ReferenceFiles,
    ) -> Result<Value, VmError> {
        self.stack.clear();
        self.frames.clear();
        self.fp = 0;
        let mut pc = start_pc;

        loop {
            let ins = *program.get(pc).ok_or(VmError::BadProgramCounter(pc))?;
            pc += 1;
            match ins.op {
                Opcode::Nop => break,
                Opcode::Number => self.push(ins.operand)?,
                Opcode::Eq => self.binary(|a, b| Ok((a == b) as Value))?,
                Opcode::Ne => self.binary(|a, b| Ok((a != b) as Value))?,
                Opcode::Lt => self.binary(|a, b| Ok((a < b) as Value))?,
                Opcode::Le => self.binary(|a, b| Ok((a <= b) as Value))?,
                Opcode::Gt => self.binary(|a, b| Ok((a > b) as Value))?,
                Opcode::Ge => self.binary(|a, b| Ok((a >= b) as Value))?,
                Opcode::BitOr => self.binary(|a, b| Ok(a | b))?,
                Opcode::BitAnd => self.binary(|a, b| Ok(a & b))?,
                Opcode::BitXor => self.binary(|a, b| Ok(a ^ b))?,
                // shift counts use their low 6 bits
                Opcode::Shl => self.binary(|a, b| Ok(a.wrapping_shl(b as u32)))?,
                Opcode::Shr => self.binary(|a, b| Ok(a.wrapping_shr(b as u32)))?,
                Opcode::Add => self.binary(|a, b| Ok(a.wrapping_add(b)))?,
                Opcode::Sub => self.binary(|a, b| Ok(a.wrapping_sub(b)))?,
                Opcode::Mul => self.binary(|a, b| Ok(a.wrapping_mul(b)))?,
                Opcode::Div => self.binary(|a, b| match b {
                    0 => Err(VmError::DivideByZero),
                    _ => Ok(a.wrapping_div(b)),
                })?,
                Opcode::Mod => self.binary(|a, b| match b {
                    0 => Err(VmError::ModuloByZero),
                    _ => Ok(a.wrapping_rem(b)),
                })?,
                Opcode::Not => {
                    let top = self.top()?;
                    *top = (*top == 0) as Value;
                }
                Opcode::BitNot => {
                    let top = self.top()?;
                    *top = !*top;
                }
                Opcode::Neg => {
                    let top = self.top()?;
                    *top = top.wrapping_neg();
                }
                Opcode::JumpIfFalse => {
                    if self.pop()? == 0 {
                        pc = ins.operand as usize;
                    }
                }
                Opcode::Jump => pc = ins.operand as usize,
                Opcode::Param => {
                    let slot = self.fp + ins.operand as usize;
                    let value = *self.stack.get(slot).ok_or(VmError::BadParameter(slot))?;
                    self.push(value)?;
                }
                Opcode::Call => {
                    let entry = ins.operand as usize;
                    let param_count = match program.get(entry) {
                        Some(header) if header.op == Opcode::Arity => header.operand as usize,
                        _ => return Err(VmError::BadProgramCounter(entry)),
                    };
                    if self.frames.len() >= self.capacity {
                        return Err(VmError::StackOverflow);
                    }
                    let fp = self.stack.len().checked_sub(param_count).ok_or(VmError::StackUnderflow)?;
                    self.frames.push(Frame { return_pc: pc, saved_fp: self.fp, param_count });
                    self.fp = fp;
                    pc = entry + 1;
                }
                Opcode::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or(VmError::StackUnderflow)?;
                    self.stack.truncate(self.fp);
                    self.fp = frame.saved_fp;
                    pc = frame.return_pc;
                    self.push(result)?;
                }
                Opcode::Arity => return Err(VmError::BadProgramCounter(pc - 1)),
                Opcode::Field(field) => {
                    let value = field.eval(candidate);
                    self.push(value)?;
                }
                Opcode::RefField(field) => {
                    let index = ins.operand as usize;
                    let file = refs.get(index).ok_or(VmError::BadReference(index))?;
                    self.push(field.eval(file))?;
                }
                Opcode::Match => {
                    let index = ins.operand as usize;
                    let pattern = program.pattern(index).ok_or(VmError::BadPattern(index))?;
                    let matched = pattern.matches(candidate);
                    self.push(matched as Value)?;
                }
            }
        }

        self.stack.first().copied().ok_or(VmError::StackUnderflow)
    }
}
