use crate::error::JvmError;
use crate::value::Value;

/// One activation record: operand stack, local variable slots, and the
/// program counter into the owning method's bytecode (spec.md §3 `Frame`,
/// §4.1). Invocation is modeled recursively — one `Frame` per Rust call
/// into [`crate::interpreter::Interpreter::invoke_java_method`] — so there
/// is no separate call-stack data structure to maintain; Rust's own call
/// stack is the JVM call stack.
#[derive(Debug)]
pub struct Frame {
    operand_stack: Vec<Value>,
    locals: Vec<Value>,
    pc: usize,
    wide_pending: bool,
}

impl Frame {
    pub fn new(max_stack: u16, max_locals: u16, args: Vec<Value>) -> Self {
        let mut locals = args;
        locals.resize(max_locals as usize, Value::Null);
        Self {
            operand_stack: Vec::with_capacity(max_stack as usize),
            locals,
            pc: 0,
            wide_pending: false,
        }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    pub fn advance_pc(&mut self, delta: usize) {
        self.pc += delta;
    }

    pub fn push(&mut self, value: Value) {
        self.operand_stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, JvmError> {
        self.operand_stack.pop().ok_or(JvmError::OperandStackIsEmpty)
    }

    pub fn pop_int(&mut self) -> Result<i32, JvmError> {
        self.pop()?.as_int()
    }

    pub fn pop_ref_nonnull(&mut self) -> Result<crate::heap::HeapHandle, JvmError> {
        self.pop()?.as_ref_nonnull()
    }

    pub fn pop_nullable_ref(&mut self) -> Result<Option<crate::heap::HeapHandle>, JvmError> {
        self.pop()?.as_nullable_ref()
    }

    pub fn peek(&self) -> Result<&Value, JvmError> {
        self.operand_stack.last().ok_or(JvmError::OperandStackIsEmpty)
    }

    pub fn peek_at(&self, depth_from_top: usize) -> Result<&Value, JvmError> {
        let len = self.operand_stack.len();
        len.checked_sub(depth_from_top + 1)
            .and_then(|idx| self.operand_stack.get(idx))
            .ok_or(JvmError::OperandStackIsEmpty)
    }

    pub fn dup(&mut self) -> Result<(), JvmError> {
        let top = *self.peek()?;
        self.push(top);
        Ok(())
    }

    pub fn dup_x1(&mut self) -> Result<(), JvmError> {
        let top = self.pop()?;
        let below = self.pop()?;
        self.push(top);
        self.push(below);
        self.push(top);
        Ok(())
    }

    pub fn swap(&mut self) -> Result<(), JvmError> {
        let top = self.pop()?;
        let below = self.pop()?;
        self.push(top);
        self.push(below);
        Ok(())
    }

    pub fn load_local(&self, index: usize) -> Result<Value, JvmError> {
        self.locals
            .get(index)
            .copied()
            .ok_or(JvmError::LocalVariableNotFound(index))
    }

    pub fn store_local(&mut self, index: usize, value: Value) -> Result<(), JvmError> {
        if index >= self.locals.len() {
            return Err(JvmError::LocalVariableNotFound(index));
        }
        self.locals[index] = value;
        Ok(())
    }

    pub fn operand_stack_len(&self) -> usize {
        self.operand_stack.len()
    }

    /// Set by `wide`, consumed by the next instruction that understands a
    /// widened form (spec.md §4.6 "Control", §9 "the structure must be in
    /// place for future opcodes" — only `iinc` consumes it in this subset).
    pub fn wide_pending(&self) -> bool {
        self.wide_pending
    }

    pub fn set_wide_pending(&mut self, pending: bool) {
        self.wide_pending = pending;
    }

    /// Clears the operand stack down to empty and pushes a single value —
    /// used when a handler is entered: the JVM spec requires the operand
    /// stack to hold exactly the thrown exception reference (spec.md §4.5
    /// "single-element operand stack").
    pub fn reset_to_single(&mut self, value: Value) {
        self.operand_stack.clear();
        self.operand_stack.push(value);
    }
}
