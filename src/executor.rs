use std::time::Instant;

use crate::dispatcher::{BinaryOp, ComparisonOp, Dispatcher};
use crate::opcodes::{self, Opcode};
use crate::state::{CallFrame, Callable, DeclaredFunction, ThrowFrame, VmState};
use crate::stdlib;
use crate::value::Value;

/// Deepest call stack a run may build
pub const MAX_CALL_DEPTH: usize = 512;

/// Errors raised while interpreting
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// The program itself is malformed; never catchable
    #[error("Invalid bytecode: {0}")]
    InvalidBytecode(String),

    /// A runtime exception raised by the interpreter or a host call
    #[error("{0}")]
    Exception(String),

    /// A value raised by `throw` that no handler caught
    #[error("Uncaught exception: {0}")]
    Thrown(Value),
}

/// A host call the executor suspended on
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncCall {
    pub name: String,
    pub args: Vec<Value>,
}

/// How a slice of execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// The chunk-root frame ran off the end of the program
    Finished,

    /// The chunk returned early with this value. Only the chunk-root slots
    /// bound before the return are left on the stack.
    Returned(Value),

    /// Execution paused at an asynchronous call. The top frame's instruction
    /// pointer is already past the call and the arguments are off the stack:
    /// push the call's result and execute again to resume.
    Suspended(AsyncCall),
}

enum Step {
    Continue,
    Done(ExecOutcome),
}

/// Bytecode executor for the REPL VM
///
/// Runs a program against a mutable `VmState`, starting from the top frame's
/// instruction pointer. All progress lives in the state, so execution can stop
/// at an asynchronous call and pick up again with a fresh executor.
///
/// The executor is generic over a Dispatcher, which handles host globals and
/// host function calls.
pub struct Executor<'a, D: Dispatcher> {
    /// Assembled program bytes
    program: &'a [u8],

    /// State being advanced
    state: &'a mut VmState,

    /// Host-specific dispatcher
    dispatcher: &'a mut D,
}

impl<'a, D: Dispatcher> Executor<'a, D> {
    /// Create a new executor
    ///
    /// # Arguments
    /// * `program` - The assembled program bytes
    /// * `state` - State to advance; must hold at least one call frame
    /// * `dispatcher` - Host dispatcher for globals and capabilities
    pub fn new(program: &'a [u8], state: &'a mut VmState, dispatcher: &'a mut D) -> Self {
        Executor {
            program,
            state,
            dispatcher,
        }
    }

    /// Execute until the chunk finishes or suspends
    ///
    /// Exceptions unwind to the innermost `try` handler. Without one, the run
    /// fails and the state must be discarded.
    pub fn execute(&mut self) -> Result<ExecOutcome, VmError> {
        let started = Instant::now();
        let result = self.run();
        self.state.counters.sync_duration += started.elapsed();
        let memory = self.state.stack_memory();
        self.state.counters.max_mem_used = self.state.counters.max_mem_used.max(memory);
        result
    }

    fn run(&mut self) -> Result<ExecOutcome, VmError> {
        loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Done(outcome)) => return Ok(outcome),
                Err(err) => self.unwind(err)?,
            }
        }
    }

    /// Transfer control to the innermost handler, or give the error back
    fn unwind(&mut self, err: VmError) -> Result<(), VmError> {
        let value = match &err {
            VmError::InvalidBytecode(_) => return Err(err),
            VmError::Exception(message) => Value::error("Error", message.clone()),
            VmError::Thrown(value) => value.clone(),
        };

        let Some(handler) = self.state.throw_stack.pop() else {
            return Err(err);
        };
        if handler.call_depth == 0 || handler.call_depth > self.state.frames.len() {
            return Err(invalid(format!(
                "Handler call depth {} exceeds frame count {}",
                handler.call_depth,
                self.state.frames.len()
            )));
        }

        self.state.frames.truncate(handler.call_depth);
        self.state.stack.truncate(handler.stack_len);
        self.state.stack.push(value);
        self.frame_mut()?.ip = handler.catch_ip;
        Ok(())
    }

    fn step(&mut self) -> Result<Step, VmError> {
        let program = self.program;
        let ip = self.frame()?.ip;

        if ip >= program.len() {
            if self.state.frames.len() > 1 {
                return Err(invalid("Function body ran past the end of the program"));
            }
            return Ok(Step::Done(ExecOutcome::Finished));
        }

        let opcode = Opcode::from_u8(program[ip]).map_err(VmError::InvalidBytecode)?;
        let len = opcodes::instruction_len(program, ip).map_err(VmError::InvalidBytecode)?;
        let next = ip + len;
        let operand = ip + 1;
        self.frame_mut()?.ip = next;
        self.state.counters.ops += 1;

        match opcode {
            Opcode::PushNull => self.push(Value::Null),
            Opcode::PushTrue => self.push(Value::Bool(true)),
            Opcode::PushFalse => self.push(Value::Bool(false)),
            Opcode::PushInt => {
                let value = opcodes::read_i64(program, operand).map_err(VmError::InvalidBytecode)?;
                self.push(Value::Int(value));
            }
            Opcode::PushFloat => {
                let value = opcodes::read_f64(program, operand).map_err(VmError::InvalidBytecode)?;
                self.push(Value::Float(value));
            }
            Opcode::PushString => {
                let (value, _) = opcodes::read_string(program, operand).map_err(VmError::InvalidBytecode)?;
                self.push(Value::from(value));
            }

            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::GetLocal | Opcode::GetRootLocal => {
                let slot = opcodes::read_u16(program, operand).map_err(VmError::InvalidBytecode)? as usize;
                let base = if opcode == Opcode::GetLocal { self.frame()?.base } else { 0 };
                let value = self
                    .state
                    .stack
                    .get(base + slot)
                    .cloned()
                    .ok_or_else(|| invalid(format!("Local slot {} out of range", base + slot)))?;
                self.push(value);
            }

            Opcode::SetLocal | Opcode::SetRootLocal => {
                let slot = opcodes::read_u16(program, operand).map_err(VmError::InvalidBytecode)? as usize;
                let base = if opcode == Opcode::SetLocal { self.frame()?.base } else { 0 };
                let value = self.pop()?;
                let target = self
                    .state
                    .stack
                    .get_mut(base + slot)
                    .ok_or_else(|| invalid(format!("Local slot {} out of range", base + slot)))?;
                *target = value;
            }

            Opcode::GetGlobal => {
                let (name, _) = opcodes::read_string(program, operand).map_err(VmError::InvalidBytecode)?;
                let value = self.dispatcher.load_global(name).map_err(VmError::Exception)?;
                self.push(value);
            }

            // Arithmetic operations
            Opcode::Add => self.binary_op(BinaryOp::Add)?,
            Opcode::Sub => self.binary_op(BinaryOp::Sub)?,
            Opcode::Mul => self.binary_op(BinaryOp::Mul)?,
            Opcode::Div => self.binary_op(BinaryOp::Div)?,
            Opcode::Mod => self.binary_op(BinaryOp::Mod)?,
            Opcode::Neg => {
                let value = self.pop()?;
                let negated = match value {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| VmError::Exception("Integer overflow in negation".to_string()))?,
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(VmError::Exception(format!("Cannot negate {}", other.type_name())));
                    }
                };
                self.push(negated);
            }

            // Comparison operations
            Opcode::Eq => self.comparison_op(ComparisonOp::Eq)?,
            Opcode::Ne => self.comparison_op(ComparisonOp::Ne)?,
            Opcode::Lt => self.comparison_op(ComparisonOp::Lt)?,
            Opcode::Gt => self.comparison_op(ComparisonOp::Gt)?,
            Opcode::Le => self.comparison_op(ComparisonOp::Le)?,
            Opcode::Ge => self.comparison_op(ComparisonOp::Ge)?,

            // Logical operations
            Opcode::And => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(Value::Bool(left.is_truthy() && right.is_truthy()));
            }
            Opcode::Or => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(Value::Bool(left.is_truthy() || right.is_truthy()));
            }
            Opcode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()));
            }

            // Containers
            Opcode::GetItem => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let value = stdlib::get_item(&obj, &key).map_err(VmError::Exception)?;
                self.push(value);
            }
            Opcode::SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                let obj = self.pop()?;
                let updated = stdlib::set_item(obj, &key, value).map_err(VmError::Exception)?;
                self.push(updated);
            }
            Opcode::NewArray => {
                let count = opcodes::read_u16(program, operand).map_err(VmError::InvalidBytecode)? as usize;
                let items = self.pop_n(count)?;
                self.push(Value::Array(items));
            }
            Opcode::NewDict => {
                let pairs = opcodes::read_u16(program, operand).map_err(VmError::InvalidBytecode)? as usize;
                let items = self.pop_n(pairs * 2)?;
                let mut map = std::collections::BTreeMap::new();
                let mut iter = items.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    let key = match key {
                        Value::String(s) => s,
                        Value::Int(i) => i.to_string(),
                        other => {
                            return Err(VmError::Exception(format!(
                                "Dictionary keys must be strings, got {}",
                                other.type_name()
                            )));
                        }
                    };
                    map.insert(key, value);
                }
                self.push(Value::Object(map));
            }

            // Control flow
            Opcode::Jump => {
                let offset = opcodes::read_i32(program, operand).map_err(VmError::InvalidBytecode)?;
                let target = self.jump_target(next, offset)?;
                self.frame_mut()?.ip = target;
            }
            Opcode::JumpIfFalse => {
                let offset = opcodes::read_i32(program, operand).map_err(VmError::InvalidBytecode)?;
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    let target = self.jump_target(next, offset)?;
                    self.frame_mut()?.ip = target;
                }
            }

            // Functions
            Opcode::CallGlobal => {
                let (name, consumed) =
                    opcodes::read_string(program, operand).map_err(VmError::InvalidBytecode)?;
                let arg_count =
                    opcodes::read_u8(program, operand + consumed).map_err(VmError::InvalidBytecode)? as usize;
                return self.call(name, arg_count);
            }
            Opcode::Return => return self.return_from_frame(),
            Opcode::ReturnChunk => {
                let bound = opcodes::read_u16(program, operand).map_err(VmError::InvalidBytecode)? as usize;
                return self.return_from_chunk(bound);
            }
            Opcode::DeclareFn => {
                let (name, consumed) =
                    opcodes::read_string(program, operand).map_err(VmError::InvalidBytecode)?;
                let arg_count =
                    opcodes::read_u8(program, operand + consumed).map_err(VmError::InvalidBytecode)? as usize;
                let body_len = opcodes::read_u32(program, operand + consumed + 1)
                    .map_err(VmError::InvalidBytecode)? as usize;
                if next + body_len > program.len() {
                    return Err(invalid(format!("Body of function '{}' exceeds the program", name)));
                }
                let chunk = self.root_chunk()?;
                self.state.declared_functions.insert(
                    name.to_string(),
                    DeclaredFunction {
                        arg_count,
                        ip: next,
                        chunk,
                    },
                );
                self.frame_mut()?.ip = next + body_len;
            }

            // Exceptions
            Opcode::Try => {
                let offset = opcodes::read_i32(program, operand).map_err(VmError::InvalidBytecode)?;
                let catch_ip = self.jump_target(next, offset)?;
                self.state.throw_stack.push(ThrowFrame {
                    catch_ip,
                    stack_len: self.state.stack.len(),
                    call_depth: self.state.frames.len(),
                });
            }
            Opcode::PopTry => {
                self.state
                    .throw_stack
                    .pop()
                    .ok_or_else(|| invalid("PopTry without an installed handler"))?;
            }
            Opcode::Throw => {
                let value = self.pop()?;
                return Err(VmError::Thrown(value));
            }
        }

        Ok(Step::Continue)
    }

    /// Resolve a call: declared function, then built-in, then host
    fn call(&mut self, name: &str, arg_count: usize) -> Result<Step, VmError> {
        if self.state.stack.len() < arg_count {
            return Err(invalid(format!(
                "Stack underflow: need {} args for {}(), but only {} on stack",
                arg_count,
                name,
                self.state.stack.len()
            )));
        }

        if let Some(function) = self.state.declared_functions.get(name).cloned() {
            if arg_count > function.arg_count {
                return Err(VmError::Exception(format!(
                    "Function {}() takes {} arguments, got {}",
                    name, function.arg_count, arg_count
                )));
            }
            if self.state.frames.len() >= MAX_CALL_DEPTH {
                return Err(VmError::Exception("Maximum call depth exceeded".to_string()));
            }
            for _ in arg_count..function.arg_count {
                self.push(Value::Null);
            }
            let base = self.state.stack.len() - function.arg_count;
            self.state.frames.push(CallFrame {
                ip: function.ip,
                base,
                arg_count: function.arg_count,
                closure: Callable {
                    name: name.to_string(),
                    arg_count: function.arg_count,
                    upvalue_count: 0,
                    ip: function.ip,
                    chunk: function.chunk,
                },
            });
            return Ok(Step::Continue);
        }

        let args = self.pop_n(arg_count)?;

        if let Some(result) = stdlib::call(name, &args) {
            self.push(result.map_err(VmError::Exception)?);
            return Ok(Step::Continue);
        }

        if self.dispatcher.is_async(name) {
            self.state.counters.async_steps += 1;
            return Ok(Step::Done(ExecOutcome::Suspended(AsyncCall {
                name: name.to_string(),
                args,
            })));
        }

        let result = self
            .dispatcher
            .call_function(name, args)
            .map_err(VmError::Exception)?;
        self.push(result);
        Ok(Step::Continue)
    }

    fn return_from_frame(&mut self) -> Result<Step, VmError> {
        let depth = self.state.frames.len();
        if depth <= 1 {
            return Err(invalid("Return outside a function"));
        }
        let value = self.pop()?;
        self.state.throw_stack.retain(|handler| handler.call_depth < depth);

        let frame = self
            .state
            .frames
            .pop()
            .ok_or_else(|| invalid("Return without a call frame"))?;
        self.state.stack.truncate(frame.base);
        self.push(value);
        Ok(Step::Continue)
    }

    fn return_from_chunk(&mut self, bound: usize) -> Result<Step, VmError> {
        if self.state.frames.len() != 1 {
            return Err(invalid("Chunk return inside a function"));
        }
        let value = self.pop()?;
        if bound > self.state.stack.len() {
            return Err(invalid(format!(
                "Chunk return keeps {} slots but the stack holds {}",
                bound,
                self.state.stack.len()
            )));
        }

        // Block locals above the bound slots go with the chunk
        self.state.stack.truncate(bound);
        self.state.throw_stack.clear();
        let end = self.program.len();
        self.frame_mut()?.ip = end;
        Ok(Step::Done(ExecOutcome::Returned(value)))
    }

    /// Chunk that owns the bottom (chunk-root) frame
    fn root_chunk(&self) -> Result<usize, VmError> {
        self.state
            .frames
            .first()
            .map(|frame| frame.closure.chunk)
            .ok_or_else(|| invalid("No active call frame"))
    }

    /// A target one byte past the end of the program ends the chunk. That
    /// happens when the assembler trimmed a trailing Pop a jump pointed beyond.
    fn jump_target(&self, next: usize, offset: i32) -> Result<usize, VmError> {
        let target = next as i64 + i64::from(offset);
        let len = self.program.len() as i64;
        if target < 0 || target > len + 1 {
            return Err(invalid(format!(
                "Jump to offset {} outside a program of {} bytes",
                target, len
            )));
        }
        Ok((target as usize).min(self.program.len()))
    }

    #[inline]
    fn frame(&self) -> Result<&CallFrame, VmError> {
        self.state
            .frames
            .last()
            .ok_or_else(|| invalid("No active call frame"))
    }

    #[inline]
    fn frame_mut(&mut self) -> Result<&mut CallFrame, VmError> {
        self.state
            .frames
            .last_mut()
            .ok_or_else(|| invalid("No active call frame"))
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.state.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Result<Value, VmError> {
        self.state
            .stack
            .pop()
            .ok_or_else(|| invalid("Stack underflow"))
    }

    /// Pop `count` values, returned in push order
    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, VmError> {
        let len = self.state.stack.len();
        if len < count {
            return Err(invalid(format!(
                "Stack underflow: need {} values, only {} on stack",
                count, len
            )));
        }
        Ok(self.state.stack.drain(len - count..).collect())
    }

    fn binary_op(&mut self, op: BinaryOp) -> Result<(), VmError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = self
            .dispatcher
            .binary_op(op, &left, &right)
            .map_err(VmError::Exception)?;
        self.push(result);
        Ok(())
    }

    fn comparison_op(&mut self, op: ComparisonOp) -> Result<(), VmError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = self
            .dispatcher
            .comparison_op(op, &left, &right)
            .map_err(VmError::Exception)?;
        self.push(result);
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> VmError {
    VmError::InvalidBytecode(message.into())
}
