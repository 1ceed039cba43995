//! Interpreter state carried between chunks

use std::collections::BTreeMap;
use std::time::Duration;

use crate::value::Value;

/// Entry descriptor for a frame's code
///
/// Chunk roots use an empty name and zero arguments; declared functions carry
/// their own name and arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callable {
    pub name: String,
    pub arg_count: usize,
    pub upvalue_count: usize,
    /// Offset into the assembled program where the code starts
    pub ip: usize,
    /// Index of the chunk that declared this code
    pub chunk: usize,
}

impl Callable {
    /// Synthetic callable for a chunk's top-level code
    pub fn chunk_root(ip: usize, chunk: usize) -> Self {
        Callable {
            name: String::new(),
            arg_count: 0,
            upvalue_count: 0,
            ip,
            chunk,
        }
    }

    pub fn is_chunk_root(&self) -> bool {
        self.name.is_empty()
    }
}

/// One activation on the call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// Offset of the next instruction to execute
    pub ip: usize,
    pub closure: Callable,
    /// Stack index of the frame's first local slot
    pub base: usize,
    pub arg_count: usize,
}

/// An installed `try` handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrowFrame {
    pub catch_ip: usize,
    pub stack_len: usize,
    pub call_depth: usize,
}

/// A function registered by `DeclareFn`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredFunction {
    pub arg_count: usize,
    /// Absolute offset of the body in the assembled program
    pub ip: usize,
    pub chunk: usize,
}

/// Execution counters reported by the interpreter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Instructions executed
    pub ops: u64,
    /// Suspensions at asynchronous capability calls
    pub async_steps: u64,
    /// Peak estimated bytes held on the operand stack
    pub max_mem_used: u64,
    /// Time spent interpreting, excluding time suspended
    pub sync_duration: Duration,
}

/// Snapshot of interpreter state
///
/// Produced at the end of every successful run and stored read-only on the
/// chunk that produced it. The next chunk starts from a reconciled copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmState {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub upvalues: Vec<Value>,
    pub declared_functions: BTreeMap<String, DeclaredFunction>,
    pub throw_stack: Vec<ThrowFrame>,
    pub counters: Counters,
}

impl VmState {
    /// Estimated bytes held on the operand stack
    pub fn stack_memory(&self) -> u64 {
        self.stack.iter().map(Value::approx_size).sum::<usize>() as u64
    }
}
