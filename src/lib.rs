//! HogQL REPL engine
//!
//! An incremental bytecode evaluator for a small scripting language. Each
//! line submitted to a [`Session`] is compiled on its own, stitched onto the
//! bytecode of every earlier successful line, and executed against the VM
//! state those lines left behind.
//!
//! # Architecture
//!
//! - **Chunk store**: ordered history of submitted chunks and their outcomes
//! - **Program assembler**: concatenates position-independent chunk bytecode
//! - **State reconciler**: picks the locals context and starting state
//! - **Execution driver**: runs the interpreter, suspending at async host calls
//! - **Session**: serializes evaluations and publishes chunk events
//!
//! # Example Usage
//!
//! ```ignore
//! use hogrepl::{Session, SessionConfig};
//!
//! let session = Session::local(&SessionConfig::default(), None)?;
//! session.eval("let x := 20").await?;
//! let chunk = session.eval("x * 2 + 2").await?;
//! assert_eq!(chunk.result.as_deref(), Some("42"));
//! ```

// Interpreter core
pub mod dispatcher;
pub mod executor;
pub mod opcodes;
pub mod program;
pub mod state;
pub mod stdlib;
pub mod value;

// Parser and compiler
pub mod compile;
pub mod parser;

// Session engine
pub mod capabilities;
pub mod chunk_store;
pub mod config;
pub mod driver;
pub mod error;
pub mod format;
pub mod reconciler;
pub mod session;
pub mod snapshot;

// Re-export main types for convenience
pub use capabilities::{
    AsyncCapability, Capability, CapabilityRegistry, Globals, HttpQueryEngine, OutputSink, QueryEngine,
    SyncCapability,
};
pub use chunk_store::{Chunk, ChunkStatus, ChunkStore};
pub use compile::{CompiledChunk, CompilerService, LocalCompiler};
pub use config::{QueryConfig, SessionConfig};
pub use dispatcher::Dispatcher;
pub use driver::{ExecutionDriver, RunOutput};
pub use error::{CapabilityError, CompileError, ConfigError, EngineError, RuntimeError};
pub use executor::{ExecOutcome, Executor, VmError};
pub use format::{DisplayFormatter, JsonFormatter, ReplFormatter};
pub use opcodes::Opcode;
pub use program::{Program, ProgramAssembler};
pub use session::{ChunkEvent, Session, Submission};
pub use snapshot::Suspension;
pub use state::VmState;
pub use value::Value;

/// Current bytecode format version
pub const BYTECODE_VERSION: u8 = 1;
