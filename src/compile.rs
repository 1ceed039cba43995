//! Compiler service seam
//!
//! The session only needs "source plus context locals in, header-prefixed
//! bytecode plus locals out". Hosts that compile remotely implement
//! [`CompilerService`] over their transport; [`LocalCompiler`] runs the
//! bundled parser in-process.

use async_trait::async_trait;
use tracing::debug;

use crate::error::CompileError;
use crate::parser::{self, Local};

/// What the compiler returns for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledChunk {
    /// Instructions with the header prefix still attached
    pub bytecode: Vec<u8>,
    /// Full chunk-root locals list after this chunk
    pub locals: Vec<Local>,
}

#[async_trait]
pub trait CompilerService: Send + Sync {
    async fn compile(&self, source: &str, context: &[Local]) -> Result<CompiledChunk, CompileError>;
}

/// In-process compiler backed by [`crate::parser`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCompiler;

#[async_trait]
impl CompilerService for LocalCompiler {
    async fn compile(&self, source: &str, context: &[Local]) -> Result<CompiledChunk, CompileError> {
        let compiled = parser::compile(source, context)?;
        debug!(
            bytes = compiled.bytecode.len(),
            locals = compiled.locals.len(),
            "Compiled chunk"
        );
        Ok(CompiledChunk {
            bytecode: compiled.bytecode,
            locals: compiled.locals,
        })
    }
}
