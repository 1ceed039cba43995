//! Ordered record of submitted chunks and their outcomes

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::parser::Local;
use crate::state::VmState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChunkStatus::Pending)
    }
}

/// One submitted unit of source
///
/// `bytecode`, `locals`, `result` and `state` are only ever set on a
/// Succeeded chunk. `output` may be filled whatever the outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub source: String,
    pub status: ChunkStatus,
    /// Instruction bytes with the header removed
    pub bytecode: Vec<u8>,
    pub locals: Vec<Local>,
    pub output: Vec<String>,
    pub result: Option<String>,
    pub error: Option<EngineError>,
    pub state: Option<Arc<VmState>>,
}

impl Chunk {
    fn pending(index: usize, source: String) -> Self {
        Chunk {
            index,
            source,
            status: ChunkStatus::Pending,
            bytecode: Vec::new(),
            locals: Vec::new(),
            output: Vec::new(),
            result: None,
            error: None,
            state: None,
        }
    }

    /// Captured print output, one line per call
    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }
}

/// What a successful evaluation leaves behind
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSuccess {
    pub bytecode: Vec<u8>,
    pub locals: Vec<Local>,
    pub result: String,
    pub state: VmState,
}

#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending chunk and return its index
    pub fn append(&mut self, source: impl Into<String>) -> usize {
        let index = self.chunks.len();
        self.chunks.push(Chunk::pending(index, source.into()));
        debug!(index, "Chunk appended");
        index
    }

    pub fn record_success(&mut self, index: usize, success: ChunkSuccess) -> Result<(), EngineError> {
        let chunk = self.pending_mut(index, "success")?;
        chunk.status = ChunkStatus::Succeeded;
        chunk.bytecode = success.bytecode;
        chunk.locals = success.locals;
        chunk.result = Some(success.result);
        chunk.state = Some(Arc::new(success.state));
        debug!(index, "Chunk succeeded");
        Ok(())
    }

    pub fn record_failure(&mut self, index: usize, error: EngineError) -> Result<(), EngineError> {
        let chunk = self.pending_mut(index, "failure")?;
        chunk.status = ChunkStatus::Failed;
        chunk.error = Some(error);
        debug!(index, "Chunk failed");
        Ok(())
    }

    /// Transitions are refused, not applied, unless the chunk is still Pending
    fn pending_mut(&mut self, index: usize, transition: &str) -> Result<&mut Chunk, EngineError> {
        let Some(chunk) = self.chunks.get_mut(index) else {
            warn!(index, transition, "Refusing transition of unknown chunk");
            return Err(EngineError::invariant(format!("chunk {} does not exist", index)));
        };
        if chunk.status.is_terminal() {
            warn!(index, transition, status = ?chunk.status, "Refusing transition of terminal chunk");
            return Err(EngineError::invariant(format!(
                "chunk {} is already {:?}",
                index, chunk.status
            )));
        }
        Ok(chunk)
    }

    pub fn append_output(&mut self, index: usize, line: impl Into<String>) -> Result<(), EngineError> {
        match self.chunks.get_mut(index) {
            Some(chunk) => {
                chunk.output.push(line.into());
                Ok(())
            }
            None => {
                warn!(index, "Dropping output for unknown chunk");
                Err(EngineError::invariant(format!("chunk {} does not exist", index)))
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunks strictly before `index`
    pub fn chunks_up_to(&self, index: usize) -> &[Chunk] {
        &self.chunks[..index.min(self.chunks.len())]
    }

    /// Nearest chunk before `index` with a non-empty locals list
    pub fn most_recent_with_locals(&self, before: usize) -> Option<&Chunk> {
        self.chunks_up_to(before)
            .iter()
            .rev()
            .find(|chunk| !chunk.locals.is_empty())
    }

    /// Nearest chunk before `index` with a recorded state
    pub fn most_recent_with_state(&self, before: usize) -> Option<&Chunk> {
        self.chunks_up_to(before)
            .iter()
            .rev()
            .find(|chunk| chunk.state.is_some())
    }
}
