//! Derives the locals context and starting state for a new chunk

use std::sync::Arc;

use tracing::debug;

use crate::chunk_store::ChunkStore;
use crate::error::EngineError;
use crate::parser::Local;
use crate::state::{CallFrame, Callable, VmState};

/// Result of the backward scan for one chunk
///
/// Locals and state are found independently and may come from different
/// chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub locals: Vec<Local>,
    pub locals_chunk: Option<usize>,
    pub state: Option<Arc<VmState>>,
    pub state_chunk: Option<usize>,
}

pub struct StateReconciler;

impl StateReconciler {
    /// Scan backward from `index - 1` for the nearest locals and nearest state
    pub fn resolve(store: &ChunkStore, index: usize) -> Resolution {
        let locals_chunk = store.most_recent_with_locals(index);
        let state_chunk = store.most_recent_with_state(index);

        Resolution {
            locals: locals_chunk.map(|c| c.locals.clone()).unwrap_or_default(),
            locals_chunk: locals_chunk.map(|c| c.index),
            state: state_chunk.and_then(|c| c.state.clone()),
            state_chunk: state_chunk.map(|c| c.index),
        }
    }

    /// Build the state chunk `chunk` starts from, entering the program at `entry`
    ///
    /// The stack keeps exactly one value per resolved local. The previous call
    /// stack is replaced by a single chunk-root frame; everything else carries
    /// over unchanged.
    pub fn seed(resolution: &Resolution, entry: usize, chunk: usize) -> Result<VmState, EngineError> {
        let previous = resolution.state.as_deref().cloned().unwrap_or_default();
        let locals_count = resolution.locals.len();

        let mut stack = previous.stack;
        if stack.len() < locals_count {
            return Err(EngineError::invariant(format!(
                "stack holds {} values but {} locals are declared",
                stack.len(),
                locals_count
            )));
        }
        if stack.len() > locals_count {
            debug!(
                chunk,
                from = stack.len(),
                to = locals_count,
                "Truncating leftover stack values"
            );
            stack.truncate(locals_count);
        }

        Ok(VmState {
            stack,
            frames: vec![CallFrame {
                ip: entry,
                closure: Callable::chunk_root(entry, chunk),
                base: 0,
                arg_count: 0,
            }],
            upvalues: previous.upvalues,
            declared_functions: previous.declared_functions,
            throw_stack: previous.throw_stack,
            counters: previous.counters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkSuccess;
    use crate::state::{Counters, DeclaredFunction};
    use crate::value::Value;

    fn locals(names: &[&str]) -> Vec<Local> {
        names
            .iter()
            .map(|name| Local {
                name: name.to_string(),
                depth: 0,
                is_captured: false,
            })
            .collect()
    }

    fn record(store: &mut ChunkStore, names: &[&str], stack: Vec<Value>) -> usize {
        let index = store.append("");
        let mut state = VmState {
            stack,
            ..VmState::default()
        };
        state.counters.ops = 10 * (index as u64 + 1);
        store
            .record_success(
                index,
                ChunkSuccess {
                    bytecode: Vec::new(),
                    locals: locals(names),
                    result: String::new(),
                    state,
                },
            )
            .unwrap();
        index
    }

    #[test]
    fn test_first_chunk_starts_empty() {
        let store = ChunkStore::new();
        let resolution = StateReconciler::resolve(&store, 0);
        assert_eq!(resolution, Resolution::default());

        let state = StateReconciler::seed(&resolution, 3, 0).unwrap();
        assert!(state.stack.is_empty());
        assert_eq!(state.frames.len(), 1);
        assert_eq!(state.frames[0].ip, 3);
        assert!(state.frames[0].closure.is_chunk_root());
        assert_eq!(state.counters, Counters::default());
    }

    #[test]
    fn test_failed_chunk_is_skipped() {
        let mut store = ChunkStore::new();
        record(&mut store, &["x"], vec![Value::Int(1)]);
        let failed = store.append("1 / y");
        store
            .record_failure(failed, EngineError::invariant("failed"))
            .unwrap();

        let resolution = StateReconciler::resolve(&store, 2);
        assert_eq!(resolution.locals_chunk, Some(0));
        assert_eq!(resolution.state_chunk, Some(0));
        assert_eq!(resolution.locals, locals(&["x"]));
    }

    #[test]
    fn test_leftover_values_are_truncated() {
        let mut store = ChunkStore::new();
        record(
            &mut store,
            &["x", "y"],
            vec![Value::Int(1), Value::Int(2), Value::Int(99), Value::Int(100)],
        );

        let resolution = StateReconciler::resolve(&store, 1);
        let state = StateReconciler::seed(&resolution, 20, 1).unwrap();
        assert_eq!(state.stack, vec![Value::Int(1), Value::Int(2)]);
        // the stored state is untouched
        assert_eq!(resolution.state.as_ref().unwrap().stack.len(), 4);
    }

    #[test]
    fn test_frames_replaced_and_rest_carried() {
        let mut stored = VmState {
            stack: vec![Value::Int(1)],
            frames: vec![
                CallFrame {
                    ip: 5,
                    closure: Callable::chunk_root(0, 0),
                    base: 0,
                    arg_count: 0,
                };
                2
            ],
            ..VmState::default()
        };
        stored.declared_functions.insert(
            "f".to_string(),
            DeclaredFunction {
                arg_count: 0,
                ip: 4,
                chunk: 0,
            },
        );
        stored.counters.async_steps = 2;

        let resolution = Resolution {
            locals: locals(&["x"]),
            locals_chunk: Some(0),
            state: Some(Arc::new(stored.clone())),
            state_chunk: Some(0),
        };
        let state = StateReconciler::seed(&resolution, 40, 1).unwrap();

        assert_eq!(state.frames.len(), 1);
        assert_eq!(state.frames[0].ip, 40);
        assert_eq!(state.frames[0].closure.chunk, 1);
        assert_eq!(state.declared_functions, stored.declared_functions);
        assert_eq!(state.counters, stored.counters);
    }

    #[test]
    fn test_short_stack_is_invariant_violation() {
        let resolution = Resolution {
            locals: locals(&["x", "y"]),
            locals_chunk: Some(0),
            state: Some(Arc::new(VmState {
                stack: vec![Value::Int(1)],
                ..VmState::default()
            })),
            state_chunk: Some(0),
        };
        assert!(matches!(
            StateReconciler::seed(&resolution, 0, 1),
            Err(EngineError::Invariant(_))
        ));
    }
}
