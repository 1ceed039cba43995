//! Session controller
//!
//! Public entry point of the engine. Chunks are submitted as source strings
//! and evaluated one at a time, in submission order, by a worker task:
//!
//! 1. resolve the locals context and starting state from earlier chunks
//! 2. compile against that context
//! 3. assemble the program from every successful chunk plus the new one
//! 4. seed the state and run it, awaiting capabilities as needed
//! 5. record the outcome on the chunk and publish the transition

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::{CapabilityRegistry, Globals, HttpQueryEngine, OutputSink, QueryEngine};
use crate::chunk_store::{Chunk, ChunkStatus, ChunkStore, ChunkSuccess};
use crate::compile::{CompilerService, LocalCompiler};
use crate::config::SessionConfig;
use crate::driver::ExecutionDriver;
use crate::error::{CompileError, EngineError};
use crate::format::{DisplayFormatter, ReplFormatter};
use crate::program::{ProgramAssembler, strip_header};
use crate::reconciler::StateReconciler;
use crate::value::Value;


/// Chunk status transitions, as published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    Submitted { index: usize, source: String },
    Output { index: usize, line: String },
    Succeeded { index: usize, result: String },
    Failed { index: usize, error: String },
}

/// State shared by the handle, the worker and the output sink
struct Shared {
    store: Mutex<ChunkStore>,
    events: broadcast::Sender<ChunkEvent>,
}

impl Shared {
    fn store(&self) -> MutexGuard<'_, ChunkStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ChunkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Routes `print` lines onto the evaluating chunk
struct StoreOutput(Arc<Shared>);

impl OutputSink for StoreOutput {
    fn write_line(&self, chunk: usize, line: String) {
        if self.0.store().append_output(chunk, line.clone()).is_ok() {
            self.0.publish(ChunkEvent::Output { index: chunk, line });
        }
    }
}

struct Job {
    index: usize,
    reply: oneshot::Sender<Chunk>,
}

/// A chunk that has been queued for evaluation
#[derive(Debug)]
pub struct Submission {
    index: usize,
    reply: oneshot::Receiver<Chunk>,
}

impl Submission {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Wait for the chunk to reach Succeeded or Failed
    pub async fn outcome(self) -> Result<Chunk, EngineError> {
        self.reply.await.map_err(|_| EngineError::SessionClosed)
    }
}

/// Handle to a running session
///
/// Dropping every handle stops the worker once the queue drains.
pub struct Session {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl Session {
    /// Start a session worker on the current tokio runtime
    pub fn spawn(
        config: &SessionConfig,
        compiler: Arc<dyn CompilerService>,
        registry: CapabilityRegistry,
        formatter: Arc<dyn DisplayFormatter>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            store: Mutex::new(ChunkStore::new()),
            events,
        });

        let driver = ExecutionDriver::new(
            Arc::new(registry),
            Arc::new(Globals::new(config.global_values())),
            Arc::clone(&formatter),
            Arc::new(StoreOutput(Arc::clone(&shared))),
            config.capability_timeout(),
        );

        let (jobs, queue) = mpsc::unbounded_channel();
        let worker = Worker {
            shared: Arc::clone(&shared),
            compiler,
            driver,
            formatter,
        };
        let worker = tokio::spawn(worker.run(queue));

        Session {
            shared,
            jobs,
            worker,
        }
    }

    /// A session with the bundled compiler and the standard capabilities
    ///
    /// Without an explicit engine, `run` goes to the configured query
    /// endpoint, if any.
    pub fn local(
        config: &SessionConfig,
        query_engine: Option<Arc<dyn QueryEngine>>,
    ) -> Result<Self, EngineError> {
        let query_engine = match (query_engine, &config.query) {
            (Some(engine), _) => Some(engine),
            (None, Some(query)) => {
                let engine = HttpQueryEngine::new(query, &config.fetch)
                    .map_err(|e| EngineError::Runtime(e.into()))?;
                Some(Arc::new(engine) as Arc<dyn QueryEngine>)
            }
            (None, None) => None,
        };
        let registry = CapabilityRegistry::standard(&config.fetch, query_engine)
            .map_err(|e| EngineError::Runtime(e.into()))?;
        Ok(Self::spawn(
            config,
            Arc::new(LocalCompiler),
            registry,
            Arc::new(ReplFormatter),
        ))
    }

    /// Append a Pending chunk and queue it
    ///
    /// Evaluation proceeds whether or not the submission is awaited.
    pub fn submit(&self, source: impl Into<String>) -> Result<Submission, EngineError> {
        let source = source.into();
        let (reply, outcome) = oneshot::channel();

        // Appending, queueing and announcing under one lock keeps queue order
        // equal to index order, and Submitted ahead of the chunk's other events
        let mut store = self.shared.store();
        let index = store.append(source.clone());
        if self.jobs.send(Job { index, reply }).is_err() {
            let _ = store.record_failure(index, EngineError::SessionClosed);
            return Err(EngineError::SessionClosed);
        }
        self.shared.publish(ChunkEvent::Submitted { index, source });
        drop(store);

        Ok(Submission {
            index,
            reply: outcome,
        })
    }

    /// Submit and wait for the outcome
    pub async fn eval(&self, source: impl Into<String>) -> Result<Chunk, EngineError> {
        self.submit(source)?.outcome().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChunkEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the whole history
    pub fn chunks(&self) -> Vec<Chunk> {
        self.shared.store().chunks().to_vec()
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        self.shared.store().get(index).cloned()
    }

    /// Encoded state left by a Succeeded chunk
    pub fn snapshot(&self, index: usize) -> Option<Vec<u8>> {
        self.shared
            .store()
            .get(index)
            .and_then(|chunk| chunk.state.as_ref())
            .map(|state| state.to_proto_bytes())
    }

    /// Stop accepting chunks and wait for queued ones to finish
    pub async fn shutdown(self) {
        let Session { jobs, worker, .. } = self;
        drop(jobs);
        if let Err(e) = worker.await {
            warn!(error = %e, "Session worker ended abnormally");
        }
    }
}

/// Evaluates queued chunks one at a time
struct Worker {
    shared: Arc<Shared>,
    compiler: Arc<dyn CompilerService>,
    driver: ExecutionDriver,
    formatter: Arc<dyn DisplayFormatter>,
}

impl Worker {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Job>) {
        info!("Session started");
        while let Some(job) = queue.recv().await {
            if let Some(chunk) = self.evaluate(job.index).await {
                // The submitter may have stopped waiting
                let _ = job.reply.send(chunk);
            }
        }
        info!("Session stopped");
    }

    async fn evaluate(&self, index: usize) -> Option<Chunk> {
        let outcome = self.attempt(index).await;

        let mut store = self.shared.store();
        let event = match outcome {
            Ok(success) => {
                let result = success.result.clone();
                store
                    .record_success(index, success)
                    .ok()
                    .map(|()| ChunkEvent::Succeeded { index, result })
            }
            Err(error) => {
                debug!(index, error = %error, "Evaluation failed");
                let message = error.to_string();
                store
                    .record_failure(index, error)
                    .ok()
                    .map(|()| ChunkEvent::Failed {
                        index,
                        error: message,
                    })
            }
        };
        let chunk = store.get(index).cloned();
        drop(store);

        if let Some(event) = event {
            self.shared.publish(event);
        }
        chunk
    }

    async fn attempt(&self, index: usize) -> Result<ChunkSuccess, EngineError> {
        let (source, resolution) = {
            let store = self.shared.store();
            let source = store
                .get(index)
                .filter(|chunk| chunk.status == ChunkStatus::Pending)
                .map(|chunk| chunk.source.clone())
                .ok_or_else(|| EngineError::invariant(format!("chunk {} is not pending", index)))?;
            (source, StateReconciler::resolve(&store, index))
        };
        debug!(
            index,
            locals = resolution.locals.len(),
            locals_chunk = ?resolution.locals_chunk,
            state_chunk = ?resolution.state_chunk,
            "Resolved context"
        );

        let compiled = self.compiler.compile(&source, &resolution.locals).await?;
        let code = strip_header(&compiled.bytecode).map_err(CompileError::Bytecode)?;

        let program = {
            let store = self.shared.store();
            let prior = store
                .chunks_up_to(index)
                .iter()
                .filter(|chunk| chunk.status == ChunkStatus::Succeeded)
                .map(|chunk| chunk.bytecode.as_slice());
            ProgramAssembler::assemble(prior, code).map_err(CompileError::Bytecode)?
        };

        let state = StateReconciler::seed(&resolution, program.entry(), index)?;
        let output = self.driver.run(&program, state, index).await?;

        let mut state = output.state;
        let locals = compiled.locals.len();
        if state.stack.len() != locals {
            debug!(
                index,
                from = state.stack.len(),
                to = locals,
                "Fitting stored stack to declared locals"
            );
            // Bindings skipped by an early top-level return read as null
            state.stack.resize(locals, Value::Null);
        }

        Ok(ChunkSuccess {
            bytecode: code.to_vec(),
            locals: compiled.locals,
            result: self.formatter.format(&output.result),
            state,
        })
    }
}
