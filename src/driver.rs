//! Runs an assembled program to completion, awaiting host capabilities at
//! each suspension point

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::capabilities::{CallContext, Capability, CapabilityRegistry, Globals, OutputSink};
use crate::dispatcher::Dispatcher;
use crate::error::{CapabilityError, RuntimeError};
use crate::executor::{AsyncCall, ExecOutcome, Executor};
use crate::format::DisplayFormatter;
use crate::program::Program;
use crate::snapshot::Suspension;
use crate::state::VmState;
use crate::value::Value;

/// Final state and result of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub state: VmState,
    /// Value of a chunk-level `return`, else the top of the final stack, or
    /// null when it is empty
    pub result: Value,
}

/// Where one synchronous slice of execution stopped
#[derive(Debug, Clone, PartialEq)]
pub enum Slice {
    Finished(RunOutput),
    Suspended(Suspension),
}

/// Dispatcher answering globals and synchronous capabilities for one slice
struct HostDispatcher<'a> {
    registry: &'a CapabilityRegistry,
    globals: &'a Globals,
    ctx: CallContext<'a>,
}

impl Dispatcher for HostDispatcher<'_> {
    fn load_global(&mut self, name: &str) -> Result<Value, String> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| format!("Global variable not found: {}", name))
    }

    fn is_async(&self, name: &str) -> bool {
        self.registry.is_async(name)
    }

    fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        match self.registry.get(name) {
            Some(Capability::Sync(capability)) => {
                capability.call(&self.ctx, args).map_err(|e| e.to_string())
            }
            Some(Capability::Async(_)) => Err(format!("{}() must be awaited", name)),
            None => Err(format!("Unknown function: {}", name)),
        }
    }
}

/// Drives the executor across suspensions
///
/// Synchronous capabilities run inline; asynchronous ones end the slice with a
/// [`Suspension`] that is awaited here and then resumed with the call's
/// result.
#[derive(Clone)]
pub struct ExecutionDriver {
    registry: Arc<CapabilityRegistry>,
    globals: Arc<Globals>,
    formatter: Arc<dyn DisplayFormatter>,
    output: Arc<dyn OutputSink>,
    timeout: Option<Duration>,
}

impl ExecutionDriver {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        globals: Arc<Globals>,
        formatter: Arc<dyn DisplayFormatter>,
        output: Arc<dyn OutputSink>,
        timeout: Option<Duration>,
    ) -> Self {
        ExecutionDriver {
            registry,
            globals,
            formatter,
            output,
            timeout,
        }
    }

    /// Run `state` over `program` until the chunk finishes
    ///
    /// Any error means the run failed as a whole; no partial state is handed
    /// back.
    pub async fn run(&self, program: &Program, state: VmState, chunk: usize) -> Result<RunOutput, RuntimeError> {
        let mut state = state;
        loop {
            match self.step(program, state, chunk)? {
                Slice::Finished(output) => return Ok(output),
                Slice::Suspended(suspension) => {
                    let result = self.call_async(&suspension.call).await?;
                    state = suspension.resume_with(result);
                }
            }
        }
    }

    /// Execute synchronously up to the next suspension or the end
    pub fn step(&self, program: &Program, mut state: VmState, chunk: usize) -> Result<Slice, RuntimeError> {
        let mut dispatcher = HostDispatcher {
            registry: &self.registry,
            globals: &self.globals,
            ctx: CallContext {
                chunk,
                output: self.output.as_ref(),
                formatter: self.formatter.as_ref(),
            },
        };
        let outcome = Executor::new(program.bytes(), &mut state, &mut dispatcher).execute()?;

        Ok(match outcome {
            ExecOutcome::Finished => {
                let result = state.stack.last().cloned().unwrap_or(Value::Null);
                Slice::Finished(RunOutput { state, result })
            }
            ExecOutcome::Returned(result) => Slice::Finished(RunOutput { state, result }),
            ExecOutcome::Suspended(call) => {
                debug!(chunk, capability = %call.name, "Suspended on capability");
                Slice::Suspended(Suspension { state, call })
            }
        })
    }

    async fn call_async(&self, call: &AsyncCall) -> Result<Value, CapabilityError> {
        let capability = match self.registry.get(&call.name) {
            Some(Capability::Async(capability)) => Arc::clone(capability),
            _ => return Err(CapabilityError::Unknown(call.name.clone())),
        };

        let pending = capability.call(call.args.clone());
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| CapabilityError::Timeout {
                    capability: call.name.clone(),
                    timeout,
                })?,
            None => pending.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{AsyncCapability, SleepCapability, SyncCapability};
    use crate::executor::VmError;
    use crate::format::ReplFormatter;
    use crate::parser;
    use crate::program::{ProgramAssembler, strip_header};
    use crate::reconciler::{Resolution, StateReconciler};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Lines(Mutex<Vec<(usize, String)>>);

    impl OutputSink for Lines {
        fn write_line(&self, chunk: usize, line: String) {
            self.0.lock().unwrap().push((chunk, line));
        }
    }

    struct Boom;

    impl SyncCapability for Boom {
        fn call(&self, _ctx: &CallContext<'_>, _args: Vec<Value>) -> Result<Value, CapabilityError> {
            Err(CapabilityError::failed("boom", "exploded"))
        }
    }

    /// Sleeps far longer than any test timeout
    struct Hang;

    #[async_trait]
    impl AsyncCapability for Hang {
        async fn call(&self, _args: Vec<Value>) -> Result<Value, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    fn driver(lines: Arc<Lines>, timeout: Option<Duration>) -> ExecutionDriver {
        let mut registry = CapabilityRegistry::new();
        registry.register_sync("print", crate::capabilities::PrintCapability);
        registry.register_sync("boom", Boom);
        registry.register_async("sleep", SleepCapability);
        registry.register_async("hang", Hang);

        let mut globals = Globals::default();
        globals.insert("answer", Value::Int(42));

        ExecutionDriver::new(
            Arc::new(registry),
            Arc::new(globals),
            Arc::new(ReplFormatter),
            lines,
            timeout,
        )
    }

    fn prepare(source: &str) -> (Program, VmState) {
        let compiled = parser::compile(source, &[]).unwrap();
        let code = strip_header(&compiled.bytecode).unwrap();
        let program = ProgramAssembler::assemble(std::iter::empty(), code).unwrap();
        let state = StateReconciler::seed(&Resolution::default(), program.entry(), 0).unwrap();
        (program, state)
    }

    async fn run(source: &str) -> Result<RunOutput, RuntimeError> {
        let (program, state) = prepare(source);
        driver(Arc::new(Lines::default()), None)
            .run(&program, state, 0)
            .await
    }

    #[tokio::test]
    async fn test_pure_expression() {
        let output = run("1 + 2 * 3").await.unwrap();
        assert_eq!(output.result, Value::Int(7));
        assert_eq!(output.state.stack, vec![Value::Int(7)]);
    }

    #[tokio::test]
    async fn test_empty_stack_gives_null() {
        let output = run("let x := 1; x := 2").await.unwrap();
        // the binding is the only value left, so it is the result
        assert_eq!(output.result, Value::Int(2));

        let output = run("").await.unwrap();
        assert_eq!(output.result, Value::Null);
    }

    #[tokio::test]
    async fn test_early_return_keeps_bound_locals() {
        let output = run("let a := 1; if (a) { let t := 5; return t + 1 }; let b := 2")
            .await
            .unwrap();
        assert_eq!(output.result, Value::Int(6));
        assert_eq!(output.state.stack, vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_print_routes_to_chunk() {
        let lines = Arc::new(Lines::default());
        let (program, state) = prepare("print(1); print('two', [3]); print()");
        driver(lines.clone(), None)
            .run(&program, state, 4)
            .await
            .unwrap();

        assert_eq!(
            *lines.0.lock().unwrap(),
            vec![
                (4, "1".to_string()),
                (4, "two [3]".to_string()),
                (4, String::new())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_sleep() {
        let output = run("let a := 40; sleep(1); a + 2").await.unwrap();
        assert_eq!(output.result, Value::Int(42));
        assert_eq!(output.state.counters.async_steps, 1);
        assert_eq!(output.state.stack, vec![Value::Int(40), Value::Int(42)]);
    }

    #[tokio::test]
    async fn test_suspension_survives_encoding() {
        let (program, state) = prepare("let a := 1; let b := sleep(0); a + 1");
        let driver = driver(Arc::new(Lines::default()), None);

        let suspension = match driver.step(&program, state, 0).unwrap() {
            Slice::Suspended(suspension) => suspension,
            other => panic!("Expected suspension, got {:?}", other),
        };
        assert_eq!(suspension.call.name, "sleep");
        assert_eq!(suspension.call.args, vec![Value::Int(0)]);

        let restored = Suspension::from_proto_bytes(&suspension.to_proto_bytes()).unwrap();
        assert_eq!(restored.call, suspension.call);
        assert_eq!(restored.state.stack, suspension.state.stack);
        assert_eq!(restored.state.frames, suspension.state.frames);

        let output = driver
            .run(&program, restored.resume_with(Value::Null), 0)
            .await
            .unwrap();
        assert_eq!(output.result, Value::Int(2));
        assert_eq!(output.state.stack, vec![Value::Int(1), Value::Null, Value::Int(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_timeout() {
        let (program, state) = prepare("hang()");
        let err = driver(Arc::new(Lines::default()), Some(Duration::from_secs(5)))
            .run(&program, state, 0)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Capability(CapabilityError::Timeout {
                capability: "hang".to_string(),
                timeout: Duration::from_secs(5),
            })
        );
    }

    #[tokio::test]
    async fn test_async_capability_error_fails_run() {
        let err = run("sleep(-1)").await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Capability(CapabilityError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_capability_error_is_catchable() {
        let output = run("let r := null; try { boom() } catch (e) { r := e.message }; r")
            .await
            .unwrap();
        assert_eq!(output.result, Value::from("boom() failed: exploded"));
    }

    #[tokio::test]
    async fn test_runtime_error() {
        let err = run("1 / 0").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Vm(VmError::Exception(_))));

        let err = run("nope()").await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown function: nope");
    }

    #[tokio::test]
    async fn test_globals() {
        assert_eq!(run("answer + 1").await.unwrap().result, Value::Int(43));

        let err = run("missing").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
