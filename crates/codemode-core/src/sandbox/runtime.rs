//! One fresh V8 isolate per execution.
//!
//! V8 isolates are `!Send`, so every run gets a dedicated OS thread with a
//! current-thread tokio runtime; the caller awaits a oneshot reply. Three
//! guards bound a run:
//! - a watchdog thread terminates the isolate when the budget elapses, which
//!   also stops CPU-bound loops;
//! - a near-heap-limit callback terminates it before V8 aborts the process;
//! - the caller stops waiting at `timeout + TERMINATION_GRACE` and abandons
//!   the thread if termination did not take.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};

use super::error::ExecutionError;
use super::ops::{codemode_sandbox, ConsoleBuffer, Settlement, SettledSignal};
use super::state::{ExecutionState, SandboxResult};
use crate::capability::CapabilityRegistry;
use crate::compiler::{CompiledProgram, ENTRY_FUNCTION};
use crate::config::EngineConfig;
use crate::serializer::{decode_settlement, SerializedValue};

/// How long the caller waits past the budget for the isolate to report back.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(250);

const BOOTSTRAP_JS: &str = include_str!("bootstrap.js");

/// Executes compiled programs against a fixed capability registry.
#[derive(Debug, Clone)]
pub struct SandboxRuntime {
    registry: Arc<CapabilityRegistry>,
    manifest_json: Arc<str>,
    config: EngineConfig,
    slots: Arc<Semaphore>,
}

/// Everything the isolate thread needs, owned.
struct IsolateJob {
    script: String,
    registry: Arc<CapabilityRegistry>,
    manifest_json: Arc<str>,
    timeout: Duration,
    max_heap_bytes: usize,
    max_output_bytes: usize,
    max_console_lines: usize,
}

struct IsolateReport {
    outcome: Result<SerializedValue, ExecutionError>,
    console: Vec<String>,
}

impl IsolateReport {
    fn failed(error: ExecutionError) -> Self {
        Self {
            outcome: Err(error),
            console: Vec::new(),
        }
    }
}

impl SandboxRuntime {
    pub fn new(registry: Arc<CapabilityRegistry>, config: EngineConfig) -> Self {
        let manifest_json = serde_json::to_string(&registry.manifest())
            .unwrap_or_else(|_| "{}".to_string())
            .into();
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            registry,
            manifest_json,
            config,
            slots,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `program` in a fresh isolate and report what it produced.
    ///
    /// Never returns later than `timeout + TERMINATION_GRACE`.
    pub async fn execute(&self, program: &CompiledProgram, timeout: Duration) -> SandboxResult {
        let started = Instant::now();

        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(max = self.config.max_concurrent, "sandbox: no free isolate slot");
                return SandboxResult::finished(
                    Err(ExecutionError::ConcurrencyLimit {
                        max: self.config.max_concurrent,
                    }),
                    0,
                    Vec::new(),
                    ExecutionState::Idle,
                );
            }
        };

        let state = ExecutionState::Idle.advance(ExecutionState::Running);
        let job = IsolateJob {
            script: format!("{}\n__codemodeRun({ENTRY_FUNCTION});\n", program.code),
            registry: self.registry.clone(),
            manifest_json: self.manifest_json.clone(),
            timeout,
            max_heap_bytes: self.config.max_heap_bytes,
            max_output_bytes: self.config.max_output_bytes,
            max_console_lines: self.config.max_console_lines,
        };

        let report = match spawn_isolate(job, permit) {
            Err(error) => IsolateReport::failed(error),
            Ok(rx) => match tokio::time::timeout(timeout + TERMINATION_GRACE, rx).await {
                Ok(Ok(report)) => report,
                Ok(Err(_)) => IsolateReport::failed(ExecutionError::Runtime {
                    message: "isolate thread exited without reporting".to_string(),
                }),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "sandbox: isolate ignored termination, abandoning its thread"
                    );
                    IsolateReport::failed(ExecutionError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let state = state.advance(ExecutionState::settled(&report.outcome));
        tracing::debug!(elapsed_ms, state = ?state, "sandbox: execution finished");
        SandboxResult::finished(report.outcome, elapsed_ms, report.console, state)
    }
}

/// Start the isolate thread. The permit is held until the thread ends, so an
/// abandoned isolate keeps occupying its slot.
fn spawn_isolate(
    job: IsolateJob,
    permit: OwnedSemaphorePermit,
) -> Result<oneshot::Receiver<IsolateReport>, ExecutionError> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("codemode-isolate".to_string())
        .spawn(move || {
            let _permit = permit;
            let report = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(run_isolate(job)),
                Err(e) => IsolateReport::failed(ExecutionError::Runtime {
                    message: format!("failed to start isolate runtime: {e}"),
                }),
            };
            if tx.send(report).is_err() {
                tracing::warn!("sandbox: result receiver dropped before the isolate reported");
            }
        })
        .map_err(|e| ExecutionError::Runtime {
            message: format!("failed to spawn isolate thread: {e}"),
        })?;
    Ok(rx)
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates execution and grants 1 MiB so the termination can unwind.
extern "C" fn near_heap_limit_callback(
    data: *mut c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the boxed `HeapLimitState` created in
    // `run_isolate`, which drops the runtime before the box.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

fn create_runtime(job: &IsolateJob, settled: &SettledSignal) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, job.max_heap_bytes);
    let runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![codemode_sandbox::init()],
        create_params: Some(create_params),
        ..Default::default()
    });

    {
        let op_state = runtime.op_state();
        let mut op_state = op_state.borrow_mut();
        op_state.put(job.registry.clone());
        op_state.put(ConsoleBuffer::new(job.max_console_lines));
        op_state.put(Settlement::default());
        op_state.put(settled.clone());
    }
    runtime
}

/// Runs on the isolate thread.
async fn run_isolate(job: IsolateJob) -> IsolateReport {
    let settled: SettledSignal = std::rc::Rc::new(Notify::new());
    let mut runtime = create_runtime(&job, &settled);

    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut c_void,
    );

    let outcome = match install_bootstrap(&mut runtime, &job.manifest_json) {
        Ok(()) => run_program(&mut runtime, &job, &settled, &heap_state).await,
        Err(error) => Err(error),
    };

    let console = runtime
        .op_state()
        .borrow_mut()
        .try_take::<ConsoleBuffer>()
        .map(ConsoleBuffer::into_lines)
        .unwrap_or_default();

    // The heap callback must not outlive its state.
    drop(runtime);
    drop(heap_state);

    IsolateReport { outcome, console }
}

fn install_bootstrap(runtime: &mut JsRuntime, manifest_json: &str) -> Result<(), ExecutionError> {
    let script = format!("({BOOTSTRAP_JS})(Deno.core.ops, {manifest_json});");
    runtime
        .execute_script("[codemode:bootstrap]", script)
        .map(|_| ())
        .map_err(|e| ExecutionError::Runtime {
            message: format!("bootstrap failed: {e}"),
        })
}

async fn run_program(
    runtime: &mut JsRuntime,
    job: &IsolateJob,
    settled: &SettledSignal,
    heap_state: &HeapLimitState,
) -> Result<SerializedValue, ExecutionError> {
    let deadline = Instant::now() + job.timeout;

    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_flag = timed_out.clone();
    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timeout = job.timeout;
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = std::thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_flag.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    let script_error = match runtime.execute_script("[codemode:program]", job.script.clone()) {
        Err(e) => Some(e.to_string()),
        Ok(_) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                polled = tokio::time::timeout(
                    remaining,
                    runtime.run_event_loop(PollEventLoopOptions::default()),
                ) => match polled {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => {
                        timed_out.store(true, Ordering::SeqCst);
                        None
                    }
                },
                _ = settled.notified() => None,
            }
        }
    };

    // Join the watchdog before the isolate handle can go away.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(ExecutionError::HeapLimitExceeded {
            max_bytes: job.max_heap_bytes,
        });
    }

    let settlement = runtime.op_state().borrow_mut().borrow_mut::<Settlement>().take();
    match settlement {
        Some(Ok(payload)) => {
            if payload.len() > job.max_output_bytes {
                return Err(ExecutionError::OutputTooLarge {
                    max_bytes: job.max_output_bytes,
                });
            }
            decode_settlement(&payload).map_err(|e| ExecutionError::Runtime {
                message: format!("malformed program result: {e}"),
            })
        }
        Some(Err(message)) => Err(ExecutionError::Threw { message }),
        None if timed_out.load(Ordering::SeqCst) => Err(ExecutionError::Timeout {
            timeout_ms: job.timeout.as_millis() as u64,
        }),
        None => match script_error {
            Some(message) => Err(ExecutionError::Threw { message }),
            None => Err(ExecutionError::Unsettled),
        },
    }
}
