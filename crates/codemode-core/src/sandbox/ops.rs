//! Host ops exposed to the isolate, and the per-isolate state they touch.
//!
//! Ops never throw into JavaScript. Capability calls reply with a JSON
//! envelope, `{"ok": value}` or `{"error": message}`, which the bootstrap
//! turns into a resolved value or a rejected promise.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use deno_core::{op2, OpState};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::capability::CapabilityRegistry;
use crate::metrics::METRICS;

/// Console lines captured from the program, capped at `max_lines`.
#[derive(Debug)]
pub(crate) struct ConsoleBuffer {
    lines: Vec<String>,
    max_lines: usize,
    dropped: usize,
}

impl ConsoleBuffer {
    pub(crate) fn new(max_lines: usize) -> Self {
        Self {
            lines: Vec::new(),
            max_lines,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, level: &str, line: String) {
        if self.lines.len() >= self.max_lines {
            self.dropped += 1;
            return;
        }
        let line = match level {
            "log" => line,
            other => format!("[{other}] {line}"),
        };
        self.lines.push(line);
    }

    pub(crate) fn into_lines(mut self) -> Vec<String> {
        if self.dropped > 0 {
            self.lines
                .push(format!("... {} more console lines dropped", self.dropped));
        }
        self.lines
    }
}

/// The program's single outcome: `Ok(encoded value)` or `Err(message)`.
#[derive(Debug, Default)]
pub(crate) struct Settlement {
    outcome: Option<Result<String, String>>,
}

impl Settlement {
    /// Record the outcome. Only the first call has an effect.
    pub(crate) fn settle(&mut self, outcome: Result<String, String>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    pub(crate) fn take(&mut self) -> Option<Result<String, String>> {
        self.outcome.take()
    }
}

/// Wakes the host once the program has settled.
pub(crate) type SettledSignal = Rc<Notify>;

#[op2(async)]
#[string]
pub(crate) async fn op_codemode_call(
    state: Rc<RefCell<OpState>>,
    #[string] module: String,
    #[string] function: String,
    #[string] args: String,
) -> String {
    let registry = state.borrow().borrow::<Arc<CapabilityRegistry>>().clone();
    let reply = match invoke(&registry, &module, &function, &args).await {
        Ok(value) => json!({ "ok": value }),
        Err(message) => json!({ "error": message }),
    };
    reply.to_string()
}

async fn invoke(
    registry: &CapabilityRegistry,
    module: &str,
    function: &str,
    args: &str,
) -> Result<Value, String> {
    let callable = registry
        .function(module, function)
        .ok_or_else(|| format!("{module}.{function} is not an exported function"))?;
    let args: Vec<Value> = serde_json::from_str(args)
        .map_err(|e| format!("arguments to {module}.{function} are not valid JSON: {e}"))?;

    METRICS.inc_capability_calls();
    tracing::debug!(module, function, argc = args.len(), "sandbox: capability call");

    callable.call(args).await.map_err(|e| {
        tracing::debug!(module, function, error = %e, "sandbox: capability call failed");
        format!("{module}.{function} failed: {e}")
    })
}

#[op2]
pub(crate) fn op_codemode_console(
    state: &mut OpState,
    #[string] level: String,
    #[string] line: String,
) {
    state.borrow_mut::<ConsoleBuffer>().push(&level, line);
}

#[op2]
pub(crate) fn op_codemode_settle(state: &mut OpState, ok: bool, #[string] payload: String) {
    let outcome = if ok { Ok(payload) } else { Err(payload) };
    if state.borrow_mut::<Settlement>().settle(outcome) {
        state.borrow::<SettledSignal>().notify_one();
    } else {
        tracing::warn!("sandbox: program tried to settle twice");
    }
}

#[op2(async)]
pub(crate) async fn op_codemode_sleep(millis: u32) {
    tokio::time::sleep(Duration::from_millis(u64::from(millis))).await;
}

deno_core::extension!(
    codemode_sandbox,
    ops = [
        op_codemode_call,
        op_codemode_console,
        op_codemode_settle,
        op_codemode_sleep,
    ],
);
