//! Sandbox runtime: isolated execution of compiled programs.
//!
//! Each execution gets a fresh `deno_core` isolate whose only reach into the
//! host is a closed `require` over the capability registry, a capturing
//! `console`, and timers. `eval`, the `Function` constructors, `WebAssembly`
//! and the `Deno` namespace are removed before the program runs.
//!
//! # Modules
//!
//! - [`runtime`] — `SandboxRuntime::execute()` (thread, watchdog, heap limit)
//! - [`state`]   — `ExecutionState` lifecycle and `SandboxResult`
//! - [`error`]   — `ExecutionError`
//! - `ops`       — host ops and per-isolate state

pub mod error;
mod ops;
pub mod runtime;
pub mod state;

pub use error::ExecutionError;
pub use runtime::{SandboxRuntime, TERMINATION_GRACE};
pub use state::{ExecutionState, SandboxResult};
