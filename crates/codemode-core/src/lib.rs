//! codemode core library
//!
//! Runs short, agent-authored TypeScript programs in a fresh V8 isolate that
//! can only reach the host through pre-approved capability modules, and
//! returns a `{ summary, data }` result inside a uniform response envelope.
//!
//! ```ignore
//! let registry = Arc::new(CapabilityRegistry::from_fixtures(&fixtures)?);
//! let tool = CodeExecutionTool::with_defaults(registry)?;
//! let envelope = tool.run(code, "fetch the forecast").await;
//! ```

pub mod capability;
pub mod compiler;
pub mod config;
pub mod contract;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod obs;
pub mod sandbox;
pub mod serializer;
pub mod syntax;
pub mod telemetry;
pub mod validator;

pub use capability::{CapabilityFunction, CapabilityModule, CapabilityRegistry};
pub use compiler::{compile, CompiledProgram};
pub use config::EngineConfig;
pub use contract::{ContractPayload, ContractViolation};
pub use envelope::{FailureEnvelope, ResponseEnvelope, SuccessEnvelope};
pub use error::{CompileError, ConfigError, EngineError, FailureStage, Result};
pub use facade::{CodeExecutionTool, ExecutionRequest};
pub use sandbox::{ExecutionError, ExecutionState, SandboxResult, SandboxRuntime};
pub use serializer::{serialize, SerializedValue};
pub use syntax::{check_syntax, SyntaxDiagnostic, SyntaxReport};
pub use telemetry::init_tracing;
pub use validator::{validate, ValidationVerdict};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
