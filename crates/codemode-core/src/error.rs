//! Error taxonomy for the execution engine.
//!
//! Every stage of the pipeline has its own variant so the facade can report
//! which stage rejected a program and attach a stage-specific hint.

use serde::{Deserialize, Serialize};

use crate::contract::ContractViolation;
use crate::sandbox::ExecutionError;
use crate::syntax::SyntaxDiagnostic;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Validation,
    Syntax,
    Compilation,
    Execution,
    Contract,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Validation => write!(f, "validation"),
            FailureStage::Syntax => write!(f, "syntax"),
            FailureStage::Compilation => write!(f, "compilation"),
            FailureStage::Execution => write!(f, "execution"),
            FailureStage::Contract => write!(f, "contract"),
        }
    }
}

/// Errors raised while lowering TypeScript to JavaScript.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to parse program: {0}")]
    Parse(String),

    #[error("failed to transpile program: {0}")]
    Transpile(String),
}

/// Engine configuration problems.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },

    #[error("{var} is not a valid number: {value:?}")]
    InvalidNumber { var: String, value: String },
}

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Code validation failed: {reason}")]
    Validation { reason: String },

    #[error("{}", format_syntax(.diagnostics))]
    Syntax { diagnostics: Vec<SyntaxDiagnostic> },

    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error("duplicate capability module: {name}")]
    DuplicateModule { name: String },

    #[error("invalid capability fixture: {0}")]
    InvalidFixture(String),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl EngineError {
    /// The pipeline stage this error belongs to.
    ///
    /// Registry and configuration errors surface before any program is seen,
    /// so they are attributed to validation.
    pub fn stage(&self) -> FailureStage {
        match self {
            EngineError::Validation { .. }
            | EngineError::DuplicateModule { .. }
            | EngineError::InvalidFixture(_)
            | EngineError::InvalidConfig(_) => FailureStage::Validation,
            EngineError::Syntax { .. } => FailureStage::Syntax,
            EngineError::Compile(_) => FailureStage::Compilation,
            EngineError::Execution(_) => FailureStage::Execution,
            EngineError::Contract(_) => FailureStage::Contract,
        }
    }

    /// Corrective advice for the agent that submitted the program.
    pub fn hint(&self) -> String {
        match self {
            EngineError::Validation { .. } => "Remove the disallowed construct. Programs may only \
                 reach data through the provided capability modules; filesystem, subprocess, \
                 network and environment access are blocked."
                .to_string(),
            EngineError::Syntax { .. } => {
                "Fix the syntax error at the reported line and column, then resubmit.".to_string()
            }
            EngineError::Compile(_) => {
                "Simplify the TypeScript constructs used and resubmit.".to_string()
            }
            EngineError::Execution(err) => err.hint(),
            EngineError::Contract(violation) => violation.hint().to_string(),
            EngineError::DuplicateModule { .. }
            | EngineError::InvalidFixture(_)
            | EngineError::InvalidConfig(_) => {
                "The engine is misconfigured; this is not caused by the program.".to_string()
            }
        }
    }
}

fn format_syntax(diagnostics: &[SyntaxDiagnostic]) -> String {
    match diagnostics.split_first() {
        None => "Syntax error".to_string(),
        Some((first, [])) => format!("Syntax error {first}"),
        Some((first, rest)) => format!("Syntax error {first} (and {} more)", rest.len()),
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
