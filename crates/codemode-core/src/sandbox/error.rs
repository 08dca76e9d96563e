//! Error types for the sandbox runtime.

use serde::{Deserialize, Serialize};

/// Why an execution inside the isolate did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Execution failed: {message}")]
    Threw { message: String },

    #[error("Execution finished without producing a result: an awaited promise never settled")]
    Unsettled,

    #[error("Execution exceeded the heap limit of {max_bytes} bytes")]
    HeapLimitExceeded { max_bytes: usize },

    #[error("Program result is larger than the {max_bytes} byte output limit")]
    OutputTooLarge { max_bytes: usize },

    #[error("Too many concurrent executions (limit {max})")]
    ConcurrencyLimit { max: usize },

    #[error("Sandbox runtime failure: {message}")]
    Runtime { message: String },
}

impl ExecutionError {
    pub fn hint(&self) -> String {
        match self {
            ExecutionError::Timeout { timeout_ms } => format!(
                "The program must finish within {timeout_ms}ms. Avoid unbounded loops, \
                 fetch less data per call, or combine requests."
            ),
            ExecutionError::Threw { .. } => "Fix the runtime error and resubmit. Only the \
                 listed capability modules can be imported, and their functions are async."
                .to_string(),
            ExecutionError::Unsettled => "Make sure every awaited promise resolves; do not \
                 await promises that are never resolved."
                .to_string(),
            ExecutionError::HeapLimitExceeded { .. } => {
                "Reduce memory use: process data incrementally and return less.".to_string()
            }
            ExecutionError::OutputTooLarge { .. } => {
                "Return a smaller `data` payload, e.g. aggregate or truncate it.".to_string()
            }
            ExecutionError::ConcurrencyLimit { .. } => {
                "The engine is busy; retry shortly.".to_string()
            }
            ExecutionError::Runtime { .. } => {
                "The sandbox failed internally; retrying may succeed.".to_string()
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_budget() {
        let err = ExecutionError::Timeout { timeout_ms: 200 };
        assert_eq!(err.to_string(), "Execution timed out after 200ms");
        assert!(err.is_timeout());
        assert!(err.hint().contains("200ms"));
    }

    #[test]
    fn test_threw_keeps_message() {
        let err = ExecutionError::Threw {
            message: "Error: boom".into(),
        };
        assert_eq!(err.to_string(), "Execution failed: Error: boom");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_value(ExecutionError::ConcurrencyLimit { max: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "concurrency_limit", "max": 2 }));
    }
}
