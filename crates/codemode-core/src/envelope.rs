//! Outward-facing response records, serialized in camelCase.

use serde::{Deserialize, Serialize};

use crate::contract::ContractPayload;
use crate::error::{EngineError, FailureStage};

/// Either a contract-conforming result or a failure with a corrective hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success(SuccessEnvelope),
    Failure(FailureEnvelope),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEnvelope {
    pub success: bool,
    pub result: ContractPayload,
    /// Milliseconds spent in the sandbox.
    pub execution_time: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub success: bool,
    pub error: String,
    /// Absent when the program was rejected before it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_output: Vec<String>,
    pub hint: String,
    pub stage: FailureStage,
}

impl ResponseEnvelope {
    pub fn success(result: ContractPayload, execution_time: u64, console_output: Vec<String>) -> Self {
        ResponseEnvelope::Success(SuccessEnvelope {
            success: true,
            result,
            execution_time,
            console_output,
        })
    }

    pub fn failure(
        error: &EngineError,
        execution_time: Option<u64>,
        console_output: Vec<String>,
    ) -> Self {
        ResponseEnvelope::Failure(FailureEnvelope {
            success: false,
            error: error.to_string(),
            execution_time,
            console_output,
            hint: error.hint(),
            stage: error.stage(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success(_))
    }

    pub fn as_success(&self) -> Option<&SuccessEnvelope> {
        match self {
            ResponseEnvelope::Success(success) => Some(success),
            ResponseEnvelope::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&FailureEnvelope> {
        match self {
            ResponseEnvelope::Failure(failure) => Some(failure),
            ResponseEnvelope::Success(_) => None,
        }
    }

    pub fn execution_time(&self) -> Option<u64> {
        match self {
            ResponseEnvelope::Success(success) => Some(success.execution_time),
            ResponseEnvelope::Failure(failure) => failure.execution_time,
        }
    }

    pub fn console_output(&self) -> &[String] {
        match self {
            ResponseEnvelope::Success(success) => &success.console_output,
            ResponseEnvelope::Failure(failure) => &failure.console_output,
        }
    }
}
