//! The output contract: every program must return `{ summary, data }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serializer::SerializedValue;

/// Validated program output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractPayload {
    pub summary: String,
    pub data: Value,
}

/// Ways a result can fail the contract, checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("Program must return an object {{summary, data}}; received no value.")]
    NoValue,

    #[error("Program must return an object shaped {{summary, data}}.")]
    NotAnObject,

    #[error("Program result is missing string `summary` field.")]
    MissingSummary,

    #[error("Program result is missing `data` field.")]
    MissingData,
}

impl ContractViolation {
    pub fn hint(&self) -> &'static str {
        match self {
            ContractViolation::NoValue => {
                "End the program with `return { summary: \"...\", data: ... };`."
            }
            ContractViolation::NotAnObject => {
                "Wrap the result: `return { summary: \"one-line description\", data: result };`."
            }
            ContractViolation::MissingSummary => {
                "Add a `summary` string describing the result in one sentence."
            }
            ContractViolation::MissingData => {
                "Add a `data` field holding the result; use `data: null` when there is none."
            }
        }
    }
}

/// Check a serialized result against the contract, first violation wins.
pub fn enforce(value: &SerializedValue) -> Result<ContractPayload, ContractViolation> {
    let object = match value {
        SerializedValue::Undefined => return Err(ContractViolation::NoValue),
        SerializedValue::Text(_) => return Err(ContractViolation::NotAnObject),
        SerializedValue::Json(Value::Object(object)) => object,
        SerializedValue::Json(_) => return Err(ContractViolation::NotAnObject),
    };

    let summary = match object.get("summary") {
        Some(Value::String(summary)) => summary.clone(),
        _ => return Err(ContractViolation::MissingSummary),
    };
    let data = object
        .get("data")
        .cloned()
        .ok_or(ContractViolation::MissingData)?;

    Ok(ContractPayload { summary, data })
}
