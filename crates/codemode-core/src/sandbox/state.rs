//! Execution lifecycle and the record returned by the runtime.

use serde::{Deserialize, Serialize};

use super::error::ExecutionError;
use crate::serializer::SerializedValue;

/// `Idle → Running → {TimedOut | Threw | ReturnedValue}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    TimedOut,
    Threw,
    ReturnedValue,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::TimedOut | ExecutionState::Threw | ExecutionState::ReturnedValue
        )
    }

    pub fn can_advance_to(self, next: ExecutionState) -> bool {
        matches!(
            (self, next),
            (ExecutionState::Idle, ExecutionState::Running)
                | (
                    ExecutionState::Running,
                    ExecutionState::TimedOut | ExecutionState::Threw | ExecutionState::ReturnedValue
                )
        )
    }

    /// Move to `next` if the transition is legal, otherwise stay put.
    pub fn advance(self, next: ExecutionState) -> ExecutionState {
        if self.can_advance_to(next) {
            tracing::trace!(from = ?self, to = ?next, "sandbox: state transition");
            next
        } else {
            tracing::warn!(from = ?self, to = ?next, "sandbox: illegal state transition ignored");
            self
        }
    }

    /// Terminal state for a finished run.
    pub fn settled(outcome: &Result<SerializedValue, ExecutionError>) -> ExecutionState {
        match outcome {
            Ok(_) => ExecutionState::ReturnedValue,
            Err(ExecutionError::Timeout { .. }) => ExecutionState::TimedOut,
            Err(_) => ExecutionState::Threw,
        }
    }
}

/// What one sandboxed execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<SerializedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_output: Vec<String>,
    pub state: ExecutionState,
}

impl SandboxResult {
    pub(crate) fn finished(
        outcome: Result<SerializedValue, ExecutionError>,
        elapsed_ms: u64,
        console_output: Vec<String>,
        state: ExecutionState,
    ) -> Self {
        match outcome {
            Ok(value) => Self {
                success: true,
                value: Some(value),
                error: None,
                elapsed_ms,
                console_output,
                state,
            },
            Err(error) => Self {
                success: false,
                value: None,
                error: Some(error),
                elapsed_ms,
                console_output,
                state,
            },
        }
    }

    /// Split into the outcome and the captured console lines.
    pub fn into_outcome(self) -> (Result<SerializedValue, ExecutionError>, Vec<String>) {
        let outcome = match (self.value, self.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => Err(ExecutionError::Unsettled),
        };
        (outcome, self.console_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let state = ExecutionState::Idle.advance(ExecutionState::Running);
        assert_eq!(state, ExecutionState::Running);
        let state = state.advance(ExecutionState::ReturnedValue);
        assert_eq!(state, ExecutionState::ReturnedValue);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        for terminal in [
            ExecutionState::TimedOut,
            ExecutionState::Threw,
            ExecutionState::ReturnedValue,
        ] {
            assert_eq!(terminal.advance(ExecutionState::Running), terminal);
            assert_eq!(terminal.advance(ExecutionState::Threw), terminal);
        }
        assert_eq!(
            ExecutionState::Idle.advance(ExecutionState::ReturnedValue),
            ExecutionState::Idle
        );
    }

    #[test]
    fn test_settled_state_for_outcome() {
        assert_eq!(
            ExecutionState::settled(&Ok(SerializedValue::Undefined)),
            ExecutionState::ReturnedValue
        );
        assert_eq!(
            ExecutionState::settled(&Err(ExecutionError::Timeout { timeout_ms: 1 })),
            ExecutionState::TimedOut
        );
        assert_eq!(
            ExecutionState::settled(&Err(ExecutionError::Unsettled)),
            ExecutionState::Threw
        );
    }

    #[test]
    fn test_into_outcome() {
        let result = SandboxResult::finished(
            Err(ExecutionError::Unsettled),
            5,
            vec!["hi".into()],
            ExecutionState::Threw,
        );
        assert!(!result.success);
        let (outcome, console) = result.into_outcome();
        assert_eq!(outcome, Err(ExecutionError::Unsettled));
        assert_eq!(console, vec!["hi"]);
    }
}
