//! The tool facade: one call from source text to a response envelope.
//!
//! Stages run in order and the first rejection short-circuits:
//! size + blocklist validation → syntax check → compile → sandbox →
//! contract check. Every error is folded into a failure envelope; nothing
//! escapes to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::capability::CapabilityRegistry;
use crate::compiler::{self, CompiledProgram};
use crate::config::EngineConfig;
use crate::contract;
use crate::envelope::ResponseEnvelope;
use crate::error::{EngineError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::SandboxRuntime;
use crate::syntax;
use crate::validator;

/// One program submission. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    code: String,
    description: String,
    timeout: Duration,
    registry: Arc<CapabilityRegistry>,
}

impl ExecutionRequest {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// A copy of this request with a different time budget.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }
}

/// Runs agent-authored programs against a fixed set of capability modules.
#[derive(Debug, Clone)]
pub struct CodeExecutionTool {
    registry: Arc<CapabilityRegistry>,
    config: EngineConfig,
    runtime: SandboxRuntime,
}

impl CodeExecutionTool {
    pub fn new(registry: Arc<CapabilityRegistry>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let runtime = SandboxRuntime::new(registry.clone(), config.clone());
        Ok(Self {
            registry,
            config,
            runtime,
        })
    }

    /// Build with [`EngineConfig::for_registry`] defaults.
    pub fn with_defaults(registry: Arc<CapabilityRegistry>) -> Result<Self> {
        let config = EngineConfig::for_registry(&registry);
        Self::new(registry, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Bind `code` to this tool's registry and time budget.
    pub fn request(&self, code: impl Into<String>, description: impl Into<String>) -> ExecutionRequest {
        ExecutionRequest {
            code: code.into(),
            description: description.into(),
            timeout: self.config.timeout(),
            registry: self.registry.clone(),
        }
    }

    pub async fn run(&self, code: &str, description: &str) -> ResponseEnvelope {
        let request = self.request(code, description);
        self.run_request(&request).await
    }

    pub async fn run_request(&self, request: &ExecutionRequest) -> ResponseEnvelope {
        let execution_id = Uuid::new_v4().to_string();
        let span = obs::execution_span(&execution_id, request.code());
        self.run_stages(request, &execution_id).instrument(span).await
    }

    async fn run_stages(&self, request: &ExecutionRequest, execution_id: &str) -> ResponseEnvelope {
        let timeout_ms = request.timeout().as_millis() as u64;

        METRICS.inc_started();
        obs::emit_execution_started(execution_id, request.description(), timeout_ms);

        let program = match self.prepare(request.code()) {
            Ok(program) => program,
            Err(err) => return self.reject(execution_id, err, None, Vec::new()),
        };

        let result = self.runtime.execute(&program, request.timeout()).await;
        let elapsed_ms = result.elapsed_ms;
        let (outcome, console) = result.into_outcome();

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                if err.is_timeout() {
                    METRICS.inc_timeouts();
                    obs::emit_timeout(execution_id, timeout_ms);
                }
                return self.reject(execution_id, err.into(), Some(elapsed_ms), console);
            }
        };

        match contract::enforce(&value) {
            Ok(payload) => {
                METRICS.inc_succeeded();
                obs::emit_execution_finished(execution_id, elapsed_ms, true);
                ResponseEnvelope::success(payload, elapsed_ms, console)
            }
            Err(violation) => {
                METRICS.inc_contract_violations();
                self.reject(execution_id, violation.into(), Some(elapsed_ms), console)
            }
        }
    }

    /// Everything before the sandbox: validation, syntax check, compilation.
    pub fn prepare(&self, code: &str) -> Result<CompiledProgram> {
        for verdict in [
            validator::validate_size(code, self.config.max_code_bytes),
            validator::validate(code),
        ] {
            if !verdict.is_valid() {
                return Err(EngineError::Validation {
                    reason: verdict.reason.unwrap_or_default(),
                });
            }
        }

        let report = syntax::check_syntax(code);
        if !report.valid {
            return Err(EngineError::Syntax {
                diagnostics: report.diagnostics,
            });
        }

        compiler::compile(code).map_err(EngineError::from)
    }

    fn reject(
        &self,
        execution_id: &str,
        err: EngineError,
        execution_time: Option<u64>,
        console: Vec<String>,
    ) -> ResponseEnvelope {
        METRICS.inc_rejected();
        obs::emit_stage_rejected(execution_id, err.stage(), &err);
        obs::emit_execution_finished(execution_id, execution_time.unwrap_or(0), false);
        ResponseEnvelope::failure(&err, execution_time, console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureStage;

    fn tool() -> CodeExecutionTool {
        CodeExecutionTool::with_defaults(Arc::new(CapabilityRegistry::empty())).unwrap()
    }

    #[test]
    fn test_request_is_bound_to_tool() {
        let tool = tool();
        let request = tool.request("return 1;", "one");
        assert_eq!(request.code(), "return 1;");
        assert_eq!(request.description(), "one");
        assert_eq!(request.timeout(), Duration::from_millis(30_000));
        assert!(Arc::ptr_eq(request.registry(), tool.registry()));

        let shorter = request.with_timeout(Duration::from_millis(5));
        assert_eq!(shorter.timeout(), Duration::from_millis(5));
        assert_eq!(request.timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = CodeExecutionTool::new(
            Arc::new(CapabilityRegistry::empty()),
            EngineConfig::default().with_timeout_ms(0),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_prepare_stops_at_validation() {
        let err = tool().prepare("return process.env.HOME;").unwrap_err();
        assert_eq!(err.stage(), FailureStage::Validation);
    }

    #[test]
    fn test_prepare_reports_syntax_position() {
        let err = tool().prepare("const a = 1;\nconst = 2;").unwrap_err();
        match err {
            EngineError::Syntax { diagnostics } => assert_eq!(diagnostics[0].line, 2),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_rejects_oversized_code() {
        let tool = CodeExecutionTool::new(
            Arc::new(CapabilityRegistry::empty()),
            EngineConfig {
                max_code_bytes: 8,
                ..EngineConfig::default()
            },
        )
        .unwrap();
        let err = tool.prepare("return { summary: 'x', data: 1 };").unwrap_err();
        assert!(err.to_string().contains("limit is 8 bytes"));
    }

    #[test]
    fn test_prepare_compiles_clean_code() {
        let program = tool().prepare("return { summary: 'x', data: null };").unwrap();
        assert!(program.code.contains(compiler::ENTRY_FUNCTION));
    }
}
