//! Engine configuration: time budget and resource limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityRegistry;
use crate::error::ConfigError;

/// Default budget when at most one capability module is exposed.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default budget when several bundled modules are exposed.
pub const BUNDLED_TIMEOUT_MS: u64 = 60_000;

/// Configuration bound to an engine instance at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock budget for a single execution (milliseconds).
    pub timeout_ms: u64,
    /// Largest accepted program, in bytes of source text.
    pub max_code_bytes: usize,
    /// V8 heap ceiling per isolate.
    pub max_heap_bytes: usize,
    /// Largest serialized result accepted from a program.
    pub max_output_bytes: usize,
    /// Isolates allowed to run at the same time.
    pub max_concurrent: usize,
    /// Console lines kept per execution; later lines are dropped.
    pub max_console_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_code_bytes: 64 * 1024,
            max_heap_bytes: 64 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            max_concurrent: 8,
            max_console_lines: 200,
        }
    }
}

impl EngineConfig {
    /// Defaults sized for the given registry: single-module setups get the
    /// short budget, bundles of several modules get the long one.
    pub fn for_registry(registry: &CapabilityRegistry) -> Self {
        let timeout_ms = if registry.len() > 1 {
            BUNDLED_TIMEOUT_MS
        } else {
            DEFAULT_TIMEOUT_MS
        };
        Self {
            timeout_ms,
            ..Self::default()
        }
    }

    /// Builder-style override of the time budget.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Overlay `CODEMODE_*` environment variables onto `self`.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_lookup(|var| std::env::var(var).ok())
    }

    /// Overlay values produced by `lookup` (keyed by environment variable name).
    pub fn apply_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "CODEMODE_TIMEOUT_MS")? {
            self.timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CODEMODE_MAX_CODE_BYTES")? {
            self.max_code_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, "CODEMODE_MAX_HEAP_BYTES")? {
            self.max_heap_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, "CODEMODE_MAX_OUTPUT_BYTES")? {
            self.max_output_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, "CODEMODE_MAX_CONCURRENT")? {
            self.max_concurrent = v;
        }
        if let Some(v) = parse_var(&lookup, "CODEMODE_MAX_CONSOLE_LINES")? {
            self.max_console_lines = v;
        }
        Ok(self)
    }

    /// Reject limits that would make every execution fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("timeout_ms", self.timeout_ms as usize),
            ("max_code_bytes", self.max_code_bytes),
            ("max_heap_bytes", self.max_heap_bytes),
            ("max_output_bytes", self.max_output_bytes),
            ("max_concurrent", self.max_concurrent),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                var: var.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::capability::CapabilityModule;

    #[test]
    fn test_engine_config_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(cfg.max_code_bytes, 64 * 1024);
        assert_eq!(cfg.max_concurrent, 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_for_registry_picks_budget() {
        let single = CapabilityRegistry::builder()
            .register(CapabilityModule::new("weather"))
            .unwrap()
            .build();
        assert_eq!(EngineConfig::for_registry(&single).timeout_ms, 30_000);

        let bundle = CapabilityRegistry::builder()
            .register(CapabilityModule::new("weather"))
            .unwrap()
            .register(CapabilityModule::new("stocks"))
            .unwrap()
            .build();
        assert_eq!(EngineConfig::for_registry(&bundle).timeout_ms, 60_000);
    }

    #[test]
    fn test_apply_lookup_overlays_values() {
        let vars: HashMap<&str, &str> = [
            ("CODEMODE_TIMEOUT_MS", "1500"),
            ("CODEMODE_MAX_CONCURRENT", " 2 "),
        ]
        .into_iter()
        .collect();

        let cfg = EngineConfig::default()
            .apply_lookup(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.timeout_ms, 1500);
        assert_eq!(cfg.max_concurrent, 2);
        assert_eq!(cfg.max_code_bytes, 64 * 1024);
    }

    #[test]
    fn test_apply_lookup_rejects_garbage() {
        let err = EngineConfig::default()
            .apply_lookup(|k| (k == "CODEMODE_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "CODEMODE_TIMEOUT_MS".into(),
                value: "soon".into(),
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let cfg = EngineConfig::default().with_timeout_ms(0);
        assert_eq!(
            cfg.validate().unwrap_err(),
            ConfigError::ZeroLimit {
                field: "timeout_ms"
            }
        );
    }

    #[test]
    fn test_toml_partial_config_uses_defaults() {
        let cfg: EngineConfig = toml::from_str("timeout_ms = 200\nmax_console_lines = 5\n").unwrap();
        assert_eq!(cfg.timeout_ms, 200);
        assert_eq!(cfg.max_console_lines, 5);
        assert_eq!(cfg.max_heap_bytes, 64 * 1024 * 1024);
    }
}
