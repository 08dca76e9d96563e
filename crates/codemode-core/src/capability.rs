//! Capability modules — the only bridge between sandboxed programs and the host.
//!
//! A [`CapabilityModule`] is a named bundle of async functions supplied by the
//! host. Modules are collected once into an immutable [`CapabilityRegistry`]
//! which every execution shares by `Arc`. The engine never looks inside a
//! function; it only uses module and function names for allowlisting.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// A host-side callable exported by a capability module.
///
/// `args` holds the JSON-encoded positional arguments the program passed.
#[async_trait]
pub trait CapabilityFunction: Send + Sync + 'static {
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> CapabilityFunction for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        (self)(args).await
    }
}

/// Named, immutable mapping of exported function names to callables.
#[derive(Clone)]
pub struct CapabilityModule {
    name: String,
    functions: BTreeMap<String, Arc<dyn CapabilityFunction>>,
}

impl CapabilityModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: BTreeMap::new(),
        }
    }

    /// Add an exported function and return `self` (builder pattern).
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: impl CapabilityFunction,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn function(&self, name: &str) -> Option<Arc<dyn CapabilityFunction>> {
        self.functions.get(name).cloned()
    }
}

impl std::fmt::Debug for CapabilityModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityModule")
            .field("name", &self.name)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Read-only table of capability modules, keyed by module name.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    modules: BTreeMap<String, CapabilityModule>,
}

impl CapabilityRegistry {
    /// A registry exposing no modules at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    /// Build fixture modules from JSON of the form
    /// `{ "module": { "function": <canned result>, ... }, ... }`.
    ///
    /// Every fixture function ignores its arguments and returns its canned
    /// value. Used for dry runs and tests where the real modules are absent.
    pub fn from_fixtures(fixtures: &Value) -> Result<Self> {
        let modules = fixtures.as_object().ok_or_else(|| {
            EngineError::InvalidFixture("fixture root must be an object".to_string())
        })?;

        let mut builder = Self::builder();
        for (module_name, functions) in modules {
            let functions = functions.as_object().ok_or_else(|| {
                EngineError::InvalidFixture(format!(
                    "module {module_name:?} must map function names to values"
                ))
            })?;
            let mut module = CapabilityModule::new(module_name.clone());
            for (function_name, canned) in functions {
                let canned = canned.clone();
                module = module.with_function(function_name.clone(), move |_args: Vec<Value>| {
                    let canned = canned.clone();
                    async move { Ok::<_, anyhow::Error>(canned) }
                });
            }
            builder = builder.register(module)?;
        }
        Ok(builder.build())
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityModule> {
        self.modules.get(name)
    }

    /// Look up `module.function`.
    pub fn function(&self, module: &str, function: &str) -> Option<Arc<dyn CapabilityFunction>> {
        self.modules.get(module)?.function(function)
    }

    /// Module names in sorted order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// Module name → exported function names; what the isolate is told about.
    pub fn manifest(&self) -> BTreeMap<String, Vec<String>> {
        self.modules
            .iter()
            .map(|(name, module)| {
                (
                    name.clone(),
                    module.function_names().map(str::to_string).collect(),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Collects modules before the registry is frozen.
#[derive(Debug, Default)]
pub struct CapabilityRegistryBuilder {
    modules: BTreeMap<String, CapabilityModule>,
}

impl CapabilityRegistryBuilder {
    pub fn register(mut self, module: CapabilityModule) -> Result<Self> {
        if self.modules.contains_key(module.name()) {
            return Err(EngineError::DuplicateModule {
                name: module.name().to_string(),
            });
        }
        self.modules.insert(module.name().to_string(), module);
        Ok(self)
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            modules: self.modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> CapabilityModule {
        CapabilityModule::new("weather").with_function("forecast", |args: Vec<Value>| async move {
            Ok::<_, anyhow::Error>(serde_json::json!({ "city": args.first().cloned(), "temp": 21 }))
        })
    }

    #[tokio::test]
    async fn test_closure_function_is_callable() {
        let module = weather();
        let f = module.function("forecast").unwrap();
        let out = f.call(vec![serde_json::json!("Paris")]).await.unwrap();
        assert_eq!(out["city"], "Paris");
        assert_eq!(out["temp"], 21);
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let err = CapabilityRegistry::builder()
            .register(weather())
            .unwrap()
            .register(weather())
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateModule { name } if name == "weather"));
    }

    #[test]
    fn test_manifest_lists_names_only() {
        let registry = CapabilityRegistry::builder()
            .register(weather().with_function("alerts", |_args: Vec<Value>| async {
                Ok::<_, anyhow::Error>(Value::Null)
            }))
            .unwrap()
            .build();

        let manifest = registry.manifest();
        assert_eq!(
            manifest.get("weather").unwrap(),
            &vec!["alerts".to_string(), "forecast".to_string()]
        );
        assert_eq!(registry.module_names(), vec!["weather"]);
        assert!(registry.function("weather", "alerts").is_some());
        assert!(registry.function("weather", "missing").is_none());
        assert!(registry.function("stocks", "quote").is_none());
    }

    #[tokio::test]
    async fn test_from_fixtures_returns_canned_values() {
        let registry = CapabilityRegistry::from_fixtures(&serde_json::json!({
            "stocks": { "quote": { "symbol": "ACME", "price": 12.5 } },
            "news": { "headlines": ["a", "b"] }
        }))
        .unwrap();

        assert_eq!(registry.len(), 2);
        let quote = registry.function("stocks", "quote").unwrap();
        let out = quote.call(vec![serde_json::json!("ignored")]).await.unwrap();
        assert_eq!(out["price"], 12.5);
    }

    #[test]
    fn test_from_fixtures_rejects_bad_shapes() {
        assert!(matches!(
            CapabilityRegistry::from_fixtures(&serde_json::json!([1, 2])),
            Err(EngineError::InvalidFixture(_))
        ));
        assert!(matches!(
            CapabilityRegistry::from_fixtures(&serde_json::json!({ "stocks": 3 })),
            Err(EngineError::InvalidFixture(_))
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = CapabilityRegistry::empty();
        assert!(registry.is_empty());
        assert!(registry.module_names().is_empty());
    }
}
