//! Tool bindings: named external services whose declared operations the agent may call.
//!
//! A binding pairs operation descriptors (name, description, JSON-schema
//! parameters) with a [`CapabilityExecutor`]. The registry exposes every
//! operation to the model as `{binding}__{operation}` and routes calls back to
//! the owning executor.

mod http;

use crate::config::{resolve_tool_token, ToolBindingConfig};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub use http::HttpToolExecutor;

const WIRE_SEPARATOR: &str = "__";
const MAX_WIRE_NAME_LEN: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid tool binding: {0}")]
    InvalidBinding(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool {tool} failed: {message}")]
    Failed { tool: String, message: String },
}

/// Declared operation of a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

/// Runs operations of one external service.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn invoke(&self, operation: &str, arguments: &Value) -> Result<Value, String>;
}

/// A named service binding: declared surface plus the executor behind it.
#[derive(Clone)]
pub struct ToolBinding {
    pub name: String,
    pub description: Option<String>,
    pub operations: Vec<OperationDescriptor>,
    pub executor: Arc<dyn CapabilityExecutor>,
}

impl ToolBinding {
    fn wire_name(&self, op: &OperationDescriptor) -> String {
        format!("{}{}{}", self.name, WIRE_SEPARATOR, op.name)
    }
}

/// Registry of tool bindings, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    bindings: Vec<ToolBinding>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(WIRE_SEPARATOR)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP-backed bindings from config.
    pub fn from_config(bindings: &[ToolBindingConfig]) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for b in bindings {
            let executor = HttpToolExecutor::new(&b.base_url, resolve_tool_token(b));
            registry.register(ToolBinding {
                name: b.name.clone(),
                description: b.description.clone(),
                operations: b
                    .operations
                    .iter()
                    .map(|op| OperationDescriptor {
                        name: op.name.clone(),
                        description: op.description.clone(),
                        parameters: op.parameters.clone(),
                    })
                    .collect(),
                executor: Arc::new(executor),
            })?;
        }
        Ok(registry)
    }

    /// Add a binding. Names must be `[A-Za-z0-9_-]` without `__`; binding names are unique.
    pub fn register(&mut self, binding: ToolBinding) -> Result<(), ToolError> {
        if !valid_name(&binding.name) {
            return Err(ToolError::InvalidBinding(format!("bad binding name {:?}", binding.name)));
        }
        if self.bindings.iter().any(|b| b.name == binding.name) {
            return Err(ToolError::InvalidBinding(format!("duplicate binding {}", binding.name)));
        }
        for op in &binding.operations {
            if !valid_name(&op.name) {
                return Err(ToolError::InvalidBinding(format!(
                    "bad operation name {:?} in {}",
                    op.name, binding.name
                )));
            }
            if binding.wire_name(op).len() > MAX_WIRE_NAME_LEN {
                return Err(ToolError::InvalidBinding(format!(
                    "{} is longer than {} characters",
                    binding.wire_name(op),
                    MAX_WIRE_NAME_LEN
                )));
            }
        }
        if binding.operations.is_empty() {
            log::warn!("tools: binding {} declares no operations", binding.name);
        }
        log::info!(
            "tools: registered {} ({} operation(s))",
            binding.name,
            binding.operations.len()
        );
        self.bindings.push(binding);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.iter().all(|b| b.operations.is_empty())
    }

    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.name.as_str())
    }

    /// Function definitions for every declared operation.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.bindings
            .iter()
            .flat_map(|b| {
                b.operations.iter().map(move |op| {
                    let description = match (&b.description, &op.description) {
                        (Some(service), Some(op_desc)) => Some(format!("{} ({})", op_desc, service)),
                        (None, Some(op_desc)) => Some(op_desc.clone()),
                        (Some(service), None) => Some(service.clone()),
                        (None, None) => None,
                    };
                    ToolDefinition::function(b.wire_name(op), description, op.parameters.clone())
                })
            })
            .collect()
    }

    fn resolve(&self, wire_name: &str) -> Option<(&ToolBinding, &OperationDescriptor)> {
        let (binding, op) = wire_name.split_once(WIRE_SEPARATOR)?;
        let binding = self.bindings.iter().find(|b| b.name == binding)?;
        let op = binding.operations.iter().find(|o| o.name == op)?;
        Some((binding, op))
    }

    /// Execute a call by wire name after checking it against the declared parameters.
    pub async fn execute(&self, wire_name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let (binding, op) = self
            .resolve(wire_name)
            .ok_or_else(|| ToolError::UnknownTool(wire_name.to_string()))?;
        let arguments = normalize_arguments(arguments);
        check_arguments(&op.parameters, &arguments).map_err(|message| ToolError::InvalidArguments {
            tool: wire_name.to_string(),
            message,
        })?;
        log::debug!("tools: invoking {}", wire_name);
        binding
            .executor
            .invoke(&op.name, &arguments)
            .await
            .map_err(|message| ToolError::Failed {
                tool: wire_name.to_string(),
                message,
            })
    }
}

/// Models sometimes send no arguments for parameterless calls.
fn normalize_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

/// Shallow schema check: an object schema needs an object with every `required` key present.
fn check_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Ok(());
    }
    let obj = arguments
        .as_object()
        .ok_or_else(|| "arguments must be an object".to_string())?;
    let missing: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|req| {
            req.iter()
                .filter_map(Value::as_str)
                .filter(|k| !obj.contains_key(*k))
                .collect()
        })
        .unwrap_or_default();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing {}", missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl CapabilityExecutor for Recorder {
        async fn invoke(&self, operation: &str, arguments: &Value) -> Result<Value, String> {
            self.calls
                .lock()
                .unwrap()
                .push((operation.to_string(), arguments.clone()));
            if operation == "explode" {
                return Err("boom".to_string());
            }
            Ok(json!({"ok": true}))
        }
    }

    fn binding(executor: Arc<Recorder>) -> ToolBinding {
        ToolBinding {
            name: "tickets".to_string(),
            description: Some("Ticket tracker".to_string()),
            operations: vec![
                OperationDescriptor {
                    name: "search".to_string(),
                    description: Some("Search tickets".to_string()),
                    parameters: json!({
                        "type": "object",
                        "required": ["query"],
                        "properties": {"query": {"type": "string"}}
                    }),
                },
                OperationDescriptor {
                    name: "explode".to_string(),
                    description: None,
                    parameters: json!({"type": "object", "properties": {}}),
                },
            ],
            executor,
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn definitions_use_binding_prefixed_names() {
        let mut registry = ToolRegistry::new();
        registry.register(binding(recorder())).unwrap();
        let defs = registry.definitions();
        let names: Vec<_> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(names, vec!["tickets__search", "tickets__explode"]);
        assert_eq!(
            defs[0].function.description.as_deref(),
            Some("Search tickets (Ticket tracker)")
        );
        assert_eq!(defs[1].function.description.as_deref(), Some("Ticket tracker"));
    }

    #[test]
    fn rejects_duplicate_and_malformed_bindings() {
        let mut registry = ToolRegistry::new();
        registry.register(binding(recorder())).unwrap();
        assert!(matches!(
            registry.register(binding(recorder())),
            Err(ToolError::InvalidBinding(_))
        ));
        let mut bad = binding(recorder());
        bad.name = "my tool".to_string();
        assert!(registry.register(bad).is_err());
        let mut sneaky = binding(recorder());
        sneaky.name = "a__b".to_string();
        assert!(registry.register(sneaky).is_err());
    }

    #[tokio::test]
    async fn execute_routes_to_the_owning_executor() {
        let rec = recorder();
        let mut registry = ToolRegistry::new();
        registry.register(binding(rec.clone())).unwrap();
        let out = registry
            .execute("tickets__search", &json!({"query": "flaky"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"ok": true}));
        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls[0], ("search".to_string(), json!({"query": "flaky"})));
    }

    #[tokio::test]
    async fn execute_checks_names_arguments_and_failures() {
        let mut registry = ToolRegistry::new();
        registry.register(binding(recorder())).unwrap();
        assert_eq!(
            registry.execute("tickets__close", &json!({})).await,
            Err(ToolError::UnknownTool("tickets__close".to_string()))
        );
        assert!(matches!(
            registry.execute("tickets__search", &json!({})).await,
            Err(ToolError::InvalidArguments { ref message, .. }) if message == "missing query"
        ));
        assert!(matches!(
            registry.execute("tickets__explode", &Value::Null).await,
            Err(ToolError::Failed { ref message, .. }) if message == "boom"
        ));
    }

    #[test]
    fn empty_registry_has_no_definitions() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.definitions().is_empty());
    }
}
