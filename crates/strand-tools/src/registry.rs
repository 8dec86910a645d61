use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use strand_core::error::{Result, StrandError};
use strand_core::tool::ToolDescriptor;
use strand_core::traits::{Tool, ToolOutput};

/// Registry of available tools.
///
/// Populated once, then shared as `Arc<ToolRegistry>`; lookups need no lock.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.descriptor().name;
        self.tools.insert(name, Arc::new(tool));
    }

    /// Builder-style `register`.
    pub fn with_tool(mut self, tool: impl Tool) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tools, sorted by name.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Descriptors for every registered tool.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Descriptors for the named tools only; unknown names are skipped.
    pub fn descriptors_for(&self, names: &[String]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.descriptor())
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| StrandError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = name, "Executing tool");

        match tokio::time::timeout(timeout, tool.execute(args)).await {
            Ok(result) => result,
            Err(_) => Err(StrandError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::SayToUserTool);
        registry.register(crate::builtin::ExitTool);
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode tool arguments, reporting failures as validation errors.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: serde_json::Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| StrandError::ToolValidation(format!("{}: {}", tool, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_test_utils::{AddTool, EchoTool, SlowTool};

    #[test]
    fn register_and_list() {
        let registry = ToolRegistry::new().with_tool(EchoTool).with_tool(AddTool);
        assert_eq!(registry.list(), vec!["add", "echo"]);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.descriptors().len(), 2);
        assert_eq!(
            registry.descriptors_for(&["add".into(), "nope".into()])[0].name,
            "add"
        );
    }

    #[tokio::test]
    async fn execute_known_tool() {
        let registry = ToolRegistry::new().with_tool(AddTool);
        let out = registry.execute("add", json!({"a": 2, "b": 5})).await.unwrap();
        assert_eq!(out.result, json!(7));
        assert_eq!(out.content, "7");
    }

    #[tokio::test]
    async fn execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, StrandError::ToolNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn execute_rejects_bad_args() {
        let registry = ToolRegistry::new().with_tool(AddTool);
        let err = registry.execute("add", json!({"a": "x"})).await.unwrap_err();
        assert!(matches!(err, StrandError::ToolValidation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_times_out() {
        let registry = ToolRegistry::new().with_tool(SlowTool);
        let err = registry.execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, StrandError::ToolTimeout { tool, .. } if tool == "slow"));
    }

    #[test]
    fn builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.contains("say_to_user"));
        assert!(registry.contains("exit"));
    }
}
