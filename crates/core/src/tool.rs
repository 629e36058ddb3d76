//! Tool trait: the operations a stage exposes to the model.
//!
//! Tools are what let the model act on the working dataset: inspect it,
//! impute, drop, encode, run a training script. Each tool mutates an
//! explicit stage context passed to `execute`; the registry itself holds
//! no state, so a failed handler leaves nothing behind in the registry.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The core Tool trait, generic over the stage context `C` that handlers
/// read and mutate.
///
/// Handlers return a typed result: `Ok(text)` is a successful tool result,
/// `Err(ToolError)` is rendered as an error tool-result for the model to
/// react to. The stage loop branches on the variant, never on the result
/// text.
#[async_trait]
pub trait Tool<C: Send>: Send + Sync {
    /// The unique name of this tool (e.g., "impute_missing").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool against the stage context with parsed arguments.
    async fn execute(
        &self,
        ctx: &mut C,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of the tools one stage exposes.
///
/// The stage loop uses this to:
/// 1. Get tool definitions to declare to the LLM
/// 2. Dispatch tool calls the LLM requests
pub struct ToolRegistry<C: Send> {
    tools: HashMap<String, Box<dyn Tool<C>>>,
    // Declaration order, so definitions() is stable across runs.
    order: Vec<String>,
}

impl<C: Send> ToolRegistry<C> {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool<C>>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool<C>> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.to_definition())
            .collect()
    }

    /// Dispatch a tool call against the stage context.
    ///
    /// Fails with `UnknownTool` for unregistered names; the caller surfaces
    /// that as an error tool-result, not as a stage failure.
    pub async fn dispatch(
        &self,
        ctx: &mut C,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(ctx, arguments).await
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }
}

impl<C: Send> Default for ToolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A counter context plus a tool that increments it.
    #[derive(Default)]
    struct Counter {
        value: i64,
    }

    struct AddTool;

    #[async_trait]
    impl Tool<Counter> for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Add an amount to the counter"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "amount": { "type": "integer" }
                },
                "required": ["amount"]
            })
        }
        async fn execute(
            &self,
            ctx: &mut Counter,
            arguments: serde_json::Value,
        ) -> Result<String, ToolError> {
            let amount = arguments["amount"]
                .as_i64()
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'amount'".into()))?;
            ctx.value += amount;
            Ok(format!("counter is now {}", ctx.value))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AddTool));
        assert!(registry.get("add").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_in_order() {
        let mut registry: ToolRegistry<Counter> = ToolRegistry::new();
        registry.register(Box::new(AddTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "add");
        assert_eq!(registry.names(), vec!["add"]);
    }

    #[tokio::test]
    async fn dispatch_mutates_context() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AddTool));

        let mut ctx = Counter::default();
        let out = registry
            .dispatch(&mut ctx, "add", serde_json::json!({"amount": 5}))
            .await
            .unwrap();
        assert_eq!(ctx.value, 5);
        assert!(out.contains("5"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool() {
        let registry: ToolRegistry<Counter> = ToolRegistry::new();
        let mut ctx = Counter::default();
        let err = registry
            .dispatch(&mut ctx, "nonexistent", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn dispatch_invalid_arguments_leaves_context_untouched() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AddTool));

        let mut ctx = Counter::default();
        let err = registry
            .dispatch(&mut ctx, "add", serde_json::json!({"wrong": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert_eq!(ctx.value, 0);
    }
}
