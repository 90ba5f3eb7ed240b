//! Tool registry and validated dispatch
//!
//! Tool results never propagate errors: unknown tools, missing arguments,
//! and handler failures all come back as unsuccessful results with a
//! diagnostic message.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

/// Async tool handler over a JSON argument map
pub type ToolFn =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A registered tool
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub required_args: Vec<String>,
    handler: ToolFn,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        required_args: &[&str],
        handler: ToolFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_args: required_args.iter().map(|s| s.to_string()).collect(),
            handler,
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("required_args", &self.required_args)
            .finish()
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    pub payload: Map<String, Value>,
    pub error: Option<String>,
}

impl ToolExecutionResult {
    fn failure(tool_name: &str, error: String) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: false,
            payload: Map::new(),
            error: Some(error),
        }
    }
}

/// Looks up, validates, and dispatches tool calls
pub struct ToolExecutor {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolExecutor {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn available_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> ToolExecutionResult {
        let Some(tool) = self.tools.get(tool_name) else {
            return ToolExecutionResult::failure(tool_name, format!("Unknown tool: {}", tool_name));
        };

        let mut normalized = arguments.clone();
        // Some runtimes pass single-input payloads under `input`.
        if !normalized.contains_key("query") {
            if let Some(input) = normalized.get("input").cloned() {
                if !input.is_null() {
                    normalized.insert("query".to_string(), input);
                }
            }
        }

        let missing: Vec<&str> = tool
            .required_args
            .iter()
            .filter(|name| !normalized.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let mut provided: Vec<&str> = normalized.keys().map(String::as_str).collect();
            provided.sort();
            return ToolExecutionResult::failure(
                tool_name,
                format!(
                    "Missing required args: {}; provided keys: {:?}",
                    missing.join(", "),
                    provided
                ),
            );
        }

        let mut arg_keys: Vec<String> = normalized.keys().cloned().collect();
        arg_keys.sort();

        match (tool.handler)(normalized).await {
            Ok(value) => {
                let payload = match value {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("result".to_string(), other);
                        map
                    }
                };
                ToolExecutionResult {
                    tool_name: tool_name.to_string(),
                    success: true,
                    payload,
                    error: None,
                }
            }
            Err(e) => ToolExecutionResult::failure(
                tool_name,
                format!(
                    "HandlerError: {}; tool={}; arg_keys={:?}",
                    e, tool_name, arg_keys
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::new(
            "echo",
            "Echo the query back",
            &["query"],
            Arc::new(|args| {
                Box::pin(async move {
                    Ok(json!({"echoed": args.get("query").cloned().unwrap_or(Value::Null)}))
                })
            }),
        )
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let executor = ToolExecutor::new(vec![echo_tool()]);
        let result = executor.execute("missing", &Map::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool: missing"));
    }

    #[tokio::test]
    async fn test_missing_required_args_lists_names_and_keys() {
        let executor = ToolExecutor::new(vec![echo_tool()]);
        let result = executor
            .execute("echo", &args(&[("doc_id", json!("pump_x"))]))
            .await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("Missing required args: query"));
        assert!(error.contains("doc_id"));
    }

    #[tokio::test]
    async fn test_input_is_remapped_to_query() {
        let executor = ToolExecutor::new(vec![echo_tool()]);
        let result = executor
            .execute("echo", &args(&[("input", json!("torque spec"))]))
            .await;
        assert!(result.success);
        assert_eq!(result.payload["echoed"], json!("torque spec"));
    }

    #[tokio::test]
    async fn test_non_object_return_is_wrapped() {
        let tool = ToolDefinition::new(
            "count",
            "Return a scalar",
            &[],
            Arc::new(|_args| Box::pin(async move { Ok(json!(42)) })),
        );
        let executor = ToolExecutor::new(vec![tool]);
        let result = executor.execute("count", &Map::new()).await;
        assert!(result.success);
        assert_eq!(result.payload["result"], json!(42));
    }

    #[tokio::test]
    async fn test_handler_error_is_captured() {
        let tool = ToolDefinition::new(
            "broken",
            "Always fails",
            &[],
            Arc::new(|_args| {
                Box::pin(async move { Err(anyhow::anyhow!("adapter unreachable")) })
            }),
        );
        let executor = ToolExecutor::new(vec![tool]);
        let result = executor.execute("broken", &Map::new()).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("adapter unreachable"));
        assert!(error.contains("tool=broken"));
    }

    #[tokio::test]
    async fn test_available_tools_sorted() {
        let a = ToolDefinition::new("b_tool", "", &[], Arc::new(|_| Box::pin(async { Ok(json!({})) })));
        let b = ToolDefinition::new("a_tool", "", &[], Arc::new(|_| Box::pin(async { Ok(json!({})) })));
        let executor = ToolExecutor::new(vec![a, b]);
        assert_eq!(executor.available_tools(), vec!["a_tool", "b_tool"]);
    }
}
