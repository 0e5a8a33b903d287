//! Static tool registry dispatched into from the LLM's function-call
//! responses. Replaces the original's `importlib`-based plugin discovery
//! with a fixed set of tools registered at startup, while preserving the
//! `<module>__<local_name>` qualified naming convention the LLM sees.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

pub type ToolFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct ToolDescriptor {
    pub qualified_name: String,
    pub description: String,
    pub parameters: Value,
    pub handler: ToolHandler,
}

impl ToolDescriptor {
    pub fn new(
        module: &str,
        local_name: &str,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            qualified_name: format!("{module}__{local_name}"),
            description: description.into(),
            parameters,
            handler,
        }
    }
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any prior registration under the same
    /// qualified name.
    pub fn register(&mut self, tool: ToolDescriptor) {
        debug!(name = %tool.qualified_name, "registered tool");
        self.tools.insert(tool.qualified_name.clone(), tool);
    }

    /// The function schemas exposed to the LLM, in the shape its
    /// `functions` request field expects.
    pub fn exported_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                serde_json::json!({
                    "name": t.qualified_name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect()
    }

    /// Dispatch a call by qualified name. Never returns an error to the
    /// caller — unknown names and handler failures both become a plain
    /// string response, matching the LLM function-result contract.
    pub async fn call(&self, name: &str, params: Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Function with name {name} not found.");
        };

        match (tool.handler)(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                "Function call failed.".to_string()
            }
        }
    }
}
