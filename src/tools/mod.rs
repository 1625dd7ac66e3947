//! Tool handlers served through `tools/list` and `tools/call`.
//!
//! A tool is anything implementing [`ToolHandler`]. Pricing and extra
//! scope requirements are configured per tool name, outside the handler,
//! so a handler never sees an unpaid or unauthorized call.

mod builtin;

pub use builtin::{GenerateImage, GetWeather};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::protocol::Tool;

/// Tool execution failure, reported to the client as an `isError` result
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments do not match the input schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed
    #[error("{0}")]
    Failed(String),
}

/// A callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Definition advertised by `tools/list`
    fn definition(&self) -> Tool;

    /// Run the tool for `caller`. The returned value becomes
    /// `structuredContent` and must match the output schema.
    async fn call(&self, caller: &AuthContext, arguments: Value) -> Result<Value, ToolError>;
}

/// Registered tools by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled demonstration tools
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GetWeather));
        registry.register(Arc::new(GenerateImage));
        registry
    }

    /// Add `handler` under its definition's name, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(handler.definition().name, handler);
    }

    /// Handler for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// All definitions, sorted by name
    #[must_use]
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Required string argument `key`
pub(crate) fn string_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a non-empty string")))
}
