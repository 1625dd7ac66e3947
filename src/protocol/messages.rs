//! MCP JSON-RPC message types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Content, Info, Resource, ResourceContents, ServerCapabilities, Tool};

const JSONRPC_VERSION: &str = "2.0";

/// Envelope returned for every `/mcp` request
///
/// Exactly one of `result` and `error` is set, except for the notification
/// acknowledgement where `result` is `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(missing_docs)]
    pub jsonrpc: String,
    /// `null` when the request carried no readable id
    pub id: Option<RequestId>,
    #[allow(missing_docs)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[allow(missing_docs)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn envelope(id: Option<RequestId>, result: Option<Value>, error: Option<JsonRpcError>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result,
            error,
        }
    }

    /// `result` envelope
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self::envelope(id, Some(result), None)
    }

    /// `error` envelope with one of the [`rpc_codes`](crate::error::rpc_codes)
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        let error = JsonRpcError {
            code,
            message: message.into(),
            data: None,
        };
        Self::envelope(id, None, Some(error))
    }

    /// Acknowledgement for a notification: `{"jsonrpc":"2.0","id":null,"result":null}`
    #[must_use]
    pub fn notification_ack() -> Self {
        Self::success(None, Value::Null)
    }
}

/// Protocol-level failure (unknown tool, bad params, unknown method)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[allow(missing_docs)]
    pub code: i32,
    #[allow(missing_docs)]
    pub message: String,
    #[allow(missing_docs)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Client-chosen request id, echoed back verbatim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    #[allow(missing_docs)]
    String(String),
    #[allow(missing_docs)]
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(id) => f.write_str(id),
            Self::Number(id) => id.fmt(f),
        }
    }
}

// ============================================================================
// Initialize
// ============================================================================

/// `initialize` answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated version, see [`negotiate_version`](super::negotiate_version)
    pub protocol_version: String,
    #[allow(missing_docs)]
    pub capabilities: ServerCapabilities,
    /// Name and version of this gateway
    pub server_info: Info,
    /// Free-form usage hints shown to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ============================================================================
// Tools
// ============================================================================

/// `tools/list` answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    #[allow(missing_docs)]
    pub tools: Vec<Tool>,
}

/// `tools/call` params; missing `arguments` reads as `null`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    #[serde(default)]
    pub arguments: Value,
}

/// `tools/call` answer, also used for payment refusals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCallResult {
    #[allow(missing_docs)]
    pub content: Vec<Content>,
    /// Value matching the tool's output schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub is_error: bool,
}

impl ToolsCallResult {
    /// Successful result: the structured value, mirrored as JSON text
    #[must_use]
    pub fn structured(value: Value) -> Self {
        Self {
            content: vec![Content::text(value.to_string())],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// Tool-level failure carried inside a successful JSON-RPC response
    pub fn failure(message: impl Into<String>, structured: Option<Value>) -> Self {
        Self {
            content: vec![Content::text(message)],
            structured_content: structured,
            is_error: true,
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// `resources/list` answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    #[allow(missing_docs)]
    pub resources: Vec<Resource>,
}

/// `resources/read` params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    #[allow(missing_docs)]
    pub uri: String,
}

/// `resources/read` answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadResult {
    #[allow(missing_docs)]
    pub contents: Vec<ResourceContents>,
}
