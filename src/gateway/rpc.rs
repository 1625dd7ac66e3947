//! JSON-RPC request parsing and MCP method dispatch

use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::router::AppState;
use crate::auth::{AuthContext, AuthError, ResourceUrls};
use crate::audit::{self, AuditEvent};
use crate::error::{Error, rpc_codes};
use crate::metrics;
use crate::protocol::{
    InitializeResult, JsonRpcResponse, RequestId, ResourcesCapability, ResourcesListResult,
    ResourcesReadParams, ResourcesReadResult, ServerCapabilities, ToolsCallParams,
    ToolsCallResult, ToolsCapability, ToolsListResult, negotiate_version,
};

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0.
/// Returns `None` if the value is not a recognised ID type.
pub(super) fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .map(RequestId::Number),
        _ => None,
    }
}

/// Check whether a method name represents a notification (no response expected).
pub(super) fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Parse JSON-RPC request or notification
/// Returns (Option<RequestId>, method, params) - id is None for notifications
#[allow(clippy::result_large_err)]
pub(super) fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    let params = value.get("params").cloned();

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}

/// Deserialize method params, mapping failure to `-32602`
#[allow(clippy::result_large_err)]
fn typed_params<T: serde::de::DeserializeOwned>(
    id: Option<&RequestId>,
    params: Option<Value>,
) -> Result<T, JsonRpcResponse> {
    serde_json::from_value(params.unwrap_or_else(|| json!({}))).map_err(|e| {
        JsonRpcResponse::error(
            id.cloned(),
            rpc_codes::INVALID_PARAMS,
            format!("Invalid params: {e}"),
        )
    })
}

fn rpc_response(status: StatusCode, response: &JsonRpcResponse) -> Response {
    match serde_json::to_value(response) {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize JSON-RPC response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn ok(response: &JsonRpcResponse) -> Response {
    rpc_response(StatusCode::OK, response)
}

fn result_of<T: serde::Serialize>(id: Option<RequestId>, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, rpc_codes::INTERNAL_ERROR, e.to_string()),
    }
}

/// Answer one decoded JSON-RPC message on behalf of `caller`
pub(super) async fn dispatch(
    state: &Arc<AppState>,
    caller: &AuthContext,
    urls: &ResourceUrls,
    request: &Value,
) -> Response {
    let (id, method, params) = match parse_request(request) {
        Ok(parsed) => parsed,
        Err(response) => return rpc_response(StatusCode::BAD_REQUEST, &response),
    };
    debug!(method = %method, principal = %caller.principal, "Dispatching request");

    if is_notification_method(&method) {
        return ok(&JsonRpcResponse::notification_ack());
    }

    let response = match method.as_str() {
        "initialize" => initialize(state, id, params.as_ref()),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => result_of(
            id,
            &ToolsListResult {
                tools: state.tools.definitions(),
            },
        ),
        "tools/call" => return tools_call(state, caller, urls, id, params).await,
        "resources/list" => result_of(
            id,
            &ResourcesListResult {
                resources: state.resources.list(),
            },
        ),
        "resources/read" => match typed_params::<ResourcesReadParams>(id.as_ref(), params) {
            Ok(p) => match state.resources.read(&p.uri) {
                Ok(contents) => result_of(
                    id,
                    &ResourcesReadResult {
                        contents: vec![contents],
                    },
                ),
                Err(e) => JsonRpcResponse::error(id, e.to_rpc_code(), e.to_string()),
            },
            Err(response) => response,
        },
        other => JsonRpcResponse::error(
            id,
            rpc_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };
    ok(&response)
}

fn initialize(state: &AppState, id: Option<RequestId>, params: Option<&Value>) -> JsonRpcResponse {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str);
    let version = negotiate_version(requested);
    info!(requested = ?requested, version, "Client initialized");

    result_of(
        id,
        &InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                resources: Some(ResourcesCapability::default()),
                tools: Some(ToolsCapability::default()),
            },
            server_info: state.info.clone(),
            instructions: state.instructions.clone(),
        },
    )
}

async fn tools_call(
    state: &Arc<AppState>,
    caller: &AuthContext,
    urls: &ResourceUrls,
    id: Option<RequestId>,
    params: Option<Value>,
) -> Response {
    let params: ToolsCallParams = match typed_params(id.as_ref(), params) {
        Ok(p) => p,
        Err(response) => return ok(&response),
    };
    let name = params.name;

    // Counted once the caller is authenticated, whatever happens next
    state.meter.record(caller);

    let Some(handler) = state.tools.get(&name) else {
        let err = Error::UnknownTool(name.clone());
        metrics::tool_call(&name, "unknown");
        return ok(&JsonRpcResponse::error(id, err.to_rpc_code(), err.to_string()));
    };

    let required = state.tool_scopes.get(&name).map_or(&[][..], Vec::as_slice);
    let missing = caller.missing_scopes(required);
    if !missing.is_empty() {
        let err = AuthError::InsufficientScope(missing);
        warn!(tool = %name, principal = %caller.principal, error = %err, "Tool call forbidden");
        audit::emit(&AuditEvent::tool_forbidden(&caller.principal, &name, err.to_string()));
        metrics::auth_rejected(err.reason());
        metrics::tool_call(&name, "forbidden");
        return err.into_rejection(urls);
    }

    // Payment and execution run detached: once the caller is charged the
    // tool completes even if the client goes away.
    let task_state = Arc::clone(state);
    let task_caller = caller.clone();
    let task_name = name.clone();
    let task = tokio::spawn(async move {
        if let Some(gate) = &task_state.payment
            && let Err(e) = gate.charge(&task_caller, &task_name).await
        {
            metrics::tool_call(&task_name, "unpaid");
            return gate.refusal(&task_name, &e);
        }

        match handler.call(&task_caller, params.arguments).await {
            Ok(value) => {
                metrics::tool_call(&task_name, "ok");
                ToolsCallResult::structured(value)
            }
            Err(e) => {
                warn!(tool = %task_name, error = %e, "Tool failed");
                metrics::tool_call(&task_name, "error");
                ToolsCallResult::failure(e.to_string(), None)
            }
        }
    });

    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(tool = %name, error = %e, "Tool task aborted");
            ToolsCallResult::failure(format!("Tool {name} did not complete"), None)
        }
    };
    ok(&result_of(id, &result))
}
