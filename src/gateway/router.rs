//! HTTP router and handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::debug;

use super::{admin, rpc};
use crate::auth::{ApiKeyStore, AuthContext, AuthState, ResourceUrls, auth_middleware};
use crate::beacon::UsageMeter;
use crate::error::rpc_codes;
use crate::oauth::ProtectedResourceMetadata;
use crate::payment::PaymentGate;
use crate::protocol::{Info, JsonRpcResponse};
use crate::resources::ResourceCatalog;
use crate::tools::ToolRegistry;
use crate::treasury::Treasury;

/// Shared application state
pub struct AppState {
    /// Reported by `initialize`
    pub info: Info,
    /// Reported by `initialize`
    pub instructions: Option<String>,
    /// Auth dispatcher
    pub auth: Arc<AuthState>,
    /// Registered tools
    pub tools: ToolRegistry,
    /// Extra scopes per tool name
    pub tool_scopes: HashMap<String, Vec<String>>,
    /// Static resources
    pub resources: ResourceCatalog,
    /// Payment gate, `None` when payments are off
    pub payment: Option<Arc<PaymentGate>>,
    /// Owner-controlled treasury
    pub treasury: Arc<Treasury>,
    /// Usage counters read by the beacon
    pub meter: Arc<UsageMeter>,
    /// API keys, shared with the auth dispatcher
    pub api_keys: Arc<ApiKeyStore>,
    /// Request settings
    pub limits: Limits,
}

/// Per-request limits
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum body size (bytes)
    pub max_body_size: usize,
    /// Maximum time to answer a request
    pub request_timeout: std::time::Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = Arc::clone(&state.auth);
    let limits = state.limits;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_handler),
        )
        .route("/mcp", post(mcp_handler))
        .route("/admin/owner", get(admin::get_owner).put(admin::set_owner))
        .route("/admin/treasury/{ledger}", get(admin::treasury_balance))
        .route("/admin/treasury/{ledger}/withdraw", post(admin::withdraw))
        .route(
            "/admin/api-keys",
            get(admin::list_api_keys).post(admin::create_api_key),
        )
        .route(
            "/admin/api-keys/{id}",
            axum::routing::delete(admin::revoke_api_key),
        );

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler));

    router
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(RequestBodyLimitLayer::new(limits.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            limits.request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.tools.len(),
        "payments": state.payment.is_some(),
    }))
}

/// RFC 9728 metadata for the resource named by the request's own URL
async fn protected_resource_handler(
    State(state): State<Arc<AppState>>,
    Extension(urls): Extension<ResourceUrls>,
) -> impl IntoResponse {
    Json(ProtectedResourceMetadata::new(
        urls.resource(),
        state.auth.issuer(),
        state.auth.required_scopes(),
    ))
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> Response {
    match crate::metrics::prometheus() {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// MCP handler (POST /mcp)
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthContext>,
    Extension(urls): Extension<ResourceUrls>,
    http_request: axum::http::Request<axum::body::Body>,
) -> Response {
    let body_bytes =
        match axum::body::to_bytes(http_request.into_body(), state.limits.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => return parse_error(&format!("Failed to read body: {e}")),
        };

    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed JSON");
            return parse_error(&format!("Invalid JSON: {e}"));
        }
    };

    rpc::dispatch(&state, &caller, &urls, &request).await
}

fn parse_error(message: &str) -> Response {
    let response = JsonRpcResponse::error(None, rpc_codes::PARSE_ERROR, message);
    (StatusCode::BAD_REQUEST, Json(response)).into_response()
}
