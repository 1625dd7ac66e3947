//! Canonical resource and discovery URLs for the current request.
//!
//! The audience a bearer token must carry and the `resource_metadata` URL
//! advertised in challenges are both derived from the request itself, so a
//! query string that selects a resource instance (`?canisterId=...`) is kept
//! byte-for-byte.

use axum::http::{HeaderMap, Uri, header::HOST};

/// Path of the MCP endpoint, which is the protected resource
pub const MCP_PATH: &str = "/mcp";

/// Path of the RFC 9728 protected resource metadata document
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Origin and query of the request, from which resource URLs are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUrls {
    origin: String,
    query: Option<String>,
}

impl ResourceUrls {
    /// Derive from the request.
    ///
    /// `public_origin` (from configuration) wins over request headers;
    /// otherwise the scheme comes from `X-Forwarded-Proto` and the authority
    /// from `Host`.
    #[must_use]
    pub fn from_request(uri: &Uri, headers: &HeaderMap, public_origin: Option<&str>) -> Self {
        let origin = match public_origin {
            Some(origin) => origin.trim_end_matches('/').to_string(),
            None => {
                let scheme = headers
                    .get("x-forwarded-proto")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .or_else(|| uri.scheme_str())
                    .unwrap_or("http");
                let host = headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .or_else(|| uri.authority().map(axum::http::uri::Authority::as_str))
                    .unwrap_or("localhost");
                format!("{scheme}://{host}")
            }
        };

        Self {
            origin,
            query: uri.query().map(str::to_string),
        }
    }

    /// Canonical URL of the protected resource; the expected token audience
    #[must_use]
    pub fn resource(&self) -> String {
        self.with_path(MCP_PATH)
    }

    /// URL of the protected resource metadata for this same resource instance
    #[must_use]
    pub fn metadata(&self) -> String {
        self.with_path(PROTECTED_RESOURCE_PATH)
    }

    fn with_path(&self, path: &str) -> String {
        match &self.query {
            Some(q) => format!("{}{path}?{q}", self.origin),
            None => format!("{}{path}", self.origin),
        }
    }
}
