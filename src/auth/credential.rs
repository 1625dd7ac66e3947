//! Raw credential extraction from request headers.

use std::fmt;

use axum::http::{HeaderMap, header::AUTHORIZATION};

/// Header carrying a static API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Credential presented by a caller, before any verification.
///
/// `Authorization: Bearer <token>` wins over `x-api-key`. An `Authorization`
/// header with any other scheme contributes nothing.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Bearer token (expected to be a JWT)
    Bearer(String),
    /// Opaque API key
    ApiKey(String),
    /// Nothing usable was presented
    None,
}

impl Credential {
    /// Extract the highest-priority credential from `headers`
    #[must_use]
    pub fn extract(headers: &HeaderMap) -> Self {
        if let Some(token) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
        {
            return Self::Bearer(token.to_string());
        }

        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map_or(Self::None, |k| Self::ApiKey(k.to_string()))
    }

    /// Short label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bearer(_) => "bearer",
            Self::ApiKey(_) => "api_key",
            Self::None => "none",
        }
    }
}

// Secrets never reach log output through Debug
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Credential::Bearer(<redacted>)"),
            Self::ApiKey(_) => f.write_str("Credential::ApiKey(<redacted>)"),
            Self::None => f.write_str("Credential::None"),
        }
    }
}

/// Parse `Bearer <token>` with a case-insensitive scheme
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
