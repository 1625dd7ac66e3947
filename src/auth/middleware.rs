//! Auth dispatcher middleware.
//!
//! Runs in front of every route. Public paths pass untouched; everything
//! else gets an [`AuthContext`] in its request extensions or is rejected
//! here, before any handler runs.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header::WWW_AUTHENTICATE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    ApiKeyStore, AuthContext, Credential, JwksError, JwksResolver, JwksSettings, ResourceUrls,
    TokenError, TokenVerifier,
};
use crate::audit::{self, AuditEvent};
use crate::config::AuthConfig;
use crate::metrics;
use crate::principal::Principal;

/// Paths served without authentication
const PUBLIC_PATHS: &[&str] = &["/.well-known/", "/health", "/metrics"];

/// Why a request was refused
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No bearer token and no API key
    #[error("no credential presented")]
    NoCredential,

    /// Bearer token failed verification
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    /// Bearer token presented but no issuer is configured
    #[error("no trusted issuer configured")]
    NoIssuer,

    /// API key not found in the store
    #[error("invalid API key")]
    InvalidApiKey,

    /// Authenticated, but the operation needs more scopes
    #[error("insufficient scope: {0:?}")]
    InsufficientScope(Vec<String>),
}

impl AuthError {
    /// Metric label
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::InvalidToken(_) | Self::NoIssuer => "invalid_token",
            Self::InvalidApiKey => "invalid_api_key",
            Self::InsufficientScope(_) => "insufficient_scope",
        }
    }

    /// HTTP rejection for this failure on the resource described by `urls`.
    ///
    /// The body never says which token check failed.
    #[must_use]
    pub fn into_rejection(self, urls: &ResourceUrls) -> Response {
        match self {
            Self::NoCredential | Self::InvalidToken(_) | Self::NoIssuer => {
                bearer_challenge(urls)
            }
            Self::InvalidApiKey => api_key_unauthorized(),
            Self::InsufficientScope(missing) => insufficient_scope_response(urls, &missing),
        }
    }
}

/// Shared state of the auth dispatcher
pub struct AuthState {
    enabled: bool,
    verifier: Option<TokenVerifier>,
    api_keys: Arc<ApiKeyStore>,
    required_scopes: Vec<String>,
    public_origin: Option<String>,
}

impl AuthState {
    /// Assemble the dispatcher from configuration.
    ///
    /// Pre-provisioned keys from `config.api_keys` are registered in
    /// `api_keys`. Entries with neither `hash` nor a resolvable `key` are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Fails when the key resolver for the configured issuer cannot be
    /// built.
    pub fn from_config(
        config: &AuthConfig,
        public_origin: Option<String>,
        api_keys: Arc<ApiKeyStore>,
    ) -> Result<Self, JwksError> {
        let verifier = match &config.issuer {
            Some(issuer) => {
                let resolver = JwksResolver::new(JwksSettings {
                    issuer: issuer.clone(),
                    jwks_uri: config.jwks_uri.clone(),
                    ttl: config.jwks_ttl,
                    fetch_timeout: config.fetch_timeout,
                    require_https: config.require_https,
                })?;
                Some(TokenVerifier::new(Arc::new(resolver), config.leeway_secs))
            }
            None => None,
        };

        for seeded in &config.api_keys {
            let hash = match (&seeded.hash, seeded.resolve_key()) {
                (Some(hash), _) => hash.clone(),
                (None, Some(key)) => ApiKeyStore::hash_key(&key),
                (None, None) => {
                    warn!(label = %seeded.label, "API key entry has neither key nor hash, skipped");
                    continue;
                }
            };
            api_keys.insert_hashed(
                hash,
                Principal::new(seeded.principal.clone()),
                seeded.label.clone(),
                seeded.scopes.iter().cloned(),
            );
        }

        Ok(Self {
            enabled: config.enabled,
            verifier,
            api_keys,
            required_scopes: config.required_scopes.clone(),
            public_origin,
        })
    }

    /// Configured external origin, if any
    #[must_use]
    pub fn public_origin(&self) -> Option<&str> {
        self.public_origin.as_deref()
    }

    /// Trusted issuer, if any
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.verifier.as_ref().map(TokenVerifier::issuer)
    }

    /// Whether authentication is enforced
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Scopes every bearer token must carry
    #[must_use]
    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    /// Resolve `credential` into a caller identity for the resource `urls`.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] that decides the rejection shape.
    pub async fn authenticate(
        &self,
        credential: &Credential,
        urls: &ResourceUrls,
    ) -> Result<AuthContext, AuthError> {
        match credential {
            Credential::None => Err(AuthError::NoCredential),
            Credential::Bearer(token) => {
                let verifier = self.verifier.as_ref().ok_or(AuthError::NoIssuer)?;
                let verified = verifier
                    .verify(token, &urls.resource(), &self.required_scopes)
                    .await?;
                Ok(AuthContext::bearer(verified))
            }
            Credential::ApiKey(key) => self
                .api_keys
                .validate(key)
                .map(AuthContext::api_key)
                .ok_or(AuthError::InvalidApiKey),
        }
    }
}

/// Check if a path bypasses authentication
#[must_use]
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path.starts_with(p))
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let urls = ResourceUrls::from_request(
        request.uri(),
        request.headers(),
        state.public_origin.as_deref(),
    );
    request.extensions_mut().insert(urls.clone());

    let path = request.uri().path().to_string();
    if is_public_path(&path) {
        debug!(path = %path, "Public path, skipping auth");
        return next.run(request).await;
    }

    if !state.enabled {
        request.extensions_mut().insert(AuthContext::anonymous());
        return next.run(request).await;
    }

    let credential = Credential::extract(request.headers());
    match state.authenticate(&credential, &urls).await {
        Ok(ctx) => {
            debug!(principal = %ctx.principal, method = ?ctx.method, path = %path, "Authenticated request");
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, credential = credential.kind(), error = %e, "Authentication failed");
            audit::emit(&AuditEvent::auth_rejected(credential.kind(), e.to_string()));
            metrics::auth_rejected(e.reason());
            e.into_rejection(&urls)
        }
    }
}

/// 401 carrying the protected resource metadata location
#[must_use]
pub fn bearer_challenge(urls: &ResourceUrls) -> Response {
    let challenge = format!("Bearer resource_metadata=\"{}\"", urls.metadata());
    with_challenge(StatusCode::UNAUTHORIZED, &challenge)
}

/// 401 for a rejected API key: no OAuth discovery header
#[must_use]
pub fn api_key_unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

/// 403 naming the missing scopes, with the same discovery pointer as a 401
#[must_use]
pub fn insufficient_scope_response(urls: &ResourceUrls, missing: &[String]) -> Response {
    let challenge = format!(
        "Bearer error=\"insufficient_scope\", scope=\"{}\", resource_metadata=\"{}\"",
        missing.join(" "),
        urls.metadata()
    );
    with_challenge(StatusCode::FORBIDDEN, &challenge)
}

fn with_challenge(status: StatusCode, challenge: &str) -> Response {
    let body = if status == StatusCode::UNAUTHORIZED {
        json!({ "error": "Unauthorized" })
    } else {
        json!({ "error": "Forbidden" })
    };
    let mut response = (status, Json(body)).into_response();
    match HeaderValue::from_str(challenge) {
        Ok(value) => {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        Err(e) => warn!(error = %e, "Challenge is not a valid header value"),
    }
    response
}
