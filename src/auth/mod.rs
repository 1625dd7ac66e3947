//! Caller authentication.
//!
//! A request presents at most one usable credential ([`Credential`]). The
//! dispatcher ([`middleware::auth_middleware`]) turns it into an
//! [`AuthContext`] or a rejection:
//!
//! | Credential | Verified by | Failure |
//! |------------|-------------|---------|
//! | `Authorization: Bearer <jwt>` | [`TokenVerifier`] via [`JwksResolver`] | 401 + `WWW-Authenticate` discovery header |
//! | `x-api-key: <key>` | [`ApiKeyStore`] | 401 `{"error":"Unauthorized"}` |
//! | none | - | 401 + `WWW-Authenticate` discovery header |
//!
//! Operation scopes missing from an authenticated context yield 403.
//!
//! Owner operations additionally need [`AuthContext::may_administer`]: a
//! bearer token always qualifies, an API key only when it carries
//! [`ADMIN_SCOPE`].

pub mod api_keys;
pub mod credential;
pub mod jwks;
pub mod middleware;
pub mod resource;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_keys;

use std::collections::BTreeSet;

pub use api_keys::{ApiKeyRecord, ApiKeyStore};
pub use credential::Credential;
pub use jwks::{JwksError, JwksResolver, JwksSettings};
pub use middleware::{AuthError, AuthState, auth_middleware};
pub use resource::ResourceUrls;
pub use verifier::{TokenError, TokenVerifier, VerifiedToken};

use crate::principal::Principal;

/// Scope an API key needs to act on owner operations
pub const ADMIN_SCOPE: &str = "tollgate:admin";

/// How the caller authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Verified bearer JWT
    Bearer,
    /// Stored API key
    ApiKey,
    /// Authentication is disabled
    Anonymous,
}

/// Identity of the caller, fixed for the lifetime of one request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Acting principal
    pub principal: Principal,
    /// Granted scopes
    pub scopes: BTreeSet<String>,
    /// Credential kind that established the context
    pub method: AuthMethod,
}

impl AuthContext {
    /// Context of a verified bearer token
    #[must_use]
    pub fn bearer(token: VerifiedToken) -> Self {
        Self {
            principal: token.subject,
            scopes: token.scopes,
            method: AuthMethod::Bearer,
        }
    }

    /// Context of a validated API key: the key acts as its owner
    #[must_use]
    pub fn api_key(record: ApiKeyRecord) -> Self {
        Self {
            principal: record.owner,
            scopes: record.scopes,
            method: AuthMethod::ApiKey,
        }
    }

    /// Context used when authentication is disabled
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            principal: Principal::anonymous(),
            scopes: BTreeSet::new(),
            method: AuthMethod::Anonymous,
        }
    }

    /// Whether the caller is an authenticated principal
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.method != AuthMethod::Anonymous
    }

    /// Whether the context may exercise its principal's owner rights.
    /// API keys need [`ADMIN_SCOPE`]; anonymous contexts never qualify.
    #[must_use]
    pub fn may_administer(&self) -> bool {
        match self.method {
            AuthMethod::Bearer => true,
            AuthMethod::ApiKey => self.scopes.contains(ADMIN_SCOPE),
            AuthMethod::Anonymous => false,
        }
    }

    /// Scopes from `required` the caller lacks. Anonymous contexts lack none,
    /// since they only exist with authentication disabled.
    #[must_use]
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        if !self.is_authenticated() {
            return Vec::new();
        }
        required
            .iter()
            .filter(|s| !self.scopes.contains(*s))
            .cloned()
            .collect()
    }
}
