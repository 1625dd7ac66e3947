//! RFC 8414 issuer discovery and the RFC 9728 document served at
//! `/.well-known/oauth-protected-resource`

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Well-known suffixes tried in order when discovering an issuer
const DISCOVERY_PATHS: &[&str] = &[
    "/.well-known/oauth-authorization-server",
    "/.well-known/openid-configuration",
];

/// Discovery failures
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Network or HTTP error
    #[error("metadata fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status
    #[error("metadata endpoint {url} returned HTTP {status}")]
    Status {
        /// URL fetched
        url: String,
        /// Status code
        status: u16,
    },

    /// The document names a different issuer
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer in the document
        actual: String,
    },

    /// No discovery document advertised a `jwks_uri`
    #[error("no jwks_uri advertised by {0}")]
    MissingJwksUri(String),
}

/// OAuth Authorization Server Metadata (RFC 8414), reduced to what a
/// resource server consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Must equal the issuer the document was fetched for
    pub issuer: String,

    /// JWKS endpoint
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Some servers publish this space-delimited instead of as an array
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Canonical `/mcp` URL, query included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// The configured issuer, or empty when none is configured
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    #[allow(missing_docs)]
    #[serde(default)]
    pub bearer_methods_supported: Vec<String>,

    /// Scopes every bearer token must carry
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
}

/// `"a b"` or `["a", "b"]`
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    Ok(match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(joined) => joined.split_whitespace().map(str::to_owned).collect(),
        StringOrVec::Vec(scopes) => scopes,
    })
}

impl AuthorizationServerMetadata {
    /// Discover metadata for `issuer`.
    ///
    /// Tries `oauth-authorization-server` first and falls back to
    /// `openid-configuration` when the first is unavailable or lacks a
    /// `jwks_uri`. The document must name `issuer` as its issuer.
    ///
    /// # Errors
    ///
    /// Returns the last failure when no document yields a usable `jwks_uri`.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self, DiscoveryError> {
        let base = issuer.trim_end_matches('/');
        let mut last_err = DiscoveryError::MissingJwksUri(issuer.to_string());

        for path in DISCOVERY_PATHS {
            let url = format!("{base}{path}");
            debug!(url = %url, "fetching issuer metadata");

            match Self::fetch(client, &url).await {
                Ok(metadata) => {
                    if metadata.issuer.trim_end_matches('/') != base {
                        return Err(DiscoveryError::IssuerMismatch {
                            expected: issuer.to_string(),
                            actual: metadata.issuer,
                        });
                    }
                    if metadata.jwks_uri.is_some() {
                        debug!(issuer = %metadata.issuer, jwks_uri = ?metadata.jwks_uri, "issuer discovered");
                        return Ok(metadata);
                    }
                    last_err = DiscoveryError::MissingJwksUri(url);
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    async fn fetch(client: &Client, url: &str) -> Result<Self, DiscoveryError> {
        let response = client.get(url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            Err(DiscoveryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

impl ProtectedResourceMetadata {
    /// Metadata for `resource`, trusting `issuer` (if any)
    #[must_use]
    pub fn new(resource: String, issuer: Option<&str>, scopes: &[String]) -> Self {
        Self {
            resource: Some(resource),
            authorization_servers: issuer.map(str::to_string).into_iter().collect(),
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: scopes.to_vec(),
        }
    }
}
