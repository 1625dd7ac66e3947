//! Bearer JWT verification.
//!
//! # Verification flow
//!
//! 1. Decode the header (no verification) for `kid` and `alg`.
//! 2. Read the unverified `iss` claim and resolve `kid` through the
//!    [`JwksResolver`], which only trusts the configured issuer.
//! 3. Take the algorithm from the key (its `alg`, else its type and curve)
//!    and require the header to declare the same one. Symmetric algorithms
//!    are never accepted.
//! 4. Verify signature, `exp` (with leeway), `aud` against the request's
//!    canonical resource URL, `iss` against the configured issuer exactly,
//!    and presence of `sub`.
//! 5. Require every configured scope in the space-delimited `scope` claim.
//!
//! Callers collapse every [`TokenError`] into one invalid-token outcome;
//! the variants exist for logs only.

use std::collections::BTreeSet;
use std::sync::Arc;

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm},
};
use serde::Deserialize;

use super::jwks::{JwksError, JwksResolver};
use crate::principal::Principal;

/// Why a bearer token was refused
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not a structurally valid JWT
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// The header names no key
    #[error("token header has no kid")]
    MissingKeyId,

    /// Key resolution failed
    #[error(transparent)]
    Jwks(#[from] JwksError),

    /// The key's algorithm is not one we verify
    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The header declares a different algorithm than the key
    #[error("algorithm mismatch: key uses {key:?}, token declares {token:?}")]
    AlgorithmMismatch {
        /// Algorithm bound to the key
        key: Algorithm,
        /// Algorithm in the token header
        token: Algorithm,
    },

    /// Signature or registered-claim validation failed
    #[error("JWT validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Required scopes are absent
    #[error("token lacks required scopes: {0:?}")]
    MissingScopes(Vec<String>),
}

/// Identity established by a valid bearer token
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// `sub` claim
    pub subject: Principal,
    /// Scopes from the `scope` claim
    pub scopes: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    iss: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    scope: Option<String>,
}

/// Verifies bearer tokens issued by the trusted issuer.
pub struct TokenVerifier {
    resolver: Arc<JwksResolver>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Create a verifier over `resolver`
    #[must_use]
    pub fn new(resolver: Arc<JwksResolver>, leeway_secs: u64) -> Self {
        Self {
            resolver,
            leeway_secs,
        }
    }

    /// The trusted issuer
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.resolver.issuer()
    }

    /// Verify `token` for `audience`, requiring `required_scopes`.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] on the first failed check.
    pub async fn verify(
        &self,
        token: &str,
        audience: &str,
        required_scopes: &[String],
    ) -> Result<VerifiedToken, TokenError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.as_deref().ok_or(TokenError::MissingKeyId)?;
        let issuer = extract_unverified_issuer(token)?;

        let jwk = self.resolver.key_for(&issuer, kid).await?;
        let alg = key_algorithm(&jwk)?;
        if header.alg != alg {
            return Err(TokenError::AlgorithmMismatch {
                key: alg,
                token: header.alg,
            });
        }
        let key = DecodingKey::from_jwk(&jwk)?;

        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway_secs;
        validation.set_audience(&[audience]);
        validation.set_issuer(&[self.resolver.issuer()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let claims = jsonwebtoken::decode::<Claims>(token, &key, &validation)?.claims;

        let scopes: BTreeSet<String> = claims
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let missing: Vec<String> = required_scopes
            .iter()
            .filter(|s| !scopes.contains(*s))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TokenError::MissingScopes(missing));
        }

        Ok(VerifiedToken {
            subject: Principal::new(claims.sub),
            scopes,
        })
    }
}

/// Read `iss` from the payload without verifying anything.
///
/// Used only to pick the key source; the claim is verified afterwards.
fn extract_unverified_issuer(token: &str) -> Result<String, TokenError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or(TokenError::Malformed("missing payload segment"))?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload)
        .map_err(|_| TokenError::Malformed("payload is not base64url"))?;
    serde_json::from_slice::<UnverifiedClaims>(&bytes)
        .map_err(|_| TokenError::Malformed("payload is not a JSON object"))?
        .iss
        .ok_or(TokenError::Malformed("missing iss claim"))
}

/// The asymmetric algorithm a published key is bound to
fn key_algorithm(jwk: &Jwk) -> Result<Algorithm, TokenError> {
    if let Some(alg) = &jwk.common.key_algorithm {
        return match alg {
            KeyAlgorithm::RS256 => Ok(Algorithm::RS256),
            KeyAlgorithm::RS384 => Ok(Algorithm::RS384),
            KeyAlgorithm::RS512 => Ok(Algorithm::RS512),
            KeyAlgorithm::PS256 => Ok(Algorithm::PS256),
            KeyAlgorithm::PS384 => Ok(Algorithm::PS384),
            KeyAlgorithm::PS512 => Ok(Algorithm::PS512),
            KeyAlgorithm::ES256 => Ok(Algorithm::ES256),
            KeyAlgorithm::ES384 => Ok(Algorithm::ES384),
            KeyAlgorithm::EdDSA => Ok(Algorithm::EdDSA),
            other => Err(TokenError::UnsupportedAlgorithm(format!("{other:?}"))),
        };
    }

    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Ok(Algorithm::RS256),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => Ok(Algorithm::ES256),
            EllipticCurve::P384 => Ok(Algorithm::ES384),
            ref other => Err(TokenError::UnsupportedAlgorithm(format!("{other:?}"))),
        },
        AlgorithmParameters::OctetKeyPair(okp) if okp.curve == EllipticCurve::Ed25519 => {
            Ok(Algorithm::EdDSA)
        }
        _ => Err(TokenError::UnsupportedAlgorithm(
            "symmetric or unknown key type".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::JwksSettings;
    use crate::auth::test_keys;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;

    const AUDIENCE: &str = "http://127.0.0.1:4943/mcp?canisterId=uxrrr-q7777-77774-qaaaq-cai";

    async fn verifier() -> (TokenVerifier, String) {
        let issuer = test_keys::spawn_issuer().await;
        let resolver = JwksResolver::new(JwksSettings {
            issuer: issuer.clone(),
            jwks_uri: None,
            ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(5),
            require_https: false,
        })
        .unwrap();
        (TokenVerifier::new(Arc::new(resolver), 0), issuer)
    }

    fn openid() -> Vec<String> {
        vec!["openid".to_string()]
    }

    #[tokio::test]
    async fn valid_token_yields_subject_and_scopes() {
        // GIVEN: a token for this resource carrying the required scope
        let (verifier, issuer) = verifier().await;
        let token = test_keys::sign(&test_keys::claims(&issuer, AUDIENCE, "openid profile"));

        // WHEN: verified
        let verified = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap();

        // THEN: identity and scopes come from the claims
        assert_eq!(verified.subject.as_str(), test_keys::SUBJECT);
        assert!(verified.scopes.contains("profile"));
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let (verifier, issuer) = verifier().await;
        let token = test_keys::sign(&test_keys::claims(
            &issuer,
            "http://127.0.0.1:4943/mcp?canisterId=other",
            "openid",
        ));

        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();
        assert!(matches!(err, TokenError::Jwt(_)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (verifier, issuer) = verifier().await;
        let mut claims = test_keys::claims(&issuer, AUDIENCE, "openid");
        claims["exp"] = json!(test_keys::now() - 3600);

        let err = verifier
            .verify(&test_keys::sign(&claims), AUDIENCE, &openid())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Jwt(_)));
    }

    #[tokio::test]
    async fn token_expired_seconds_ago_is_rejected() {
        let (verifier, issuer) = verifier().await;
        let mut claims = test_keys::claims(&issuer, AUDIENCE, "openid");
        claims["exp"] = json!(test_keys::now() - 5);

        let err = verifier
            .verify(&test_keys::sign(&claims), AUDIENCE, &openid())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Jwt(_)));
    }

    #[tokio::test]
    async fn missing_scope_is_rejected() {
        let (verifier, issuer) = verifier().await;
        let token = test_keys::sign(&test_keys::claims(&issuer, AUDIENCE, "profile"));

        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();
        assert!(matches!(err, TokenError::MissingScopes(ref m) if m == &openid()));
    }

    #[tokio::test]
    async fn missing_sub_is_rejected() {
        let (verifier, issuer) = verifier().await;
        let mut claims = test_keys::claims(&issuer, AUDIENCE, "openid");
        claims.as_object_mut().unwrap().remove("sub");

        let result = verifier
            .verify(&test_keys::sign(&claims), AUDIENCE, &openid())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unpublished_signing_key_is_rejected() {
        // GIVEN: a token claiming the published kid but signed by another key
        let (verifier, issuer) = verifier().await;
        let token = test_keys::sign_with(
            test_keys::OTHER_PRIVATE_PEM,
            Some(test_keys::KID),
            &test_keys::claims(&issuer, AUDIENCE, "openid"),
        );

        // THEN: signature verification fails
        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();
        assert!(matches!(err, TokenError::Jwt(_)));
    }

    #[tokio::test]
    async fn foreign_issuer_is_rejected() {
        let (verifier, _issuer) = verifier().await;
        let token = test_keys::sign(&test_keys::claims(
            "https://attacker.example.com",
            AUDIENCE,
            "openid",
        ));

        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();
        assert!(matches!(err, TokenError::Jwks(JwksError::UnknownIssuer(_))));
    }

    #[tokio::test]
    async fn issuer_spelled_differently_is_rejected() {
        // GIVEN: a correctly signed token whose iss adds a trailing slash
        let (verifier, issuer) = verifier().await;
        let token = test_keys::sign(&test_keys::claims(
            &format!("{issuer}/"),
            AUDIENCE,
            "openid",
        ));

        // WHEN: verified
        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();

        // THEN: the claim must equal the configured issuer verbatim
        assert!(matches!(err, TokenError::Jwt(_)));
    }

    #[tokio::test]
    async fn symmetric_algorithm_is_rejected() {
        // GIVEN: an HS256 token naming the EC key's kid
        let (verifier, issuer) = verifier().await;
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(test_keys::KID.to_string());
        let token = jsonwebtoken::encode(
            &header,
            &test_keys::claims(&issuer, AUDIENCE, "openid"),
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        // THEN: the algorithm must match the key
        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();
        assert!(matches!(err, TokenError::AlgorithmMismatch { .. }));
    }

    #[tokio::test]
    async fn token_without_kid_is_rejected() {
        let (verifier, issuer) = verifier().await;
        let token = test_keys::sign_with(
            test_keys::OTHER_PRIVATE_PEM,
            None,
            &test_keys::claims(&issuer, AUDIENCE, "openid"),
        );

        let err = verifier.verify(&token, AUDIENCE, &openid()).await.unwrap_err();
        assert!(matches!(err, TokenError::MissingKeyId));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let (verifier, _) = verifier().await;
        assert!(verifier.verify("not-a-jwt", AUDIENCE, &openid()).await.is_err());
    }

    #[test]
    fn curve_determines_algorithm_without_alg_member() {
        let jwk: Jwk = serde_json::from_value(test_keys::public_jwk()).unwrap();
        assert_eq!(key_algorithm(&jwk).unwrap(), Algorithm::ES256);
    }

    #[test]
    fn symmetric_jwk_is_unsupported() {
        let jwk: Jwk = serde_json::from_value(json!({"kty": "oct", "kid": "k", "k": "c2VjcmV0"}))
            .unwrap();
        assert!(matches!(
            key_algorithm(&jwk),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
    }
}
