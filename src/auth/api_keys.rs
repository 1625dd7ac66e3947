//! API key store.
//!
//! Keys are generated server-side, shown to their creator once, and stored
//! only as a SHA-256 digest. Lookup is by digest, so the plaintext is never
//! compared; the digest match itself uses a constant-time equality check.
//!
//! Format: `tg_<43-char URL-safe base64>` (256 bits of entropy). The prefix
//! makes keys greppable and detectable by secret scanners.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::principal::Principal;

/// Prefix of every generated key
pub const KEY_PREFIX: &str = "tg_";

/// Stored API key metadata. The plaintext key is never part of it.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    /// Stable identifier used for revocation
    pub id: String,
    /// Hex SHA-256 of the key
    #[serde(skip)]
    pub secret_hash: String,
    /// Principal the key authenticates as
    pub owner: Principal,
    /// Scopes granted to the key
    pub scopes: BTreeSet<String>,
    /// Human-readable label
    pub label: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// In-memory API key store, indexed by digest for validation and by id for
/// revocation.
pub struct ApiKeyStore {
    by_hash: DashMap<String, ApiKeyRecord>,
    by_id: DashMap<String, String>,
}

impl ApiKeyStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_hash: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    /// Generate a cryptographically random key
    #[must_use]
    pub fn generate_key() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        format!(
            "{KEY_PREFIX}{}",
            base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                random_bytes,
            )
        )
    }

    /// Hex SHA-256 digest under which a key is stored
    #[must_use]
    pub fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Issue a new key for `owner`. Returns the record and the plaintext,
    /// which is not retrievable afterwards.
    ///
    /// Authorization (owner-only) is enforced by the caller.
    pub fn create(
        &self,
        owner: Principal,
        label: impl Into<String>,
        scopes: impl IntoIterator<Item = String>,
    ) -> (ApiKeyRecord, String) {
        let key = Self::generate_key();
        let record = self.insert_hashed(Self::hash_key(&key), owner, label.into(), scopes);
        (record, key)
    }

    /// Register a key known only by its digest (pre-provisioned keys)
    pub fn insert_hashed(
        &self,
        secret_hash: String,
        owner: Principal,
        label: String,
        scopes: impl IntoIterator<Item = String>,
    ) -> ApiKeyRecord {
        let record = ApiKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            secret_hash: secret_hash.to_ascii_lowercase(),
            owner,
            scopes: scopes.into_iter().collect(),
            label,
            created_at: Utc::now(),
        };
        self.by_id
            .insert(record.id.clone(), record.secret_hash.clone());
        self.by_hash
            .insert(record.secret_hash.clone(), record.clone());
        debug!(key_id = %record.id, label = %record.label, "API key registered");
        record
    }

    /// Look up the record for a presented key
    #[must_use]
    pub fn validate(&self, presented: &str) -> Option<ApiKeyRecord> {
        let digest = Self::hash_key(presented);
        let entry = self.by_hash.get(&digest)?;
        let matches: bool = entry
            .secret_hash
            .as_bytes()
            .ct_eq(digest.as_bytes())
            .into();
        matches.then(|| entry.clone())
    }

    /// Remove a key by id. Returns `true` if it existed.
    pub fn revoke(&self, id: &str) -> bool {
        if let Some((_, hash)) = self.by_id.remove(id) {
            self.by_hash.remove(&hash);
            true
        } else {
            false
        }
    }

    /// All records, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<ApiKeyRecord> {
        let mut records: Vec<ApiKeyRecord> =
            self.by_hash.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}
