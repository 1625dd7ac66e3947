//! Audit logging for security-relevant events.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! the `audit` field, making the trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `auth.rejected` | A request is refused with 401 or 403 |
//! | `api_key.created` | The owner issues a key |
//! | `api_key.revoked` | The owner revokes a key |
//! | `payment.debited` | A priced tool call was paid for |
//! | `payment.refused` | A priced tool call could not be paid for |
//! | `owner.changed` | Treasury ownership moved |
//! | `treasury.withdrawn` | The owner withdrew funds |
//! | `admin.denied` | A non-owner attempted an owner-only operation |

use serde::Serialize;

use crate::auth::ApiKeyRecord;
use crate::principal::Principal;

/// Structured audit event
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"payment.debited"`)
    pub event: &'static str,
    /// Acting principal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    /// Credential kind (`bearer`, `api_key`, `none`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<&'static str>,
    /// Tool name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Ledger id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<String>,
    /// Token amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// Ledger block index of the transfer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
    /// API key id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Counterparty (new owner, withdrawal destination)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Human-readable reason for denial or error events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn bare(event: &'static str) -> Self {
        Self {
            event,
            principal: None,
            credential: None,
            tool: None,
            ledger: None,
            amount: None,
            block: None,
            key_id: None,
            target: None,
            reason: None,
        }
    }

    /// Construct an `auth.rejected` event
    #[must_use]
    pub fn auth_rejected(credential: &'static str, reason: impl Into<String>) -> Self {
        Self {
            credential: Some(credential),
            reason: Some(reason.into()),
            ..Self::bare("auth.rejected")
        }
    }

    /// Construct a `tool.forbidden` event: authenticated, but short of the
    /// tool's scopes
    #[must_use]
    pub fn tool_forbidden(caller: &Principal, tool: &str, reason: impl Into<String>) -> Self {
        Self {
            principal: Some(caller.clone()),
            tool: Some(tool.to_string()),
            reason: Some(reason.into()),
            ..Self::bare("tool.forbidden")
        }
    }

    /// Construct an `api_key.created` event
    #[must_use]
    pub fn api_key_created(record: &ApiKeyRecord) -> Self {
        Self {
            principal: Some(record.owner.clone()),
            key_id: Some(record.id.clone()),
            reason: Some(record.label.clone()),
            ..Self::bare("api_key.created")
        }
    }

    /// Construct an `api_key.revoked` event
    #[must_use]
    pub fn api_key_revoked(by: &Principal, key_id: &str) -> Self {
        Self {
            principal: Some(by.clone()),
            key_id: Some(key_id.to_string()),
            ..Self::bare("api_key.revoked")
        }
    }

    /// Construct a `payment.debited` event
    #[must_use]
    pub fn payment_debited(payer: &Principal, tool: &str, ledger: &str, amount: u64, block: u64) -> Self {
        Self {
            principal: Some(payer.clone()),
            tool: Some(tool.to_string()),
            ledger: Some(ledger.to_string()),
            amount: Some(amount),
            block: Some(block),
            ..Self::bare("payment.debited")
        }
    }

    /// Construct a `payment.refused` event
    #[must_use]
    pub fn payment_refused(payer: &Principal, tool: &str, reason: impl Into<String>) -> Self {
        Self {
            principal: Some(payer.clone()),
            tool: Some(tool.to_string()),
            reason: Some(reason.into()),
            ..Self::bare("payment.refused")
        }
    }

    /// Construct an `owner.changed` event
    #[must_use]
    pub fn owner_changed(previous: &Principal, next: &Principal) -> Self {
        Self {
            principal: Some(previous.clone()),
            target: Some(next.to_string()),
            ..Self::bare("owner.changed")
        }
    }

    /// Construct a `treasury.withdrawn` event
    #[must_use]
    pub fn withdrawn(owner: &Principal, ledger: &str, amount: u64, destination: &str, block: u64) -> Self {
        Self {
            principal: Some(owner.clone()),
            ledger: Some(ledger.to_string()),
            amount: Some(amount),
            target: Some(destination.to_string()),
            block: Some(block),
            ..Self::bare("treasury.withdrawn")
        }
    }

    /// Construct an `admin.denied` event
    #[must_use]
    pub fn admin_denied(caller: &Principal, operation: &str) -> Self {
        Self {
            principal: Some(caller.clone()),
            reason: Some(format!("{operation}: caller is not the owner")),
            ..Self::bare("admin.denied")
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO mcp_tollgate::audit audit={"event":"payment.debited","principal":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "tollgate audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
