//! Owner administration over HTTP.
//!
//! Business outcomes are always HTTP 200 with `{"ok": ...}` or
//! `{"err": {...}}`; only transport and auth problems use other statuses.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::router::AppState;
use crate::audit::{self, AuditEvent};
use crate::auth::AuthContext;
use crate::ledger::{Account, LedgerError};
use crate::principal::Principal;
use crate::treasury::TreasuryError;

fn reply_ok(value: impl serde::Serialize) -> Response {
    Json(json!({ "ok": value })).into_response()
}

fn reply_err(err: Value) -> Response {
    Json(json!({ "err": err })).into_response()
}

fn treasury_err(err: &TreasuryError) -> Response {
    let body = match err {
        TreasuryError::NotOwner => json!({ "NotOwner": null }),
        TreasuryError::InsufficientBalance { balance, fee } => {
            json!({ "InsufficientFunds": { "balance": balance, "fee": fee } })
        }
        TreasuryError::Ledger(LedgerError::Rejected(transfer)) => {
            json!({ "TransferError": transfer })
        }
        TreasuryError::Ledger(LedgerError::UnknownLedger(id)) => json!({ "UnknownLedger": id }),
        TreasuryError::Ledger(other) => json!({ "LedgerUnavailable": other.to_string() }),
    };
    reply_err(body)
}

/// `GET /admin/owner`
pub(super) async fn get_owner(State(state): State<Arc<AppState>>) -> Response {
    reply_ok(state.treasury.get_owner())
}

#[derive(Debug, Deserialize)]
pub(super) struct SetOwnerRequest {
    owner: Principal,
}

/// `PUT /admin/owner`
pub(super) async fn set_owner(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthContext>,
    Json(request): Json<SetOwnerRequest>,
) -> Response {
    if request.owner.as_str().is_empty() || request.owner.is_anonymous() {
        return reply_err(json!({ "InvalidOwner": request.owner }));
    }
    match state.treasury.set_owner(&caller, request.owner).await {
        Ok(()) => reply_ok(Value::Null),
        Err(e) => treasury_err(&e),
    }
}

/// `GET /admin/treasury/{ledger}`
pub(super) async fn treasury_balance(
    State(state): State<Arc<AppState>>,
    Path(ledger): Path<String>,
) -> Response {
    match state.treasury.balance(&ledger).await {
        Ok(balance) => reply_ok(json!({
            "ledger": ledger,
            "account": state.treasury.account(),
            "balance": balance,
        })),
        Err(e) => treasury_err(&e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WithdrawRequest {
    amount: u64,
    destination: Account,
}

/// `POST /admin/treasury/{ledger}/withdraw`
pub(super) async fn withdraw(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthContext>,
    Path(ledger): Path<String>,
    Json(request): Json<WithdrawRequest>,
) -> Response {
    if let Err(reason) = request.destination.check() {
        return reply_err(json!({ "InvalidDestination": reason }));
    }
    match state
        .treasury
        .withdraw(&caller, &ledger, request.amount, request.destination)
        .await
    {
        Ok(block) => reply_ok(json!({ "block": block })),
        Err(e) => treasury_err(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct CreateKeyRequest {
    label: String,
    scopes: BTreeSet<String>,
}

/// `POST /admin/api-keys`: the plaintext key is in this response only
pub(super) async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthContext>,
    Json(request): Json<CreateKeyRequest>,
) -> Response {
    let guard = match state.treasury.authorize(&caller).await {
        Ok(guard) => guard,
        Err(e) => return treasury_err(&e),
    };
    let (record, key) = state
        .api_keys
        .create(guard.owner().clone(), request.label, request.scopes);
    info!(key_id = %record.id, label = %record.label, "API key created");
    audit::emit(&AuditEvent::api_key_created(&record));
    reply_ok(json!({ "key": key, "record": record }))
}

/// `GET /admin/api-keys`
pub(super) async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthContext>,
) -> Response {
    match state.treasury.authorize(&caller).await {
        Ok(_guard) => reply_ok(state.api_keys.list()),
        Err(e) => treasury_err(&e),
    }
}

/// `DELETE /admin/api-keys/{id}`
pub(super) async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    let guard = match state.treasury.authorize(&caller).await {
        Ok(guard) => guard,
        Err(e) => return treasury_err(&e),
    };
    if state.api_keys.revoke(&id) {
        info!(key_id = %id, "API key revoked");
        audit::emit(&AuditEvent::api_key_revoked(guard.owner(), &id));
        reply_ok(Value::Null)
    } else {
        reply_err(json!({ "UnknownKey": id }))
    }
}
