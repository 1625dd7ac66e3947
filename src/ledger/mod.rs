//! Token ledger client.
//!
//! The gateway never keeps balances itself. It moves tokens through an
//! external ICRC-2 style ledger: callers approve the gateway as a spender,
//! the gateway pulls the tool price with `transfer_from`, and the owner
//! withdraws with a plain `transfer`. Every transfer costs the ledger fee on
//! top of the transferred amount.

mod http;
mod memory;

pub use self::http::HttpLedger;
pub use self::memory::InMemoryLedger;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::principal::Principal;

/// Position of a transfer in the ledger's block log
pub type BlockIndex = u64;

/// Ledger account: a principal plus an optional subaccount
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// Owning principal
    pub owner: Principal,
    /// Subaccount, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<String>,
}

impl Account {
    /// Default subaccount of `owner`
    #[must_use]
    pub fn of(owner: Principal) -> Self {
        Self {
            owner,
            subaccount: None,
        }
    }

    /// Check that the owner is set and the subaccount, if any, is 32 bytes
    /// of hex.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem.
    pub fn check(&self) -> Result<(), String> {
        if self.owner.as_str().is_empty() {
            return Err("account owner is empty".to_string());
        }
        if let Some(sub) = &self.subaccount {
            let bytes = hex::decode(sub).map_err(|e| format!("subaccount is not hex: {e}"))?;
            if bytes.len() != 32 {
                return Err(format!("subaccount must be 32 bytes, got {}", bytes.len()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subaccount {
            Some(sub) => write!(f, "{}.{sub}", self.owner),
            None => write!(f, "{}", self.owner),
        }
    }
}

/// `icrc1_transfer` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferArgs {
    /// Debited account; the ledger trusts the gateway for its own accounts
    pub from: Account,
    /// Credited account
    pub to: Account,
    /// Amount credited to `to`
    pub amount: u64,
    /// Expected fee; the ledger rejects a mismatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    /// Deduplication memo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Deduplication timestamp (nanoseconds since the epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_time: Option<u64>,
}

/// `icrc2_transfer_from` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFromArgs {
    /// Account spending the allowance (the gateway's)
    pub spender: Account,
    /// Account the allowance was granted from
    pub from: Account,
    /// Credited account
    pub to: Account,
    /// Amount credited to `to`
    pub amount: u64,
    /// Expected fee; the ledger rejects a mismatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    /// Deduplication memo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Deduplication timestamp (nanoseconds since the epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_time: Option<u64>,
}

/// Ledger refusal of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransferError {
    /// The declared fee differs from the ledger's
    #[error("bad fee, expected {expected_fee}")]
    BadFee {
        /// Fee the ledger charges
        expected_fee: u64,
    },
    /// The debited account cannot cover amount plus fee
    #[error("insufficient funds, balance {balance}")]
    InsufficientFunds {
        /// Current balance
        balance: u64,
    },
    /// The allowance cannot cover amount plus fee
    #[error("insufficient allowance, allowance {allowance}")]
    InsufficientAllowance {
        /// Current allowance
        allowance: u64,
    },
    /// `created_at_time` is outside the deduplication window
    #[error("transaction too old")]
    TooOld,
    /// `created_at_time` lies in the future
    #[error("transaction created in the future (ledger time {ledger_time})")]
    CreatedInFuture {
        /// Ledger clock
        ledger_time: u64,
    },
    /// An identical transfer was already applied
    #[error("duplicate of block {duplicate_of}")]
    Duplicate {
        /// Block of the original transfer
        duplicate_of: BlockIndex,
    },
    /// The ledger cannot process transfers right now
    #[error("ledger temporarily unavailable")]
    TemporarilyUnavailable,
    /// Any other refusal
    #[error("ledger error {error_code}: {message}")]
    GenericError {
        /// Ledger-specific code
        error_code: u64,
        /// Description
        message: String,
    },
}

/// Failure of a ledger call
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger answered and refused
    #[error("transfer rejected: {0}")]
    Rejected(TransferError),

    /// The ledger could not be reached or answered garbage
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish in time; its outcome is unknown
    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    /// No ledger is registered under the id
    #[error("unknown ledger: {0}")]
    UnknownLedger(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Timeout(_)
                | Self::Rejected(TransferError::TemporarilyUnavailable)
        )
    }
}

impl From<TransferError> for LedgerError {
    fn from(e: TransferError) -> Self {
        Self::Rejected(e)
    }
}

/// ICRC-1/ICRC-2 ledger operations used by the gateway
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fee charged per transfer or approval
    async fn fee(&self) -> Result<u64, LedgerError>;

    /// Balance of `account`
    async fn balance_of(&self, account: &Account) -> Result<u64, LedgerError>;

    /// Move `amount` from an approving account, consuming `amount + fee` of
    /// the allowance
    async fn transfer_from(&self, args: &TransferFromArgs) -> Result<BlockIndex, LedgerError>;

    /// Move `amount` from one of the gateway's accounts, paying `fee` on top
    async fn transfer(&self, args: &TransferArgs) -> Result<BlockIndex, LedgerError>;
}

/// Ledgers addressable by id
#[derive(Clone, Default)]
pub struct LedgerRegistry {
    ledgers: HashMap<String, Arc<dyn Ledger>>,
}

impl LedgerRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP clients for every configured ledger
    ///
    /// # Errors
    ///
    /// Fails if an HTTP client cannot be built.
    pub fn from_config(
        ledgers: &HashMap<String, LedgerConfig>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let mut registry = Self::new();
        for (id, config) in ledgers {
            registry.insert(id.clone(), Arc::new(HttpLedger::new(&config.url, timeout)?));
        }
        Ok(registry)
    }

    /// Register `ledger` under `id`, replacing any previous entry
    pub fn insert(&mut self, id: impl Into<String>, ledger: Arc<dyn Ledger>) {
        self.ledgers.insert(id.into(), ledger);
    }

    /// Ledger registered under `id`
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownLedger`] if none is.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Ledger>, LedgerError> {
        self.ledgers
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownLedger(id.to_string()))
    }
}

/// Fresh deduplication memo
#[must_use]
pub fn new_memo() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current time in nanoseconds since the epoch, for `created_at_time`
#[must_use]
pub fn now_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default()
}
