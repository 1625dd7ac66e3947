//! Payment gate for priced tools.
//!
//! Before a priced tool runs, the gate pulls its price from the caller's
//! allowance into the treasury account with one `transfer_from`. The tool
//! only runs after that transfer is confirmed.
//!
//! Each ledger call is bounded by a timeout. Transient failures (timeout,
//! network, `TemporarilyUnavailable`) are retried once with the same memo
//! and timestamp, so a first attempt that did land is reported by the
//! ledger as `Duplicate` and counted as paid instead of charged twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEvent};
use crate::auth::AuthContext;
use crate::config::PaymentConfig;
use crate::ledger::{
    Account, BlockIndex, Ledger, LedgerError, LedgerRegistry, TransferError, TransferFromArgs,
    new_memo, now_nanos,
};
use crate::metrics;
use crate::protocol::ToolsCallResult;

/// Why a priced call was not paid for
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The caller's allowance does not cover price plus fee
    #[error("Insufficient allowance")]
    InsufficientAllowance {
        /// Allowance the ledger reported
        allowance: u64,
    },

    /// The caller's balance does not cover price plus fee
    #[error("Insufficient funds")]
    InsufficientFunds {
        /// Balance the ledger reported
        balance: u64,
    },

    /// Anonymous callers have no account to charge
    #[error("payment requires an authenticated caller")]
    Anonymous,

    /// The ledger failed or refused for another reason
    #[error("ledger error: {0}")]
    Ledger(LedgerError),
}

/// Proof of payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Amount credited to the treasury
    pub amount: u64,
    /// Ledger block of the transfer
    pub block: BlockIndex,
}

/// Charges priced tools against caller allowances
pub struct PaymentGate {
    ledger_id: String,
    ledger: Arc<dyn Ledger>,
    treasury: Account,
    prices: HashMap<String, u64>,
    allowance_url: String,
    timeout: Duration,
    retry_delay: Duration,
}

impl PaymentGate {
    /// Build the gate, or `None` when payments are disabled.
    ///
    /// `treasury` is both the spender the callers approve and the account
    /// receiving payments.
    ///
    /// # Errors
    ///
    /// Fails if the configured ledger is not registered.
    pub fn from_config(
        config: &PaymentConfig,
        ledgers: &LedgerRegistry,
        treasury: Account,
    ) -> Result<Option<Self>, LedgerError> {
        if !config.enabled {
            return Ok(None);
        }
        Ok(Some(Self {
            ledger_id: config.ledger.clone(),
            ledger: ledgers.get(&config.ledger)?,
            treasury,
            prices: config.prices.clone(),
            allowance_url: config.allowance_url.clone(),
            timeout: config.ledger_timeout,
            retry_delay: config.retry_delay,
        }))
    }

    /// Price of `tool`, if it is priced
    #[must_use]
    pub fn price(&self, tool: &str) -> Option<u64> {
        self.prices.get(tool).copied().filter(|p| *p > 0)
    }

    /// Ledger id payments go through
    #[must_use]
    pub fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Charge `caller` for one call of `tool`.
    ///
    /// Returns `Ok(None)` for free tools.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentError`] when the payment did not happen. The tool
    /// must not run in that case. Unauthenticated contexts never pay,
    /// whatever their principal is called.
    pub async fn charge(
        &self,
        caller: &AuthContext,
        tool: &str,
    ) -> Result<Option<Receipt>, PaymentError> {
        let Some(price) = self.price(tool) else {
            return Ok(None);
        };
        if !caller.is_authenticated() {
            return Err(PaymentError::Anonymous);
        }
        let payer = &caller.principal;

        let args = TransferFromArgs {
            spender: self.treasury.clone(),
            from: Account::of(payer.clone()),
            to: self.treasury.clone(),
            amount: price,
            fee: None,
            memo: Some(new_memo()),
            created_at_time: Some(now_nanos()),
        };
        debug!(payer = %payer, tool = %tool, price, "Charging for tool call");

        let result = (|| self.transfer_once(&args))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.retry_delay)
                    .with_max_times(1),
            )
            .when(LedgerError::is_transient)
            .notify(|e, delay| warn!(tool = %tool, error = %e, ?delay, "Retrying ledger transfer"))
            .await;

        match result {
            Ok(block) | Err(LedgerError::Rejected(TransferError::Duplicate { duplicate_of: block })) => {
                info!(payer = %payer, tool = %tool, price, block, "Payment received");
                audit::emit(&AuditEvent::payment_debited(payer, tool, &self.ledger_id, price, block));
                metrics::payment(tool, "debited");
                Ok(Some(Receipt {
                    amount: price,
                    block,
                }))
            }
            Err(e) => {
                let err = match e {
                    LedgerError::Rejected(TransferError::InsufficientAllowance { allowance }) => {
                        PaymentError::InsufficientAllowance { allowance }
                    }
                    LedgerError::Rejected(TransferError::InsufficientFunds { balance }) => {
                        PaymentError::InsufficientFunds { balance }
                    }
                    other => PaymentError::Ledger(other),
                };
                warn!(payer = %payer, tool = %tool, error = %err, "Payment refused");
                audit::emit(&AuditEvent::payment_refused(payer, tool, err.to_string()));
                metrics::payment(tool, "refused");
                Err(err)
            }
        }
    }

    async fn transfer_once(&self, args: &TransferFromArgs) -> Result<BlockIndex, LedgerError> {
        tokio::time::timeout(self.timeout, self.ledger.transfer_from(args))
            .await
            .unwrap_or(Err(LedgerError::Timeout(self.timeout)))
    }

    /// Tool result explaining a refused payment
    #[must_use]
    pub fn refusal(&self, tool: &str, err: &PaymentError) -> ToolsCallResult {
        let price = self.price(tool).unwrap_or_default();
        let message = match err {
            PaymentError::InsufficientAllowance { allowance } => format!(
                "Insufficient allowance: calling {tool} costs {price} plus the ledger fee, \
                 the current allowance for {} is {allowance}. \
                 Approve a larger allowance at {}",
                self.treasury, self.allowance_url
            ),
            PaymentError::InsufficientFunds { balance } => format!(
                "Insufficient funds: calling {tool} costs {price} plus the ledger fee, \
                 the balance is {balance}. Manage your allowances at {}",
                self.allowance_url
            ),
            PaymentError::Anonymous => {
                format!("Payment required: {tool} costs {price} and needs an authenticated caller")
            }
            PaymentError::Ledger(_) => format!(
                "Payment failed: the ledger could not process the charge for {tool}. \
                 The tool was not run. Try again later."
            ),
        };
        ToolsCallResult::failure(message, Some(json!({})))
    }
}
