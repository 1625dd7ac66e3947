//! Treasury ownership and withdrawals.
//!
//! Exactly one principal owns the treasury at any time. Ownership changes,
//! withdrawals and other owner-only operations all run under the same
//! owner lock, and the owner check happens after the lock is taken, so a
//! previous owner loses every privilege the moment `set_owner` returns.
//!
//! Being the owner principal is not enough: the request must also come
//! through a context that may administer (see
//! [`AuthContext::may_administer`]), so an ordinary API key minted by the
//! owner cannot move funds or ownership.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::audit::{self, AuditEvent};
use crate::auth::AuthContext;
use crate::ledger::{
    Account, BlockIndex, LedgerError, LedgerRegistry, TransferArgs, TransferError, new_memo,
    now_nanos,
};
use crate::principal::Principal;

/// Failure of a treasury operation
#[derive(Debug, thiserror::Error)]
pub enum TreasuryError {
    /// The caller is not the current owner
    #[error("caller is not the owner")]
    NotOwner,

    /// The balance cannot cover amount plus the transfer fee
    #[error("insufficient balance {balance} for amount plus fee {fee}")]
    InsufficientBalance {
        /// Current treasury balance
        balance: u64,
        /// Ledger transfer fee
        fee: u64,
    },

    /// The ledger failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Proof that the caller owned the treasury when the guard was taken.
/// Ownership cannot change while it is held.
pub struct OwnerGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    owner: Principal,
}

impl OwnerGuard<'_> {
    /// The verified owner
    #[must_use]
    pub fn owner(&self) -> &Principal {
        &self.owner
    }
}

/// Owner-controlled treasury
pub struct Treasury {
    owner: RwLock<Principal>,
    account: Account,
    ledgers: LedgerRegistry,
    owner_lock: Mutex<()>,
    timeout: Duration,
}

impl Treasury {
    /// Treasury owned by `owner`, holding funds in `account` on `ledgers`
    #[must_use]
    pub fn new(owner: Principal, account: Account, ledgers: LedgerRegistry, timeout: Duration) -> Self {
        Self {
            owner: RwLock::new(owner),
            account,
            ledgers,
            owner_lock: Mutex::new(()),
            timeout,
        }
    }

    /// Current owner
    #[must_use]
    pub fn get_owner(&self) -> Principal {
        self.owner.read().clone()
    }

    /// Ledger account receiving payments
    #[must_use]
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Take the owner lock on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// [`TreasuryError::NotOwner`] unless `caller` is the current owner and
    /// may administer.
    pub async fn authorize(&self, caller: &AuthContext) -> Result<OwnerGuard<'_>, TreasuryError> {
        let lock = self.owner_lock.lock().await;
        if !caller.may_administer() || *self.owner.read() != caller.principal {
            audit::emit(&AuditEvent::admin_denied(&caller.principal, "owner operation"));
            return Err(TreasuryError::NotOwner);
        }
        Ok(OwnerGuard {
            _lock: lock,
            owner: caller.principal.clone(),
        })
    }

    /// Replace the owner.
    ///
    /// # Errors
    ///
    /// [`TreasuryError::NotOwner`] unless `caller` is the current owner.
    pub async fn set_owner(&self, caller: &AuthContext, new_owner: Principal) -> Result<(), TreasuryError> {
        let guard = self.authorize(caller).await?;
        *self.owner.write() = new_owner.clone();
        info!(previous = %guard.owner(), owner = %new_owner, "Treasury owner changed");
        audit::emit(&AuditEvent::owner_changed(guard.owner(), &new_owner));
        Ok(())
    }

    /// Treasury balance on `ledger`
    ///
    /// # Errors
    ///
    /// Fails for an unknown ledger or a failed ledger call.
    pub async fn balance(&self, ledger: &str) -> Result<u64, TreasuryError> {
        let client = self.ledgers.get(ledger)?;
        let balance = tokio::time::timeout(self.timeout, client.balance_of(&self.account))
            .await
            .unwrap_or(Err(LedgerError::Timeout(self.timeout)))?;
        Ok(balance)
    }

    /// Send `amount` from the treasury to `destination`; the treasury pays
    /// the transfer fee on top.
    ///
    /// # Errors
    ///
    /// [`TreasuryError::NotOwner`] for any caller but the owner,
    /// [`TreasuryError::InsufficientBalance`] when `amount + fee` exceeds the
    /// balance, or the ledger's failure. The balance is unchanged on error.
    pub async fn withdraw(
        &self,
        caller: &AuthContext,
        ledger: &str,
        amount: u64,
        destination: Account,
    ) -> Result<BlockIndex, TreasuryError> {
        let guard = self.authorize(caller).await?;
        let client = self.ledgers.get(ledger)?;

        let fee = tokio::time::timeout(self.timeout, client.fee())
            .await
            .unwrap_or(Err(LedgerError::Timeout(self.timeout)))?;
        let balance = self.balance(ledger).await?;
        if amount.checked_add(fee).is_none_or(|total| total > balance) {
            warn!(amount, fee, balance, "Withdrawal exceeds treasury balance");
            return Err(TreasuryError::InsufficientBalance { balance, fee });
        }

        let args = TransferArgs {
            from: self.account.clone(),
            to: destination.clone(),
            amount,
            fee: Some(fee),
            memo: Some(new_memo()),
            created_at_time: Some(now_nanos()),
        };
        let block = match tokio::time::timeout(self.timeout, client.transfer(&args))
            .await
            .unwrap_or(Err(LedgerError::Timeout(self.timeout)))
        {
            Ok(block)
            | Err(LedgerError::Rejected(TransferError::Duplicate {
                duplicate_of: block,
            })) => block,
            Err(e) => return Err(e.into()),
        };

        info!(ledger = %ledger, amount, destination = %destination, block, "Treasury withdrawal");
        audit::emit(&AuditEvent::withdrawn(
            guard.owner(),
            ledger,
            amount,
            &destination.to_string(),
            block,
        ));
        Ok(block)
    }
}
