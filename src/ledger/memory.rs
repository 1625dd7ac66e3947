//! In-process ICRC-2 style ledger.
//!
//! Holds balances and allowances in memory and applies the same fee and
//! deduplication rules as a real ledger. It can also serve itself over the
//! JSON wire that [`HttpLedger`](super::HttpLedger) speaks, which is how the
//! integration tests stand up a ledger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{Json, Router, extract::State, routing::post};
use parking_lot::Mutex;
use serde::Deserialize;

use super::{
    Account, BlockIndex, Ledger, LedgerError, TransferArgs,
    TransferError, TransferFromArgs,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    from: Account,
    to: Account,
    amount: u64,
    memo: String,
    created_at_time: u64,
}

#[derive(Default)]
struct Book {
    balances: HashMap<Account, u64>,
    allowances: HashMap<(Account, Account), u64>,
    applied: HashMap<DedupKey, BlockIndex>,
    next_block: BlockIndex,
    failures_left: usize,
}

impl Book {
    fn block(&mut self) -> BlockIndex {
        let block = self.next_block;
        self.next_block += 1;
        block
    }

    fn balance(&self, account: &Account) -> u64 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn take_failure(&mut self) -> bool {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            true
        } else {
            false
        }
    }
}

/// Ledger kept in process memory
pub struct InMemoryLedger {
    fee: u64,
    state: Mutex<Book>,
}

/// `icrc2_approve` body on the JSON wire
#[derive(Debug, Deserialize)]
pub struct ApproveArgs {
    /// Granting account
    pub from: Account,
    /// Spending account
    pub spender: Account,
    /// New allowance
    pub amount: u64,
}

impl InMemoryLedger {
    /// Empty ledger charging `fee` per transfer and approval
    #[must_use]
    pub fn new(fee: u64) -> Self {
        Self {
            fee,
            state: Mutex::new(Book::default()),
        }
    }

    /// Credit `amount` out of thin air
    pub fn mint(&self, to: &Account, amount: u64) -> BlockIndex {
        let mut state = self.state.lock();
        let balance = state.balances.entry(to.clone()).or_default();
        *balance = balance.saturating_add(amount);
        state.block()
    }

    /// Set the allowance `from` grants `spender`, charging the fee to `from`
    ///
    /// # Errors
    ///
    /// [`TransferError::InsufficientFunds`] if `from` cannot pay the fee.
    pub fn approve(
        &self,
        from: &Account,
        spender: &Account,
        amount: u64,
    ) -> Result<BlockIndex, TransferError> {
        let mut state = self.state.lock();
        let balance = state.balance(from);
        if balance < self.fee {
            return Err(TransferError::InsufficientFunds { balance });
        }
        state.balances.insert(from.clone(), balance - self.fee);
        state
            .allowances
            .insert((from.clone(), spender.clone()), amount);
        Ok(state.block())
    }

    /// Make the next `n` transfers fail with `TemporarilyUnavailable`
    pub fn fail_next_transfers(&self, n: usize) {
        self.state.lock().failures_left = n;
    }

    /// Serve the ledger's JSON wire
    pub fn routes(ledger: Arc<Self>) -> Router {
        Router::new()
            .route("/icrc1_fee", post(fee_handler))
            .route("/icrc1_balance_of", post(balance_handler))
            .route("/icrc2_approve", post(approve_handler))
            .route("/icrc2_transfer_from", post(transfer_from_handler))
            .route("/icrc1_transfer", post(transfer_handler))
            .with_state(ledger)
    }

    fn check_fee(&self, declared: Option<u64>) -> Result<u64, TransferError> {
        match declared {
            Some(fee) if fee != self.fee => Err(TransferError::BadFee {
                expected_fee: self.fee,
            }),
            _ => Ok(self.fee),
        }
    }

    fn total(amount: u64, fee: u64) -> Result<u64, TransferError> {
        amount.checked_add(fee).ok_or(TransferError::GenericError {
            error_code: 1,
            message: "amount overflow".to_string(),
        })
    }

    fn dedup_key(
        from: &Account,
        to: &Account,
        amount: u64,
        memo: Option<&String>,
        created_at_time: Option<u64>,
    ) -> Option<DedupKey> {
        Some(DedupKey {
            from: from.clone(),
            to: to.clone(),
            amount,
            memo: memo?.clone(),
            created_at_time: created_at_time?,
        })
    }

    /// Debit `total` from `from`, credit `amount` to `to`
    fn apply(state: &mut Book, from: &Account, to: &Account, amount: u64, total: u64) {
        let from_balance = state.balance(from);
        state.balances.insert(from.clone(), from_balance - total);
        let to_balance = state.balances.entry(to.clone()).or_default();
        *to_balance = to_balance.saturating_add(amount);
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn fee(&self) -> Result<u64, LedgerError> {
        Ok(self.fee)
    }

    async fn balance_of(&self, account: &Account) -> Result<u64, LedgerError> {
        Ok(self.state.lock().balance(account))
    }

    async fn transfer_from(&self, args: &TransferFromArgs) -> Result<BlockIndex, LedgerError> {
        let fee = self.check_fee(args.fee)?;
        let total = Self::total(args.amount, fee)?;

        let mut state = self.state.lock();
        if state.take_failure() {
            return Err(TransferError::TemporarilyUnavailable.into());
        }

        let key = Self::dedup_key(
            &args.from,
            &args.to,
            args.amount,
            args.memo.as_ref(),
            args.created_at_time,
        );
        if let Some(&duplicate_of) = key.as_ref().and_then(|k| state.applied.get(k)) {
            return Err(TransferError::Duplicate { duplicate_of }.into());
        }

        let grant = (args.from.clone(), args.spender.clone());
        let allowance = state.allowances.get(&grant).copied().unwrap_or_default();
        if allowance < total {
            return Err(TransferError::InsufficientAllowance { allowance }.into());
        }
        let balance = state.balance(&args.from);
        if balance < total {
            return Err(TransferError::InsufficientFunds { balance }.into());
        }

        state.allowances.insert(grant, allowance - total);
        Self::apply(&mut state, &args.from, &args.to, args.amount, total);
        let block = state.block();
        if let Some(key) = key {
            state.applied.insert(key, block);
        }
        Ok(block)
    }

    async fn transfer(&self, args: &TransferArgs) -> Result<BlockIndex, LedgerError> {
        let fee = self.check_fee(args.fee)?;
        let total = Self::total(args.amount, fee)?;

        let mut state = self.state.lock();
        if state.take_failure() {
            return Err(TransferError::TemporarilyUnavailable.into());
        }

        let key = Self::dedup_key(
            &args.from,
            &args.to,
            args.amount,
            args.memo.as_ref(),
            args.created_at_time,
        );
        if let Some(&duplicate_of) = key.as_ref().and_then(|k| state.applied.get(k)) {
            return Err(TransferError::Duplicate { duplicate_of }.into());
        }

        let balance = state.balance(&args.from);
        if balance < total {
            return Err(TransferError::InsufficientFunds { balance }.into());
        }

        Self::apply(&mut state, &args.from, &args.to, args.amount, total);
        let block = state.block();
        if let Some(key) = key {
            state.applied.insert(key, block);
        }
        Ok(block)
    }
}

type Shared = State<Arc<InMemoryLedger>>;
type TransferReply = Json<Result<BlockIndex, TransferError>>;

async fn fee_handler(State(ledger): Shared) -> Json<u64> {
    Json(ledger.fee)
}

async fn balance_handler(State(ledger): Shared, Json(account): Json<Account>) -> Json<u64> {
    Json(ledger.state.lock().balance(&account))
}

async fn approve_handler(State(ledger): Shared, Json(args): Json<ApproveArgs>) -> TransferReply {
    Json(ledger.approve(&args.from, &args.spender, args.amount))
}

async fn transfer_from_handler(
    State(ledger): Shared,
    Json(args): Json<TransferFromArgs>,
) -> TransferReply {
    Json(rejection_only(ledger.transfer_from(&args).await))
}

async fn transfer_handler(State(ledger): Shared, Json(args): Json<TransferArgs>) -> TransferReply {
    Json(rejection_only(ledger.transfer(&args).await))
}

/// The in-memory ledger only ever fails with a rejection
fn rejection_only(result: Result<BlockIndex, LedgerError>) -> Result<BlockIndex, TransferError> {
    result.map_err(|e| match e {
        LedgerError::Rejected(reason) => reason,
        other => TransferError::GenericError {
            error_code: 0,
            message: other.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Principal;

    const FEE: u64 = 10_000;

    fn account(name: &str) -> Account {
        Account::of(Principal::new(name))
    }

    fn pull(amount: u64, memo: Option<&str>) -> TransferFromArgs {
        TransferFromArgs {
            spender: account("gateway"),
            from: account("user"),
            to: account("treasury"),
            amount,
            fee: None,
            memo: memo.map(str::to_string),
            created_at_time: memo.map(|_| 1),
        }
    }

    #[tokio::test]
    async fn approval_and_transfer_from_charge_fees() {
        // GIVEN: a funded user who approved the gateway
        let ledger = InMemoryLedger::new(FEE);
        ledger.mint(&account("user"), 1_000_000_000);
        ledger.approve(&account("user"), &account("gateway"), 5_000_000).unwrap();

        // WHEN: the gateway pulls one million
        ledger.transfer_from(&pull(1_000_000, None)).await.unwrap();

        // THEN: user paid amount + transfer fee + approval fee
        assert_eq!(
            ledger.balance_of(&account("user")).await.unwrap(),
            1_000_000_000 - 1_000_000 - FEE - FEE
        );
        assert_eq!(ledger.balance_of(&account("treasury")).await.unwrap(), 1_000_000);
        let left = ledger
            .state
            .lock()
            .allowances
            .get(&(account("user"), account("gateway")))
            .copied();
        assert_eq!(left, Some(5_000_000 - 1_000_000 - FEE));
    }

    #[tokio::test]
    async fn allowance_must_cover_the_fee_too() {
        let ledger = InMemoryLedger::new(FEE);
        ledger.mint(&account("user"), 1_000_000);
        ledger.approve(&account("user"), &account("gateway"), 100).unwrap();

        let err = ledger.transfer_from(&pull(100, None)).await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Rejected(TransferError::InsufficientAllowance { allowance: 100 })
        ));
        assert_eq!(ledger.balance_of(&account("treasury")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_memo_is_a_duplicate() {
        let ledger = InMemoryLedger::new(FEE);
        ledger.mint(&account("user"), 1_000_000);
        ledger.approve(&account("user"), &account("gateway"), 500_000).unwrap();

        let block = ledger.transfer_from(&pull(100, Some("m1"))).await.unwrap();
        let err = ledger.transfer_from(&pull(100, Some("m1"))).await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Rejected(TransferError::Duplicate { duplicate_of }) if duplicate_of == block
        ));
        assert_eq!(ledger.balance_of(&account("treasury")).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn transfer_needs_amount_plus_fee() {
        let ledger = InMemoryLedger::new(FEE);
        ledger.mint(&account("treasury"), 50_000);

        let args = |amount| TransferArgs {
            from: account("treasury"),
            to: account("dest"),
            amount,
            fee: Some(FEE),
            memo: None,
            created_at_time: None,
        };

        assert!(ledger.transfer(&args(50_000)).await.is_err());
        ledger.transfer(&args(40_000)).await.unwrap();
        assert_eq!(ledger.balance_of(&account("treasury")).await.unwrap(), 0);
        assert_eq!(ledger.balance_of(&account("dest")).await.unwrap(), 40_000);
    }

    #[tokio::test]
    async fn wrong_declared_fee_is_refused() {
        let ledger = InMemoryLedger::new(FEE);
        let err = ledger
            .transfer(&TransferArgs {
                from: account("a"),
                to: account("b"),
                amount: 1,
                fee: Some(1),
                memo: None,
                created_at_time: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected(TransferError::BadFee { expected_fee: FEE })
        ));
    }

    #[tokio::test]
    async fn injected_failures_are_temporary() {
        let ledger = InMemoryLedger::new(FEE);
        ledger.mint(&account("user"), 1_000_000);
        ledger.approve(&account("user"), &account("gateway"), 500_000).unwrap();
        ledger.fail_next_transfers(1);

        let first = ledger.transfer_from(&pull(100, None)).await.unwrap_err();
        assert!(first.is_transient());
        assert!(ledger.transfer_from(&pull(100, None)).await.is_ok());
    }

    #[test]
    fn approve_without_funds_for_fee_fails() {
        let ledger = InMemoryLedger::new(FEE);
        assert!(matches!(
            ledger.approve(&account("user"), &account("gateway"), 1),
            Err(TransferError::InsufficientFunds { balance: 0 })
        ));
    }
}
