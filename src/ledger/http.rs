//! JSON-over-HTTP ledger client
//!
//! Each ICRC method is a `POST <base>/<method>` with the arguments as the
//! JSON body. Transfers answer `{"Ok": <block>}` or `{"Err": <TransferError>}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::debug;

use super::{
    Account, BlockIndex, Ledger, LedgerError, TransferArgs,
    TransferError, TransferFromArgs,
};

/// Ledger reached over HTTP
pub struct HttpLedger {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpLedger {
    /// Create a client for the ledger at `url`
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, LedgerError>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base_url);
        debug!(url = %url, "Ledger call");

        let response = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .map_err(|e| self.map_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Unavailable(format!(
                "{method} returned HTTP {status}"
            )));
        }

        response.json::<R>().await.map_err(|e| self.map_reqwest(&e))
    }

    fn map_reqwest(&self, e: &reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else {
            LedgerError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn fee(&self) -> Result<u64, LedgerError> {
        self.call("icrc1_fee", &json!({})).await
    }

    async fn balance_of(&self, account: &Account) -> Result<u64, LedgerError> {
        self.call("icrc1_balance_of", account).await
    }

    async fn transfer_from(&self, args: &TransferFromArgs) -> Result<BlockIndex, LedgerError> {
        let result: Result<BlockIndex, TransferError> =
            self.call("icrc2_transfer_from", args).await?;
        result.map_err(LedgerError::Rejected)
    }

    async fn transfer(&self, args: &TransferArgs) -> Result<BlockIndex, LedgerError> {
        let result: Result<BlockIndex, TransferError> = self.call("icrc1_transfer", args).await?;
        result.map_err(LedgerError::Rejected)
    }
}
