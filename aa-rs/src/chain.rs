//! The slice of a JSON-RPC node the pipeline depends on.

use async_trait::async_trait;
use ethers::providers::{Middleware, MiddlewareError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The node executed the call and it reverted. `data` is the raw revert payload.
    #[error("execution reverted: {message}")]
    Reverted { data: Bytes, message: String },

    #[error("rpc error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// The account that pays for and signs outer transactions (also the beneficiary default).
    fn sender(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError>;

    /// `eth_call` from [`ChainProvider::sender`] against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Broadcasts a transaction and returns its hash without waiting for inclusion.
    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<H256, ChainError>;

    /// `Ok(None)` when the receipt did not show up within `timeout`.
    async fn await_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// [`ChainProvider`] over any ethers middleware stack that can sign (usually
/// `SignerMiddleware<Provider<Http>, LocalWallet>`).
#[derive(Debug)]
pub struct EthersChain<M> {
    client: Arc<M>,
    from: Address,
    poll_interval: Duration,
    confirmations: u64,
}

impl<M: Middleware> EthersChain<M> {
    pub fn new(client: Arc<M>, from: Address) -> Self {
        Self {
            client,
            from,
            poll_interval: Duration::from_millis(500),
            confirmations: 1,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Blocks (including the one holding the receipt) required before a receipt counts.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn client(&self) -> &Arc<M> {
        &self.client
    }

    async fn is_confirmed(&self, receipt: &TransactionReceipt) -> Result<bool, ChainError> {
        if self.confirmations <= 1 {
            return Ok(true);
        }
        let Some(mined_at) = receipt.block_number else {
            return Ok(false);
        };
        let head = self
            .client
            .get_block_number()
            .await
            .map_err(classify_error)?;
        Ok(head.as_u64().saturating_sub(mined_at.as_u64()) + 1 >= self.confirmations)
    }
}

#[async_trait]
impl<M> ChainProvider for EthersChain<M>
where
    M: Middleware + 'static,
{
    fn sender(&self) -> Address {
        self.from
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        let id = self.client.get_chainid().await.map_err(classify_error)?;
        u64::try_from(id).map_err(|e| ChainError::Decode(format!("chain id {id}: {e}")))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        self.client
            .get_code(address, None)
            .await
            .map_err(classify_error)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.from)
            .to(to)
            .data(data)
            .into();
        self.client.call(&tx, None).await.map_err(classify_error)
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<H256, ChainError> {
        let tx = TransactionRequest::new()
            .from(self.from)
            .to(to)
            .data(data)
            .value(value);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(classify_error)?;
        Ok(pending.tx_hash())
    }

    async fn await_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        let start = Instant::now();
        loop {
            if !timeout.is_zero() && start.elapsed() > timeout {
                return Ok(None);
            }

            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if self.is_confirmed(&receipt).await? {
                        return Ok(Some(receipt));
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    // A flaky node must not turn a sent transaction into a reported failure.
                    tracing::warn!(tx = ?tx_hash, error = %err, "receipt poll error");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Splits provider errors into reverts (with their payload) and everything else.
pub fn classify_error<E: MiddlewareError>(err: E) -> ChainError {
    let revert = err
        .as_error_response()
        .and_then(|resp| resp.as_revert_data());
    match revert {
        Some(data) => ChainError::Reverted {
            data,
            message: err.to_string(),
        },
        None => ChainError::Transport(err.to_string()),
    }
}
