//! Simulate-then-send dispatch of a signed operation through `handleOps`.
//!
//! Each stage consumes the previous one, so the same simulated operation cannot be
//! sent twice through this API. Failures are returned, never retried.

use crate::builder::SignedOperation;
use crate::calls::Revert;
use crate::chain::{ChainError, ChainProvider};
use crate::entrypoint::handle_ops_calldata;
use crate::error::{Result, UserOpError};
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Built,
    Signed,
    Simulated,
    Submitted,
    Finalized,
    SimulationFailed,
    SubmissionFailed,
}

#[derive(Clone, Debug)]
pub struct SimulatedOperation {
    signed: SignedOperation,
}

#[derive(Clone, Debug)]
pub struct SubmittedOperation {
    signed: SignedOperation,
    tx_hash: H256,
}

#[derive(Clone, Debug)]
pub struct FinalizedOperation {
    signed: SignedOperation,
    receipt: TransactionReceipt,
}

impl SimulatedOperation {
    pub fn signed(&self) -> &SignedOperation {
        &self.signed
    }

    pub fn into_signed(self) -> SignedOperation {
        self.signed
    }
}

impl SubmittedOperation {
    pub fn tx_hash(&self) -> H256 {
        self.tx_hash
    }
}

impl FinalizedOperation {
    pub fn signed(&self) -> &SignedOperation {
        &self.signed
    }

    pub fn receipt(&self) -> &TransactionReceipt {
        &self.receipt
    }
}

#[derive(Debug)]
pub struct Submitter<'a, C: ?Sized> {
    chain: &'a C,
    entry_point: Address,
    beneficiary: Address,
    receipt_timeout: Duration,
}

impl<'a, C: ChainProvider + ?Sized> Submitter<'a, C> {
    /// Fees are refunded to the transaction sender unless a beneficiary is set.
    pub fn new(chain: &'a C, entry_point: Address) -> Self {
        Self {
            chain,
            entry_point,
            beneficiary: chain.sender(),
            receipt_timeout: Duration::from_secs(180),
        }
    }

    pub fn with_beneficiary(mut self, beneficiary: Address) -> Self {
        self.beneficiary = beneficiary;
        self
    }

    /// Zero waits without bound.
    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Dry run of `handleOps([op], beneficiary)` via `eth_call`. Nothing is spent.
    pub async fn simulate(&self, signed: SignedOperation) -> Result<SimulatedOperation> {
        let data = handle_ops_calldata(vec![signed.operation().clone()], self.beneficiary);
        match self.chain.call(self.entry_point, data).await {
            Ok(_) => {
                tracing::info!(stage = ?Stage::Simulated, digest = ?signed.digest(), "handleOps simulation passed");
                Ok(SimulatedOperation { signed })
            }
            Err(err) => {
                let err = revert_to_error(err);
                tracing::warn!(stage = ?Stage::SimulationFailed, error = %err, "handleOps simulation failed");
                Err(err)
            }
        }
    }

    pub async fn send(&self, simulated: SimulatedOperation) -> Result<SubmittedOperation> {
        let signed = simulated.signed;
        let data = handle_ops_calldata(vec![signed.operation().clone()], self.beneficiary);

        match self
            .chain
            .send_transaction(self.entry_point, data, U256::zero())
            .await
        {
            Ok(tx_hash) => {
                tracing::info!(stage = ?Stage::Submitted, tx = ?tx_hash, "handleOps sent");
                Ok(SubmittedOperation { signed, tx_hash })
            }
            // The node refused while preparing the transaction; nothing was broadcast.
            Err(err @ ChainError::Reverted { .. }) => Err(revert_to_error(err)),
            Err(err) => {
                tracing::warn!(stage = ?Stage::SubmissionFailed, error = %err, "handleOps send failed; outcome unknown");
                Err(UserOpError::SubmissionFailed {
                    tx_hash: None,
                    reason: err.to_string(),
                })
            }
        }
    }

    pub async fn finalize(&self, submitted: SubmittedOperation) -> Result<FinalizedOperation> {
        let SubmittedOperation { signed, tx_hash } = submitted;

        let receipt = match self.chain.await_receipt(tx_hash, self.receipt_timeout).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                return Err(UserOpError::SubmissionFailed {
                    tx_hash: Some(tx_hash),
                    reason: format!("no receipt after {:?}", self.receipt_timeout),
                })
            }
            Err(err) => {
                return Err(UserOpError::SubmissionFailed {
                    tx_hash: Some(tx_hash),
                    reason: err.to_string(),
                })
            }
        };

        if receipt.status != Some(U64::from(1)) {
            return Err(UserOpError::MinedReverted { tx_hash });
        }

        tracing::info!(
            stage = ?Stage::Finalized,
            tx = ?tx_hash,
            block = receipt.block_number.map(|b| b.as_u64()),
            gas_used = ?receipt.gas_used,
            "handleOps mined"
        );
        Ok(FinalizedOperation { signed, receipt })
    }
}

fn revert_to_error(err: ChainError) -> UserOpError {
    match err {
        ChainError::Reverted { data, message } => {
            let revert = Revert::decode(&data);
            if revert.is_nonce_rejection() {
                return UserOpError::ReplayRejected {
                    reason: revert.reason(),
                };
            }
            let reason = match &revert {
                Revert::Unknown(raw) if raw.is_empty() => message,
                _ => revert.reason(),
            };
            UserOpError::SimulationReverted { reason, data }
        }
        other => UserOpError::Chain(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::assemble;
    use crate::calls::encode_batch_execution;
    use crate::eip712::Domain;
    use crate::mock::{owner_wallet, MockChain};
    use crate::signer::sign;
    use crate::types::{DeploymentItem, GasConfig};
    use ethers::signers::Signer;

    async fn signed_op(chain: &MockChain) -> SignedOperation {
        let contracts = chain.contracts();
        let items = vec![DeploymentItem::new("A", "A", 1u64)];
        let nonce = chain.current_nonce(U256::zero());
        let built = assemble(
            contracts.account,
            nonce,
            encode_batch_execution(contracts.batch_deployer, &items),
            &GasConfig::default(),
        )
        .unwrap();
        let domain = Domain::new(chain.chain_id_value(), contracts.entry_point);
        sign(built, &domain, &owner_wallet()).await.unwrap()
    }

    #[tokio::test]
    async fn simulation_revert_reason_is_kept_verbatim_and_nothing_is_sent() {
        let chain = MockChain::new(owner_wallet().address());
        chain.state().reject_reason = Some("AA23 reverted".to_string());
        let signed = signed_op(&chain).await;

        let submitter = Submitter::new(&chain, chain.contracts().entry_point);
        match submitter.simulate(signed).await {
            Err(UserOpError::SimulationReverted { reason, data }) => {
                assert_eq!(reason, "AA23 reverted");
                assert!(!data.is_empty());
            }
            other => panic!("expected SimulationReverted, got {other:?}"),
        }
        assert!(chain.state().sent.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_on_send_is_indeterminate() {
        let chain = MockChain::new(owner_wallet().address());
        let submitter = Submitter::new(&chain, chain.contracts().entry_point);
        let simulated = submitter.simulate(signed_op(&chain).await).await.unwrap();

        chain.state().fail_sends = true;
        let err = submitter.send(simulated).await.unwrap_err();
        assert!(matches!(err, UserOpError::SubmissionFailed { tx_hash: None, .. }));
        assert!(err.is_indeterminate());
    }

    #[tokio::test]
    async fn missing_receipt_keeps_the_tx_hash() {
        let chain = MockChain::new(owner_wallet().address());
        chain.state().drop_receipts = true;
        let submitter = Submitter::new(&chain, chain.contracts().entry_point)
            .with_receipt_timeout(Duration::from_millis(10));

        let simulated = submitter.simulate(signed_op(&chain).await).await.unwrap();
        let submitted = submitter.send(simulated).await.unwrap();
        let tx_hash = submitted.tx_hash();

        match submitter.finalize(submitted).await {
            Err(err @ UserOpError::SubmissionFailed { .. }) => {
                assert!(err.is_indeterminate());
                assert!(matches!(err, UserOpError::SubmissionFailed { tx_hash: Some(h), .. } if h == tx_hash));
            }
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mined_revert_is_determinate() {
        let chain = MockChain::new(owner_wallet().address());
        chain.state().mined_status = 0;
        let submitter = Submitter::new(&chain, chain.contracts().entry_point);

        let simulated = submitter.simulate(signed_op(&chain).await).await.unwrap();
        let submitted = submitter.send(simulated).await.unwrap();
        let err = submitter.finalize(submitted).await.unwrap_err();
        assert!(matches!(err, UserOpError::MinedReverted { .. }));
        assert!(!err.is_indeterminate());
    }

    #[tokio::test]
    async fn replaying_a_finalized_operation_is_rejected() {
        let chain = MockChain::new(owner_wallet().address());
        let submitter = Submitter::new(&chain, chain.contracts().entry_point);
        let signed = signed_op(&chain).await;

        let simulated = submitter.simulate(signed.clone()).await.unwrap();
        let submitted = submitter.send(simulated).await.unwrap();
        submitter.finalize(submitted).await.unwrap();
        let nonce_after_first = chain.current_nonce(U256::zero());

        let err = submitter.simulate(signed).await.unwrap_err();
        assert!(matches!(err, UserOpError::ReplayRejected { ref reason } if reason.starts_with("AA25")));
        assert_eq!(chain.current_nonce(U256::zero()), nonce_after_first);
        assert_eq!(chain.state().sent.len(), 1);
    }
}
