//! One submission attempt, end to end.

use crate::builder::{assemble, SignedOperation};
use crate::calls::encode_batch_execution;
use crate::chain::ChainProvider;
use crate::eip712::{self, verify_against_on_chain_hash, Domain};
use crate::entrypoint::EntryPoint;
use crate::error::Result;
use crate::outcome::{expect_artifacts, parse_user_operation_event, OperationOutcome};
use crate::preflight::{check_nonce_key, preflight, PreflightReport};
use crate::signer::sign;
use crate::submitter::{Stage, Submitter};
use crate::types::{Contracts, DeployedArtifact, DeploymentItem, GasConfig};
use ethers::signers::Signer;
use ethers::types::{Address, H256, U256};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AttemptConfig {
    pub contracts: Contracts,
    pub gas: GasConfig,
    /// High 192 bits of the entry point nonce. Zero for the default sequence.
    pub nonce_key: U256,
    /// Defaults to the transaction sender.
    pub beneficiary: Option<Address>,
    pub receipt_timeout: Duration,
    /// Compare the local digest with `EntryPoint.getUserOpHash` before signing.
    pub verify_hash: bool,
    /// Stop after a successful simulation.
    pub dry_run: bool,
}

impl AttemptConfig {
    pub fn new(contracts: Contracts) -> Self {
        Self {
            contracts,
            gas: GasConfig::default(),
            nonce_key: U256::zero(),
            beneficiary: None,
            receipt_timeout: Duration::from_secs(180),
            verify_hash: true,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttemptReport {
    pub stage: Stage,
    pub preflight: PreflightReport,
    pub operation: SignedOperation,
    pub nonce_before: U256,
    /// `None` for dry runs, or when the post-submission read failed.
    pub nonce_after: Option<U256>,
    pub tx_hash: Option<H256>,
    pub gas_used: Option<U256>,
    pub outcome: Option<OperationOutcome>,
    pub artifacts: Vec<DeployedArtifact>,
}

impl AttemptReport {
    pub fn digest(&self) -> H256 {
        self.operation.digest()
    }

    /// False when the nonce was read back and did not move by exactly one.
    pub fn nonce_advanced(&self) -> bool {
        match self.nonce_after {
            Some(after) => after == self.nonce_before + U256::one(),
            None => true,
        }
    }
}

/// Runs preflight, assembles and signs a fresh operation, simulates it and (unless
/// `dry_run`) sends it and decodes what it deployed.
///
/// Every call builds from a freshly read nonce. An `Err` that
/// [`is_indeterminate`](crate::error::UserOpError::is_indeterminate) may still have
/// executed; check the chain before trying again.
pub async fn run_attempt<C, S>(
    chain: &C,
    signer: &S,
    cfg: &AttemptConfig,
    items: &[DeploymentItem],
) -> Result<AttemptReport>
where
    C: ChainProvider + ?Sized,
    S: Signer,
{
    let contracts = cfg.contracts;
    check_nonce_key(cfg.nonce_key)?;
    let preflight = preflight(chain, &contracts, items, signer.address(), &cfg.gas).await?;

    let entry_point = EntryPoint::new(chain, contracts.entry_point);
    let call_data = encode_batch_execution(contracts.batch_deployer, items);
    let nonce_before = entry_point.get_nonce(contracts.account, cfg.nonce_key).await?;
    let built = assemble(contracts.account, nonce_before, call_data, &cfg.gas)?;
    tracing::info!(stage = ?Stage::Built, nonce = %nonce_before, items = items.len(), "assembled user operation");

    let domain = Domain::new(chain.chain_id().await?, contracts.entry_point);
    if cfg.verify_hash {
        let local = eip712::digest(built.operation(), &domain);
        let on_chain = entry_point.get_user_op_hash(built.operation()).await?;
        verify_against_on_chain_hash(local, on_chain)?;
    }

    let signed = sign(built, &domain, signer).await?;
    tracing::info!(stage = ?Stage::Signed, digest = ?signed.digest(), "signed user operation");

    let submitter = Submitter::new(chain, contracts.entry_point)
        .with_beneficiary(cfg.beneficiary.unwrap_or_else(|| chain.sender()))
        .with_receipt_timeout(cfg.receipt_timeout);

    let simulated = submitter.simulate(signed).await?;
    if cfg.dry_run {
        return Ok(AttemptReport {
            stage: Stage::Simulated,
            preflight,
            operation: simulated.into_signed(),
            nonce_before,
            nonce_after: None,
            tx_hash: None,
            gas_used: None,
            outcome: None,
            artifacts: Vec::new(),
        });
    }

    let submitted = submitter.send(simulated).await?;
    let tx_hash = submitted.tx_hash();
    let finalized = submitter.finalize(submitted).await?;
    let receipt = finalized.receipt();

    let outcome = parse_user_operation_event(&receipt.logs, contracts.entry_point, finalized.signed().digest());
    match &outcome {
        Some(outcome) => outcome.check_success()?,
        None => tracing::warn!(tx = ?tx_hash, "no UserOperationEvent for this operation in the receipt"),
    }
    let artifacts = expect_artifacts(&receipt.logs, contracts.batch_deployer, items.len())?;

    let nonce_after = match entry_point.get_nonce(contracts.account, cfg.nonce_key).await {
        Ok(nonce) => Some(nonce),
        Err(err) => {
            tracing::warn!(error = %err, "could not re-read nonce after submission");
            None
        }
    };

    let report = AttemptReport {
        stage: Stage::Finalized,
        preflight,
        gas_used: receipt.gas_used,
        operation: finalized.signed().clone(),
        nonce_before,
        nonce_after,
        tx_hash: Some(tx_hash),
        outcome,
        artifacts,
    };
    if !report.nonce_advanced() {
        tracing::warn!(
            before = %nonce_before,
            after = ?report.nonce_after,
            "nonce did not advance by exactly one"
        );
    }
    Ok(report)
}
