use crate::calls::{
    ArtifactDeployedFilter, Revert, UserOperationEventFilter, UserOperationRevertReasonFilter,
};
use crate::error::{Result, UserOpError};
use crate::types::DeployedArtifact;
use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, Log, H256, U256};

/// What the entry point reported for one operation in a `handleOps` receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationOutcome {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    pub success: bool,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub revert_reason: Option<Bytes>,
}

impl OperationOutcome {
    pub fn check_success(&self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let reason = match &self.revert_reason {
            Some(data) => Revert::decode(data).reason(),
            None => "no revert reason logged".to_string(),
        };
        Err(UserOpError::ExecutionReverted { reason })
    }
}

/// `ArtifactDeployed` logs emitted by `deployer`, in log order. Logs from other
/// emitters or with other topics are skipped.
pub fn parse_artifacts(logs: &[Log], deployer: Address) -> Vec<DeployedArtifact> {
    logs.iter()
        .filter(|log| log.address == deployer)
        .filter_map(|log| decode::<ArtifactDeployedFilter>(log))
        .map(|ev| DeployedArtifact {
            address: ev.artifact,
            owner: ev.owner,
            name: ev.name,
            symbol: ev.symbol,
            supply: ev.supply,
        })
        .collect()
}

/// Like [`parse_artifacts`], but a count other than `expected` is an error.
pub fn expect_artifacts(
    logs: &[Log],
    deployer: Address,
    expected: usize,
) -> Result<Vec<DeployedArtifact>> {
    let artifacts = parse_artifacts(logs, deployer);
    if artifacts.len() != expected {
        return Err(UserOpError::OutcomeMismatch {
            expected,
            decoded: artifacts.len(),
        });
    }
    Ok(artifacts)
}

/// The `UserOperationEvent` for `user_op_hash`, joined with its
/// `UserOperationRevertReason` if the entry point logged one.
pub fn parse_user_operation_event(
    logs: &[Log],
    entry_point: Address,
    user_op_hash: H256,
) -> Option<OperationOutcome> {
    let from_entry_point = || logs.iter().filter(|log| log.address == entry_point);

    let event = from_entry_point()
        .filter_map(|log| decode::<UserOperationEventFilter>(log))
        .find(|ev| H256(ev.user_op_hash) == user_op_hash)?;

    let revert_reason = from_entry_point()
        .filter_map(|log| decode::<UserOperationRevertReasonFilter>(log))
        .find(|ev| H256(ev.user_op_hash) == user_op_hash)
        .map(|ev| ev.revert_reason);

    Some(OperationOutcome {
        user_op_hash,
        sender: event.sender,
        nonce: event.nonce,
        success: event.success,
        actual_gas_cost: event.actual_gas_cost,
        actual_gas_used: event.actual_gas_used,
        revert_reason,
    })
}

fn decode<E: EthEvent>(log: &Log) -> Option<E> {
    if log.topics.first() != Some(&E::signature()) {
        return None;
    }
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    E::decode_log(&raw).ok()
}
