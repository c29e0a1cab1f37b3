//! Contract call, event and revert encodings used by the pipeline.
//!
//! The tuple-shaped entry points (`handleOps`, `getUserOpHash`, `deployBatch`) are
//! declared by hand with the ethers derives; the flat views come from `abigen!`.

use crate::types::{DeploymentItem, PackedUserOperation};
use ethers::abi::{self, AbiEncode, ParamType, Token};
use ethers::contract::{abigen, EthAbiCodec, EthAbiType, EthCall, EthEvent};
use ethers::types::{Address, Bytes, U256};

abigen!(
    IEntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) view returns (uint256)
        function balanceOf(address account) view returns (uint256)
        function depositTo(address account) payable
        function getDomainSeparatorV4() view returns (bytes32)
        function getPackedUserOpTypeHash() pure returns (bytes32)
    ]"#
);

abigen!(
    IAccount,
    r#"[
        function owner() view returns (address)
        function execute(address target, uint256 value, bytes data)
    ]"#
);

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(name = "deployBatch", abi = "deployBatch((string,string,uint256)[])")]
pub struct DeployBatchCall {
    pub configs: Vec<DeploymentItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "handleOps",
    abi = "handleOps((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)[],address)"
)]
pub struct HandleOpsCall {
    pub ops: Vec<PackedUserOperation>,
    pub beneficiary: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthCall)]
#[ethcall(
    name = "getUserOpHash",
    abi = "getUserOpHash((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes))"
)]
pub struct GetUserOpHashCall {
    pub user_op: PackedUserOperation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthAbiType, EthAbiCodec)]
pub struct GetUserOpHashReturn(pub [u8; 32]);

/// Emitted once per created artifact by the batch deployer.
#[derive(Clone, Debug, Default, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "ArtifactDeployed",
    abi = "ArtifactDeployed(address,address,string,string,uint256)"
)]
pub struct ArtifactDeployedFilter {
    #[ethevent(indexed)]
    pub artifact: Address,
    #[ethevent(indexed)]
    pub owner: Address,
    pub name: String,
    pub symbol: String,
    pub supply: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "UserOperationEvent",
    abi = "UserOperationEvent(bytes32,address,address,uint256,bool,uint256,uint256)"
)]
pub struct UserOperationEventFilter {
    #[ethevent(indexed)]
    pub user_op_hash: [u8; 32],
    #[ethevent(indexed)]
    pub sender: Address,
    #[ethevent(indexed)]
    pub paymaster: Address,
    pub nonce: U256,
    pub success: bool,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "UserOperationRevertReason",
    abi = "UserOperationRevertReason(bytes32,address,uint256,bytes)"
)]
pub struct UserOperationRevertReasonFilter {
    #[ethevent(indexed)]
    pub user_op_hash: [u8; 32],
    #[ethevent(indexed)]
    pub sender: Address,
    pub nonce: U256,
    pub revert_reason: Bytes,
}

/// `BatchDeployer.deployBatch(items)`.
pub fn encode_deploy_batch(items: &[DeploymentItem]) -> Bytes {
    DeployBatchCall {
        configs: items.to_vec(),
    }
    .encode()
    .into()
}

/// `Account.execute(target, value, inner)`; `inner` is embedded as-is.
pub fn encode_execute(target: Address, value: U256, inner: Bytes) -> Bytes {
    ExecuteCall {
        target,
        value,
        data: inner,
    }
    .encode()
    .into()
}

/// The account calldata that makes the account itself call `deployBatch`.
pub fn encode_batch_execution(batch_deployer: Address, items: &[DeploymentItem]) -> Bytes {
    encode_execute(batch_deployer, U256::zero(), encode_deploy_batch(items))
}

/// A decoded revert payload from the entry point (or anything it called).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Revert {
    FailedOp {
        op_index: U256,
        reason: String,
    },
    FailedOpWithRevert {
        op_index: U256,
        reason: String,
        inner: Bytes,
    },
    Error(String),
    Unknown(Bytes),
}

const FAILED_OP: &str = "FailedOp(uint256,string)";
const FAILED_OP_WITH_REVERT: &str = "FailedOpWithRevert(uint256,string,bytes)";
const ERROR_STRING: &str = "Error(string)";

impl Revert {
    pub fn decode(data: &[u8]) -> Self {
        Self::try_decode(data).unwrap_or_else(|| Revert::Unknown(Bytes::from(data.to_vec())))
    }

    fn try_decode(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let (selector, body) = data.split_at(4);

        if selector == ethers::utils::id(FAILED_OP) {
            let mut tokens = abi::decode(&[ParamType::Uint(256), ParamType::String], body)
                .ok()?
                .into_iter();
            return Some(Revert::FailedOp {
                op_index: tokens.next()?.into_uint()?,
                reason: tokens.next()?.into_string()?,
            });
        }

        if selector == ethers::utils::id(FAILED_OP_WITH_REVERT) {
            let mut tokens = abi::decode(
                &[ParamType::Uint(256), ParamType::String, ParamType::Bytes],
                body,
            )
            .ok()?
            .into_iter();
            return Some(Revert::FailedOpWithRevert {
                op_index: tokens.next()?.into_uint()?,
                reason: tokens.next()?.into_string()?,
                inner: tokens.next()?.into_bytes()?.into(),
            });
        }

        if selector == ethers::utils::id(ERROR_STRING) {
            let reason = abi::decode(&[ParamType::String], body)
                .ok()?
                .into_iter()
                .next()?
                .into_string()?;
            return Some(Revert::Error(reason));
        }

        None
    }

    /// Human readable reason, `0x…` hex when nothing could be decoded.
    pub fn reason(&self) -> String {
        match self {
            Revert::FailedOp { reason, .. } => reason.clone(),
            Revert::FailedOpWithRevert { reason, inner, .. } => {
                format!("{reason} (inner revert 0x{})", hex::encode(inner))
            }
            Revert::Error(reason) => reason.clone(),
            Revert::Unknown(data) if data.is_empty() => "reverted without data".to_string(),
            Revert::Unknown(data) => format!("0x{}", hex::encode(data)),
        }
    }

    /// Entry point nonce validation failure (`AA25 invalid account nonce`).
    pub fn is_nonce_rejection(&self) -> bool {
        match self {
            Revert::FailedOp { reason, .. } | Revert::FailedOpWithRevert { reason, .. } => {
                reason.starts_with("AA25")
            }
            _ => false,
        }
    }
}

/// ABI encoding of a revert, as a node would return it. Used to build fixtures.
pub fn encode_revert(revert: &Revert) -> Bytes {
    let (sig, tokens) = match revert {
        Revert::FailedOp { op_index, reason } => (
            FAILED_OP,
            vec![Token::Uint(*op_index), Token::String(reason.clone())],
        ),
        Revert::FailedOpWithRevert {
            op_index,
            reason,
            inner,
        } => (
            FAILED_OP_WITH_REVERT,
            vec![
                Token::Uint(*op_index),
                Token::String(reason.clone()),
                Token::Bytes(inner.to_vec()),
            ],
        ),
        Revert::Error(reason) => (ERROR_STRING, vec![Token::String(reason.clone())]),
        Revert::Unknown(data) => return data.clone(),
    };
    let mut out = ethers::utils::id(sig).to_vec();
    out.extend(abi::encode(&tokens));
    out.into()
}
