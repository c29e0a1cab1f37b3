use crate::chain::ChainError;
use ethers::types::{Address, Bytes, H256, U256};
use thiserror::Error;

/// Every outcome the submission pipeline can report besides success.
///
/// Nothing here is retried by the library. Whether to build a fresh attempt
/// (with a freshly read nonce) is the caller's decision.
#[derive(Error, Debug)]
pub enum UserOpError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("preflight failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("{field} = {value} does not fit in 128 bits")]
    PackingOverflow { field: &'static str, value: U256 },

    #[error("typed-data digest mismatch: local {local:?}, entry point reports {on_chain:?}")]
    DigestMismatch { local: H256, on_chain: H256 },

    #[error("EIP-712 {what} mismatch: local {local:?}, entry point reports {on_chain:?}")]
    DomainMismatch {
        what: &'static str,
        local: H256,
        on_chain: H256,
    },

    #[error("signer produced a signature that recovers to {recovered:?}, expected {expected:?}")]
    SignatureUnrecoverable { expected: Address, recovered: Address },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("simulation reverted: {reason}")]
    SimulationReverted { reason: String, data: Bytes },

    /// The dispatcher refused the operation because its nonce is no longer current.
    #[error("entry point rejected replayed operation: {reason}")]
    ReplayRejected { reason: String },

    /// The send may or may not have reached the network. Do not assume it did not execute.
    #[error("submission outcome unknown (tx {tx_hash:?}): {reason}")]
    SubmissionFailed { tx_hash: Option<H256>, reason: String },

    #[error("handleOps transaction {tx_hash:?} was mined but reverted")]
    MinedReverted { tx_hash: H256 },

    #[error("user operation executed but its call reverted: {reason}")]
    ExecutionReverted { reason: String },

    #[error("expected {expected} deployed artifacts, decoded {decoded}")]
    OutcomeMismatch { expected: usize, decoded: usize },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} address is not configured")]
    MissingAddress(&'static str),

    #[error("batch is empty; at least one deployment item is required")]
    EmptyBatch,

    #[error("nonce key {0} does not fit in 192 bits")]
    InvalidNonceKey(U256),

    #[error("chainId mismatch: deployment has {expected}, RPC returned {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreflightError {
    #[error("no contract code for {role} at {address:?} (wrong network?)")]
    ContractNotFound { role: &'static str, address: Address },

    #[error("account owner is {owner:?} but the signer is {signer:?}")]
    OwnerMismatch { owner: Address, signer: Address },

    #[error("account {account:?} has no deposit with the entry point")]
    InsufficientPrefund { account: Address },
}

impl UserOpError {
    /// True when a transaction may have been broadcast.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, UserOpError::SubmissionFailed { .. })
    }
}

pub type Result<T, E = UserOpError> = std::result::Result<T, E>;
