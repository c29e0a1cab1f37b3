use ethers::contract::{EthAbiCodec, EthAbiType};
use ethers::types::{Address, Bytes, U256};

/// ERC-4337 PackedUserOperation (EntryPoint v0.7+ layout).
///
/// `account_gas_limits` is `verificationGasLimit ‖ callGasLimit` and `gas_fees` is
/// `maxPriorityFeePerGas ‖ maxFeePerGas`, each half a big-endian uint128.
///
/// No factory and no paymaster are used here, so `init_code` and `paymaster_and_data`
/// stay empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, EthAbiType, EthAbiCodec)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// One artifact for `deployBatch((string,string,uint256)[])`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, EthAbiType, EthAbiCodec)]
pub struct DeploymentItem {
    pub name: String,
    pub symbol: String,
    pub supply: U256,
}

impl DeploymentItem {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, supply: impl Into<U256>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            supply: supply.into(),
        }
    }
}

/// Operator supplied gas parameters. Nothing here is estimated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasConfig {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(2_000_000u64),
            verification_gas_limit: U256::from(1_000_000u64),
            pre_verification_gas: U256::from(80_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            max_fee_per_gas: U256::from(2_000_000_000u64),
        }
    }
}

/// A contract created by the batch deployer, as reported by its `ArtifactDeployed` log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedArtifact {
    pub address: Address,
    pub owner: Address,
    pub name: String,
    pub symbol: String,
    pub supply: U256,
}

/// The addresses one attempt talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Contracts {
    pub entry_point: Address,
    pub account: Address,
    pub batch_deployer: Address,
}
