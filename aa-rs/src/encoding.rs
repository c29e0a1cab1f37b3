use crate::packing::unpack;
use crate::types::{DeployedArtifact, PackedUserOperation};
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

fn fmt_word(w: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(w))
}

/// Wire form of the packed operation, plus the unpacked gas values for readability.
pub fn user_op_to_json(op: &PackedUserOperation) -> serde_json::Value {
    let (verification_gas_limit, call_gas_limit) = unpack(op.account_gas_limits);
    let (max_priority_fee_per_gas, max_fee_per_gas) = unpack(op.gas_fees);

    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "accountGasLimits": fmt_word(&op.account_gas_limits),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "gasFees": fmt_word(&op.gas_fees),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
        "unpacked": {
            "verificationGasLimit": fmt_u256(U256::from(verification_gas_limit)),
            "callGasLimit": fmt_u256(U256::from(call_gas_limit)),
            "maxPriorityFeePerGas": fmt_u256(U256::from(max_priority_fee_per_gas)),
            "maxFeePerGas": fmt_u256(U256::from(max_fee_per_gas)),
        },
    })
}

pub fn artifact_to_json(a: &DeployedArtifact) -> serde_json::Value {
    serde_json::json!({
        "address": fmt_address(a.address),
        "owner": fmt_address(a.owner),
        "name": a.name,
        "symbol": a.symbol,
        "supply": a.supply.to_string(),
    })
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}
