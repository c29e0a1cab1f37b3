//! EIP-712 hashing of a [`PackedUserOperation`] under the entry point's domain.
//!
//! The struct hash deliberately leaves out `signature`: the signature field is what
//! gets produced from this digest.

use crate::error::{Result, UserOpError};
use crate::types::PackedUserOperation;
use ethers::abi::{self, Token};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use std::convert::Infallible;

pub const DOMAIN_NAME: &str = "ERC4337";
pub const DOMAIN_VERSION: &str = "1";

/// Field order is fixed by the entry point's `PACKED_USEROP_TYPEHASH`.
pub const PACKED_USEROP_TYPE: &str = "PackedUserOperation(address sender,uint256 nonce,bytes initCode,bytes callData,bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,bytes paymasterAndData)";

pub fn packed_userop_type_hash() -> H256 {
    H256(keccak256(PACKED_USEROP_TYPE))
}

/// `EIP712Domain(name "ERC4337", version "1", chainId, verifyingContract)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Domain {
    pub chain_id: U256,
    pub verifying_contract: Address,
}

impl Domain {
    pub fn new(chain_id: impl Into<U256>, verifying_contract: Address) -> Self {
        Self {
            chain_id: chain_id.into(),
            verifying_contract,
        }
    }

    pub fn as_eip712(&self) -> EIP712Domain {
        EIP712Domain {
            name: Some(DOMAIN_NAME.to_string()),
            version: Some(DOMAIN_VERSION.to_string()),
            chain_id: Some(self.chain_id),
            verifying_contract: Some(self.verifying_contract),
            salt: None,
        }
    }

    pub fn separator(&self) -> H256 {
        H256(self.as_eip712().separator())
    }
}

pub fn struct_hash(op: &PackedUserOperation) -> H256 {
    let encoded = abi::encode(&[
        Token::FixedBytes(packed_userop_type_hash().as_bytes().to_vec()),
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::FixedBytes(op.account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.to_vec()),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);
    H256(keccak256(encoded))
}

/// `keccak256(0x1901 ‖ domainSeparator ‖ structHash)`, the value `getUserOpHash` returns.
pub fn digest(op: &PackedUserOperation, domain: &Domain) -> H256 {
    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain.separator().as_bytes());
    preimage.extend_from_slice(struct_hash(op).as_bytes());
    H256(keccak256(preimage))
}

/// Adapter so any `ethers` signer can produce the signature through `sign_typed_data`.
#[derive(Clone, Copy, Debug)]
pub struct TypedOperation<'a> {
    pub op: &'a PackedUserOperation,
    pub domain: Domain,
}

impl Eip712 for TypedOperation<'_> {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(self.domain.as_eip712())
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(packed_userop_type_hash().0)
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        Ok(struct_hash(self.op).0)
    }
}

pub fn verify_against_on_chain_hash(local: H256, on_chain: H256) -> Result<()> {
    if local != on_chain {
        return Err(UserOpError::DigestMismatch { local, on_chain });
    }
    Ok(())
}

/// Compares the local domain separator and type hash with the values the entry point
/// reports, which pinpoints which half of a digest mismatch is wrong.
pub fn verify_domain(domain: &Domain, on_chain_separator: H256, on_chain_type_hash: H256) -> Result<()> {
    let local = domain.separator();
    if local != on_chain_separator {
        return Err(UserOpError::DomainMismatch {
            what: "domain separator",
            local,
            on_chain: on_chain_separator,
        });
    }
    let local = packed_userop_type_hash();
    if local != on_chain_type_hash {
        return Err(UserOpError::DomainMismatch {
            what: "type hash",
            local,
            on_chain: on_chain_type_hash,
        });
    }
    Ok(())
}
