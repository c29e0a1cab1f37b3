use crate::error::{Result, UserOpError};
use crate::packing::{pack, PackError};
use crate::types::{GasConfig, PackedUserOperation};
use ethers::types::{Address, Bytes, H256, U256};

/// A freshly assembled operation. Its signature is still empty, which is the only
/// state in which it may be hashed for signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltOperation {
    op: PackedUserOperation,
}

/// An operation carrying the owner's signature over `digest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedOperation {
    op: PackedUserOperation,
    digest: H256,
}

/// Builds the packed operation for an already deployed account without a paymaster.
pub fn assemble(
    sender: Address,
    nonce: U256,
    call_data: Bytes,
    gas: &GasConfig,
) -> Result<BuiltOperation> {
    let account_gas_limits = pack_pair(
        ("verificationGasLimit", gas.verification_gas_limit),
        ("callGasLimit", gas.call_gas_limit),
    )?;
    let gas_fees = pack_pair(
        ("maxPriorityFeePerGas", gas.max_priority_fee_per_gas),
        ("maxFeePerGas", gas.max_fee_per_gas),
    )?;

    Ok(BuiltOperation {
        op: PackedUserOperation {
            sender,
            nonce,
            init_code: Bytes::new(),
            call_data,
            account_gas_limits,
            pre_verification_gas: gas.pre_verification_gas,
            gas_fees,
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        },
    })
}

fn pack_pair(hi: (&'static str, U256), lo: (&'static str, U256)) -> Result<[u8; 32]> {
    pack(hi.1, lo.1).map_err(|PackError::OutOfRange(value)| {
        let field = if hi.1.bits() > 128 { hi.0 } else { lo.0 };
        UserOpError::PackingOverflow { field, value }
    })
}

/// Upper bound on what the entry point debits from the deposit:
/// `(verificationGasLimit + callGasLimit + preVerificationGas) * maxFeePerGas`.
pub fn prefund_required(gas: &GasConfig) -> Option<U256> {
    gas.verification_gas_limit
        .checked_add(gas.call_gas_limit)?
        .checked_add(gas.pre_verification_gas)?
        .checked_mul(gas.max_fee_per_gas)
}

impl BuiltOperation {
    pub fn operation(&self) -> &PackedUserOperation {
        &self.op
    }

    /// Consumes the unsigned operation; the signature is attached exactly once.
    pub(crate) fn attach_signature(self, signature: Bytes, digest: H256) -> Result<SignedOperation> {
        if signature.is_empty() {
            return Err(UserOpError::Signing("signer returned an empty signature".to_string()));
        }
        let mut op = self.op;
        op.signature = signature;
        Ok(SignedOperation { op, digest })
    }
}

impl SignedOperation {
    pub fn operation(&self) -> &PackedUserOperation {
        &self.op
    }

    /// The typed-data digest the signature was produced over.
    pub fn digest(&self) -> H256 {
        self.digest
    }
}
