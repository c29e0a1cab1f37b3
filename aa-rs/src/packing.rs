//! Two 128-bit values in one 32-byte word, as used by `accountGasLimits` and
//! `gasFees` in the packed user operation.

use ethers::types::U256;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("{0} exceeds 128 bits")]
    OutOfRange(U256),
}

/// `(hi << 128) | lo`, big-endian.
pub fn pack(hi: U256, lo: U256) -> Result<[u8; 32], PackError> {
    Ok(pack_u128(to_u128(hi)?, to_u128(lo)?))
}

pub fn pack_u128(hi: u128, lo: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&hi.to_be_bytes());
    word[16..].copy_from_slice(&lo.to_be_bytes());
    word
}

pub fn unpack(word: [u8; 32]) -> (u128, u128) {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&word[..16]);
    lo.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(hi), u128::from_be_bytes(lo))
}

fn to_u128(v: U256) -> Result<u128, PackError> {
    if v.bits() > 128 {
        return Err(PackError::OutOfRange(v));
    }
    Ok(v.as_u128())
}
