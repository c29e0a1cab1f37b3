use crate::builder::{BuiltOperation, SignedOperation};
use crate::eip712::{self, Domain, TypedOperation};
use crate::error::{Result, UserOpError};
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, Signature, H256};

/// Signs the operation's typed-data digest with any `ethers` signer (local key,
/// hardware wallet, remote signer).
///
/// The account recovers the owner from the raw EIP-712 digest, with no EIP-191
/// prefix. The signature is recovered locally against that digest before it is
/// attached, so a signer that hashes differently is caught here instead of
/// reverting with `AA24 signature error`.
pub async fn sign<S: Signer>(
    built: BuiltOperation,
    domain: &Domain,
    signer: &S,
) -> Result<SignedOperation> {
    let digest = eip712::digest(built.operation(), domain);
    let typed = TypedOperation {
        op: built.operation(),
        domain: *domain,
    };

    let signature = signer
        .sign_typed_data(&typed)
        .await
        .map_err(|e| UserOpError::Signing(e.to_string()))?;

    let expected = signer.address();
    let recovered = recover_signer(digest, &signature)?;
    if recovered != expected {
        return Err(UserOpError::SignatureUnrecoverable {
            expected,
            recovered,
        });
    }

    tracing::debug!(digest = ?digest, signer = ?expected, "signed user operation");
    built.attach_signature(Bytes::from(signature.to_vec()), digest)
}

pub fn recover_signer(digest: H256, signature: &Signature) -> Result<Address> {
    signature
        .recover(digest)
        .map_err(|e| UserOpError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::assemble;
    use crate::types::GasConfig;
    use ethers::signers::LocalWallet;
    use ethers::types::U256;

    // First default hardhat/anvil account.
    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn built() -> BuiltOperation {
        assemble(
            Address::repeat_byte(0xaa),
            U256::from(5u64),
            Bytes::from(vec![0xde, 0xad]),
            &GasConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn signature_recovers_to_signer_over_raw_digest() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let domain = Domain::new(31337u64, Address::repeat_byte(0xee));

        let signed = sign(built(), &domain, &wallet).await.unwrap();
        assert_eq!(signed.digest(), eip712::digest(signed.operation(), &domain));

        let signature = Signature::try_from(signed.operation().signature.as_ref()).unwrap();
        assert_eq!(signed.operation().signature.len(), 65);
        assert_eq!(recover_signer(signed.digest(), &signature).unwrap(), wallet.address());
    }

    #[tokio::test]
    async fn prefixed_signature_does_not_recover() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let domain = Domain::new(31337u64, Address::repeat_byte(0xee));
        let digest = eip712::digest(built().operation(), &domain);

        // EIP-191 personal_sign over the digest bytes, the wrong convention here.
        let prefixed = wallet.sign_message(digest.as_bytes()).await.unwrap();
        assert_ne!(recover_signer(digest, &prefixed).unwrap(), wallet.address());
    }

    #[tokio::test]
    async fn signing_is_deterministic_for_the_same_operation() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let domain = Domain::new(31337u64, Address::repeat_byte(0xee));
        let a = sign(built(), &domain, &wallet).await.unwrap();
        let b = sign(built(), &domain, &wallet).await.unwrap();
        assert_eq!(a.operation().signature, b.operation().signature);
    }
}
