use crate::builder::prefund_required;
use crate::chain::ChainProvider;
use crate::entrypoint::{account_owner, EntryPoint};
use crate::error::{ConfigError, PreflightError, Result};
use crate::types::{Contracts, DeploymentItem, GasConfig};
use ethers::types::{Address, U256};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreflightReport {
    pub owner: Address,
    pub deposit: U256,
}

/// Purely local checks: every address configured, something to deploy.
pub fn check_configuration(contracts: &Contracts, items: &[DeploymentItem]) -> Result<()> {
    for (role, address) in roles(contracts) {
        if address.is_zero() {
            return Err(ConfigError::MissingAddress(role).into());
        }
    }
    if items.is_empty() {
        return Err(ConfigError::EmptyBatch.into());
    }
    Ok(())
}

/// Bits available for the entry point nonce key; the low 64 bits are the sequence.
pub const NONCE_KEY_BITS: usize = 192;

pub fn check_nonce_key(key: U256) -> Result<()> {
    if key.bits() > NONCE_KEY_BITS {
        return Err(ConfigError::InvalidNonceKey(key).into());
    }
    Ok(())
}

/// Runs the submission preconditions in order and stops at the first failure:
/// configuration, contract code, account ownership, entry point deposit.
///
/// Nothing here sends a transaction.
pub async fn preflight<C: ChainProvider + ?Sized>(
    chain: &C,
    contracts: &Contracts,
    items: &[DeploymentItem],
    signer: Address,
    gas: &GasConfig,
) -> Result<PreflightReport> {
    check_configuration(contracts, items)?;

    for (role, address) in roles(contracts) {
        let code = chain.code_at(address).await?;
        if code.as_ref().is_empty() {
            return Err(PreflightError::ContractNotFound { role, address }.into());
        }
    }

    let owner = account_owner(chain, contracts.account).await?;
    if owner != signer {
        return Err(PreflightError::OwnerMismatch { owner, signer }.into());
    }

    let deposit = EntryPoint::new(chain, contracts.entry_point)
        .balance_of(contracts.account)
        .await?;
    if deposit.is_zero() {
        return Err(PreflightError::InsufficientPrefund {
            account: contracts.account,
        }
        .into());
    }

    if let Some(required) = prefund_required(gas) {
        if deposit < required {
            tracing::warn!(
                deposit = %deposit,
                required = %required,
                "deposit is below the worst-case prefund for these gas limits"
            );
        }
    }

    tracing::info!(owner = ?owner, deposit = %deposit, "preflight passed");
    Ok(PreflightReport { owner, deposit })
}

fn roles(contracts: &Contracts) -> [(&'static str, Address); 3] {
    [
        ("entry point", contracts.entry_point),
        ("account", contracts.account),
        ("batch deployer", contracts.batch_deployer),
    ]
}
