use crate::calls::{
    BalanceOfCall, BalanceOfReturn, DepositToCall, GetDomainSeparatorV4Call,
    GetDomainSeparatorV4Return, GetNonceCall, GetNonceReturn, GetPackedUserOpTypeHashCall,
    GetPackedUserOpTypeHashReturn, GetUserOpHashCall, GetUserOpHashReturn, HandleOpsCall,
    OwnerCall, OwnerReturn,
};
use crate::chain::{ChainError, ChainProvider};
use crate::types::PackedUserOperation;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::types::{Address, Bytes, H256, U256};

/// Typed view of the EntryPoint (dispatcher) contract over a [`ChainProvider`].
#[derive(Debug)]
pub struct EntryPoint<'a, C: ?Sized> {
    chain: &'a C,
    address: Address,
}

impl<'a, C: ChainProvider + ?Sized> EntryPoint<'a, C> {
    pub fn new(chain: &'a C, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Nonce for `(sender, key)`; the sequence lives in the low 64 bits, `key` in the high 192.
    pub async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256, ChainError> {
        let GetNonceReturn(nonce) = view(self.chain, self.address, GetNonceCall { sender, key }).await?;
        Ok(nonce)
    }

    /// Deposit held for `account` (its prefund).
    pub async fn balance_of(&self, account: Address) -> Result<U256, ChainError> {
        let BalanceOfReturn(balance) =
            view(self.chain, self.address, BalanceOfCall { account }).await?;
        Ok(balance)
    }

    pub async fn get_user_op_hash(&self, op: &PackedUserOperation) -> Result<H256, ChainError> {
        let call = GetUserOpHashCall {
            user_op: op.clone(),
        };
        let GetUserOpHashReturn(hash) = view(self.chain, self.address, call).await?;
        Ok(H256(hash))
    }

    pub async fn domain_separator(&self) -> Result<H256, ChainError> {
        let GetDomainSeparatorV4Return(sep) =
            view(self.chain, self.address, GetDomainSeparatorV4Call).await?;
        Ok(H256(sep))
    }

    pub async fn packed_user_op_type_hash(&self) -> Result<H256, ChainError> {
        let GetPackedUserOpTypeHashReturn(hash) =
            view(self.chain, self.address, GetPackedUserOpTypeHashCall).await?;
        Ok(H256(hash))
    }

    /// Sends `value` wei to the entry point as prefund for `account`.
    pub async fn deposit_to(&self, account: Address, value: U256) -> Result<H256, ChainError> {
        let data: Bytes = DepositToCall { account }.encode().into();
        self.chain.send_transaction(self.address, data, value).await
    }
}

pub fn handle_ops_calldata(ops: Vec<PackedUserOperation>, beneficiary: Address) -> Bytes {
    HandleOpsCall { ops, beneficiary }.encode().into()
}

/// `owner()` of the smart account.
pub async fn account_owner<C: ChainProvider + ?Sized>(
    chain: &C,
    account: Address,
) -> Result<Address, ChainError> {
    let OwnerReturn(owner) = view(chain, account, OwnerCall).await?;
    Ok(owner)
}

async fn view<C, Call, Ret>(chain: &C, to: Address, call: Call) -> Result<Ret, ChainError>
where
    C: ChainProvider + ?Sized,
    Call: AbiEncode,
    Ret: AbiDecode,
{
    let out = chain.call(to, call.encode().into()).await?;
    Ret::decode(&out).map_err(|e| ChainError::Decode(e.to_string()))
}
