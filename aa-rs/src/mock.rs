//! In-memory entry point, account and batch deployer for tests.
//!
//! Validation mirrors the on-chain checks the pipeline relies on: sequential nonces per
//! key, owner recovery from the raw typed-data digest, a non-zero deposit.

use crate::calls::{
    encode_revert, ArtifactDeployedFilter, BalanceOfCall, DeployBatchCall, DepositToCall,
    ExecuteCall, GetDomainSeparatorV4Call, GetNonceCall, GetPackedUserOpTypeHashCall,
    GetUserOpHashCall, HandleOpsCall, OwnerCall, Revert, UserOperationEventFilter,
    UserOperationRevertReasonFilter,
};
use crate::chain::{ChainError, ChainProvider};
use crate::eip712::{self, Domain};
use crate::types::{Contracts, PackedUserOperation};
use async_trait::async_trait;
use ethers::abi::{self, AbiDecode, Token};
use ethers::contract::{EthCall, EthEvent};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Log, Signature, TransactionReceipt, H256, U256, U64};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// First anvil dev key.
pub(crate) const OWNER_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub(crate) fn owner_wallet() -> LocalWallet {
    OWNER_KEY.parse().unwrap()
}

pub(crate) struct MockState {
    pub code: HashMap<Address, Bytes>,
    pub owner: Address,
    pub deposit: U256,
    pub nonces: HashMap<U256, u64>,
    pub calls: Vec<(Address, Bytes)>,
    pub sent: Vec<(Address, Bytes, U256)>,
    pub receipts: HashMap<H256, TransactionReceipt>,
    /// Every `handleOps` reverts with `FailedOp(0, reason)`.
    pub reject_reason: Option<String>,
    pub fail_sends: bool,
    pub drop_receipts: bool,
    pub mined_status: u64,
    /// Number of `ArtifactDeployed` logs left out of a receipt.
    pub missing_artifacts: usize,
    /// Inner call fails with `Error(reason)`; the operation itself still lands.
    pub inner_revert: Option<String>,
    pub corrupt_user_op_hash: bool,
    next_artifact: u64,
    block: u64,
}

pub(crate) struct MockChain {
    contracts: Contracts,
    chain_id: u64,
    from: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(owner: Address) -> Self {
        let contracts = Contracts {
            entry_point: Address::repeat_byte(0xe1),
            account: Address::repeat_byte(0xac),
            batch_deployer: Address::repeat_byte(0xbd),
        };
        let code = [contracts.entry_point, contracts.account, contracts.batch_deployer]
            .into_iter()
            .map(|a| (a, Bytes::from(vec![0x60, 0x80, 0x60, 0x40])))
            .collect();

        Self {
            contracts,
            chain_id: 31337,
            from: owner,
            state: Mutex::new(MockState {
                code,
                owner,
                deposit: U256::exp10(18),
                nonces: HashMap::new(),
                calls: Vec::new(),
                sent: Vec::new(),
                receipts: HashMap::new(),
                reject_reason: None,
                fail_sends: false,
                drop_receipts: false,
                mined_status: 1,
                missing_artifacts: 0,
                inner_revert: None,
                corrupt_user_op_hash: false,
                next_artifact: 0,
                block: 1,
            }),
        }
    }

    pub fn contracts(&self) -> Contracts {
        self.contracts
    }

    pub fn chain_id_value(&self) -> u64 {
        self.chain_id
    }

    pub fn domain(&self) -> Domain {
        Domain::new(self.chain_id, self.contracts.entry_point)
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn current_nonce(&self, key: U256) -> U256 {
        let seq = self.state().nonces.get(&key).copied().unwrap_or(0);
        (key << 64) + U256::from(seq)
    }

    /// `handleOps` reads and sends seen so far.
    pub fn handle_ops_attempts(&self) -> usize {
        let state = self.state();
        let reads = state
            .calls
            .iter()
            .filter(|(_, data)| selector(data) == Some(HandleOpsCall::selector()))
            .count();
        reads + state.sent.len()
    }

    fn handle_ops(
        &self,
        state: &mut MockState,
        data: &[u8],
        commit: bool,
    ) -> Result<Vec<Log>, ChainError> {
        let call = HandleOpsCall::decode(data).map_err(|e| ChainError::Decode(e.to_string()))?;
        let domain = self.domain();
        let mut logs = Vec::new();

        for (index, op) in call.ops.iter().enumerate() {
            let fail = |reason: &str| {
                reverted(Revert::FailedOp {
                    op_index: U256::from(index),
                    reason: reason.to_string(),
                })
            };

            if let Some(reason) = &state.reject_reason {
                return Err(fail(reason));
            }
            if op.sender != self.contracts.account {
                return Err(fail("AA20 account not deployed"));
            }
            let key = op.nonce >> 64;
            let expected = state.nonces.get(&key).copied().unwrap_or(0);
            if op.nonce.low_u64() != expected {
                return Err(fail("AA25 invalid account nonce"));
            }
            let digest = eip712::digest(op, &domain);
            let recovered = Signature::try_from(op.signature.as_ref())
                .ok()
                .and_then(|sig| sig.recover(digest).ok());
            if recovered != Some(state.owner) {
                return Err(fail("AA24 signature error"));
            }
            if state.deposit.is_zero() {
                return Err(fail("AA21 didn't pay prefund"));
            }

            if commit {
                *state.nonces.entry(key).or_default() += 1;
                logs.extend(self.execution_logs(state, op, digest));
            }
        }
        Ok(logs)
    }

    fn execution_logs(
        &self,
        state: &mut MockState,
        op: &PackedUserOperation,
        digest: H256,
    ) -> Vec<Log> {
        // Something unrelated in the same receipt.
        let mut logs = vec![Log {
            address: Address::repeat_byte(0xee),
            topics: vec![H256::repeat_byte(0xab), H256::from(op.sender)],
            data: Bytes::from(vec![0u8; 32]),
            ..Default::default()
        }];

        let success = state.inner_revert.is_none();
        if let Some(reason) = state.inner_revert.clone() {
            let revert_reason = encode_revert(&Revert::Error(reason));
            logs.push(Log {
                address: self.contracts.entry_point,
                topics: vec![
                    UserOperationRevertReasonFilter::signature(),
                    digest,
                    H256::from(op.sender),
                ],
                data: abi::encode(&[Token::Uint(op.nonce), Token::Bytes(revert_reason.to_vec())])
                    .into(),
                ..Default::default()
            });
        } else if let Ok(exec) = ExecuteCall::decode(&op.call_data) {
            if exec.target == self.contracts.batch_deployer {
                if let Ok(batch) = DeployBatchCall::decode(&exec.data) {
                    for item in batch.configs.iter().skip(state.missing_artifacts) {
                        state.next_artifact += 1;
                        let artifact = Address::from_low_u64_be(0x1000 + state.next_artifact);
                        logs.push(Log {
                            address: self.contracts.batch_deployer,
                            topics: vec![
                                ArtifactDeployedFilter::signature(),
                                H256::from(artifact),
                                H256::from(op.sender),
                            ],
                            data: abi::encode(&[
                                Token::String(item.name.clone()),
                                Token::String(item.symbol.clone()),
                                Token::Uint(item.supply),
                            ])
                            .into(),
                            ..Default::default()
                        });
                    }
                }
            }
        }

        logs.push(Log {
            address: self.contracts.entry_point,
            topics: vec![
                UserOperationEventFilter::signature(),
                digest,
                H256::from(op.sender),
                H256::zero(),
            ],
            data: abi::encode(&[
                Token::Uint(op.nonce),
                Token::Bool(success),
                Token::Uint(U256::from(123_456u64)),
                Token::Uint(U256::from(61_728u64)),
            ])
            .into(),
            ..Default::default()
        });
        logs
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    fn sender(&self) -> Address {
        self.from
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.chain_id)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let mut state = self.state();
        state.calls.push((to, data.clone()));
        let sel = selector(&data);

        if to == self.contracts.account && sel == Some(OwnerCall::selector()) {
            return Ok(word(Token::Address(state.owner)));
        }
        if to != self.contracts.entry_point {
            return Err(reverted(Revert::Unknown(Bytes::new())));
        }

        if sel == Some(GetNonceCall::selector()) {
            let call = GetNonceCall::decode(&data).map_err(|e| ChainError::Decode(e.to_string()))?;
            if call.key.bits() > 192 {
                return Err(reverted(Revert::Unknown(Bytes::new())));
            }
            let seq = state.nonces.get(&call.key).copied().unwrap_or(0);
            return Ok(word(Token::Uint((call.key << 64) + U256::from(seq))));
        }
        if sel == Some(BalanceOfCall::selector()) {
            return Ok(word(Token::Uint(state.deposit)));
        }
        if sel == Some(GetUserOpHashCall::selector()) {
            let call =
                GetUserOpHashCall::decode(&data).map_err(|e| ChainError::Decode(e.to_string()))?;
            let mut hash = eip712::digest(&call.user_op, &self.domain());
            if state.corrupt_user_op_hash {
                hash = H256::repeat_byte(0x13);
            }
            return Ok(word(Token::FixedBytes(hash.as_bytes().to_vec())));
        }
        if sel == Some(GetDomainSeparatorV4Call::selector()) {
            let sep = self.domain().separator();
            return Ok(word(Token::FixedBytes(sep.as_bytes().to_vec())));
        }
        if sel == Some(GetPackedUserOpTypeHashCall::selector()) {
            let hash = eip712::packed_userop_type_hash();
            return Ok(word(Token::FixedBytes(hash.as_bytes().to_vec())));
        }
        if sel == Some(HandleOpsCall::selector()) {
            self.handle_ops(&mut state, &data, false)?;
            return Ok(Bytes::new());
        }
        Err(reverted(Revert::Unknown(Bytes::new())))
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
    ) -> Result<H256, ChainError> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(ChainError::Transport("connection reset by peer".to_string()));
        }

        let sel = selector(&data);
        let mut logs = Vec::new();
        if to == self.contracts.entry_point && sel == Some(HandleOpsCall::selector()) {
            let commit = state.mined_status == 1;
            // Estimation runs the same validation; a failing op never gets broadcast.
            logs = self.handle_ops(&mut state, &data, commit)?;
        } else if to == self.contracts.entry_point && sel == Some(DepositToCall::selector()) {
            state.deposit += value;
        }

        state.sent.push((to, data, value));
        state.block += 1;
        let tx_hash = H256::from_low_u64_be(state.sent.len() as u64);
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(state.block)),
            from: self.from,
            to: Some(to),
            gas_used: Some(U256::from(210_000u64)),
            status: Some(U64::from(state.mined_status)),
            logs,
            ..Default::default()
        };
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: H256,
        _timeout: Duration,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        let state = self.state();
        if state.drop_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }
}

fn selector(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4)?.try_into().ok()
}

fn word(token: Token) -> Bytes {
    abi::encode(&[token]).into()
}

fn reverted(revert: Revert) -> ChainError {
    ChainError::Reverted {
        data: encode_revert(&revert),
        message: "execution reverted".to_string(),
    }
}
