//! In-process chain used for the `test` network and for tests.
//!
//! Transactions are mined immediately. There is no EVM: creation
//! transactions store their init code as the contract's code, which is
//! enough for the deployment engine's existence checks.

use std::collections::HashMap;

use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, B256, Bytes, TxKind, U256, keccak256};
use alloy_signer_local::PrivateKeySigner;
use keel_core::{KeelError, Result};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::client::{ChainClient, TransactionReceipt, TransactionRequest};

pub const DEV_CHAIN_ID: u64 = 1337;
pub const DEV_ACCOUNT_COUNT: usize = 10;
pub const DEV_GAS_PRICE: u128 = 1_000_000_000;
pub const DEV_BLOCK_GAS_LIMIT: u64 = 30_000_000;

const TX_BASE_GAS: u64 = 21_000;
const TX_CREATE_GAS: u64 = 32_000;
const TX_DATA_ZERO_GAS: u64 = 4;
const TX_DATA_NONZERO_GAS: u64 = 16;
const CODE_DEPOSIT_GAS: u64 = 200;

/// 1,000,000 ether per dev account.
fn dev_balance() -> U256 {
    U256::from(10u64).pow(U256::from(24u64))
}

/// Deterministic private key of dev account `index`.
pub fn dev_private_key(index: usize) -> B256 {
    keccak256(format!("keel-dev-account-{index}"))
}

#[derive(Default)]
struct ChainState {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    receipts: HashMap<B256, TransactionReceipt>,
    block_number: u64,
    mined: u64,
}

impl ChainState {
    fn balance(&self, address: &Address) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }

    fn nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or_default()
    }
}

/// Fields of a transaction once the sender is known.
struct Execution {
    hash: B256,
    from: Address,
    to: TxKind,
    nonce: u64,
    gas_limit: u64,
    gas_price: u128,
    value: U256,
    input: Bytes,
}

/// A chain that lives in memory.
pub struct DevChain {
    chain_id: u64,
    accounts: Vec<Address>,
    state: Mutex<ChainState>,
}

impl Default for DevChain {
    fn default() -> Self {
        Self::new()
    }
}

impl DevChain {
    pub fn new() -> Self {
        Self::with_chain_id(DEV_CHAIN_ID)
    }

    pub fn with_chain_id(chain_id: u64) -> Self {
        let accounts: Vec<Address> = (0..DEV_ACCOUNT_COUNT)
            .filter_map(|i| PrivateKeySigner::from_bytes(&dev_private_key(i)).ok())
            .map(|signer| signer.address())
            .collect();

        let mut state = ChainState::default();
        for account in &accounts {
            state.balances.insert(*account, dev_balance());
        }

        debug!(chain_id, accounts = accounts.len(), "dev chain started");
        Self {
            chain_id,
            accounts,
            state: Mutex::new(state),
        }
    }

    /// Credit `amount` wei to `address`.
    pub fn fund(&self, address: Address, amount: U256) {
        let mut state = self.state.lock();
        let balance = state.balance(&address).saturating_add(amount);
        state.balances.insert(address, balance);
    }

    /// Number of transactions mined so far.
    pub fn transaction_count(&self) -> u64 {
        self.state.lock().mined
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    fn execute(&self, tx: Execution) -> Result<B256> {
        let mut state = self.state.lock();

        let expected = state.nonce(&tx.from);
        if tx.nonce < expected {
            return Err(KeelError::Rpc(format!(
                "nonce too low: address {}, tx: {} state: {expected}",
                tx.from, tx.nonce
            )));
        }
        if tx.nonce > expected {
            return Err(KeelError::Rpc(format!(
                "nonce too high: address {}, tx: {} state: {expected}",
                tx.from, tx.nonce
            )));
        }
        if tx.gas_limit > DEV_BLOCK_GAS_LIMIT {
            return Err(KeelError::Rpc("exceeds block gas limit".into()));
        }

        let max_cost = U256::from(tx.gas_limit)
            .saturating_mul(U256::from(tx.gas_price))
            .saturating_add(tx.value);
        let balance = state.balance(&tx.from);
        if balance < max_cost {
            return Err(KeelError::Rpc(format!(
                "insufficient funds for gas * price + value: address {} have {balance} want {max_cost}",
                tx.from
            )));
        }

        let is_create = tx.to.is_create();
        let intrinsic = intrinsic_gas(&tx.input, is_create);
        if tx.gas_limit < intrinsic {
            return Err(KeelError::Rpc(format!(
                "out of gas: intrinsic gas too low: have {}, want {intrinsic}",
                tx.gas_limit
            )));
        }

        state.nonces.insert(tx.from, tx.nonce + 1);
        state.block_number += 1;
        state.mined += 1;

        let mut status = true;
        let mut gas_used = intrinsic;
        let mut contract_address = None;
        match tx.to {
            TxKind::Create => {
                let deposit = CODE_DEPOSIT_GAS.saturating_mul(tx.input.len() as u64);
                if intrinsic.saturating_add(deposit) > tx.gas_limit {
                    // Code deposit ran out of gas; everything is consumed.
                    status = false;
                    gas_used = tx.gas_limit;
                } else {
                    gas_used = intrinsic + deposit;
                    let address = tx.from.create(tx.nonce);
                    state.code.insert(address, tx.input.clone());
                    contract_address = Some(address);
                }
            }
            TxKind::Call(_) => {}
        }

        let fee = U256::from(gas_used).saturating_mul(U256::from(tx.gas_price));
        let transferred = if status { tx.value } else { U256::ZERO };
        let remaining = balance.saturating_sub(fee).saturating_sub(transferred);
        state.balances.insert(tx.from, remaining);

        let recipient = match (tx.to, contract_address) {
            (TxKind::Call(to), _) => Some(to),
            (TxKind::Create, created) => created,
        };
        if let (Some(recipient), true) = (recipient, status) {
            let credited = state.balance(&recipient).saturating_add(transferred);
            state.balances.insert(recipient, credited);
        }

        let receipt = TransactionReceipt {
            transaction_hash: tx.hash,
            contract_address,
            status,
            gas_used,
            block_number: Some(state.block_number),
        };
        trace!(hash = %tx.hash, status, gas_used, "mined");
        state.receipts.insert(tx.hash, receipt);
        Ok(tx.hash)
    }
}

fn intrinsic_gas(input: &[u8], is_create: bool) -> u64 {
    let data: u64 = input
        .iter()
        .map(|b| if *b == 0 { TX_DATA_ZERO_GAS } else { TX_DATA_NONZERO_GAS })
        .sum();
    let create = if is_create { TX_CREATE_GAS } else { 0 };
    TX_BASE_GAS + data + create
}

impl ChainClient for DevChain {
    fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    fn get_balance(&self, address: Address) -> Result<U256> {
        Ok(self.state.lock().balance(&address))
    }

    fn get_transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.state.lock().nonce(&address))
    }

    fn gas_price(&self) -> Result<u128> {
        Ok(DEV_GAS_PRICE)
    }

    fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| KeelError::Rpc(format!("invalid raw transaction: {e}")))?;
        let TxEnvelope::Legacy(signed) = envelope else {
            return Err(KeelError::Rpc(
                "only legacy transactions are supported".into(),
            ));
        };

        let from = signed
            .signature()
            .recover_address_from_prehash(&signed.signature_hash())
            .map_err(|e| KeelError::Rpc(format!("invalid sender: {e}")))?;

        let tx = signed.tx();
        if let Some(chain_id) = tx.chain_id {
            if chain_id != self.chain_id {
                return Err(KeelError::Rpc(format!(
                    "invalid chain id: have {chain_id}, want {}",
                    self.chain_id
                )));
            }
        }

        self.execute(Execution {
            hash: *signed.hash(),
            from,
            to: tx.to,
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            gas_price: tx.gas_price,
            value: tx.value,
            input: tx.input.clone(),
        })
    }

    fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        let from = tx
            .from
            .ok_or_else(|| KeelError::Rpc("missing sender".into()))?;
        if !self.accounts.contains(&from) {
            return Err(KeelError::Rpc(format!("unknown account {from}")));
        }
        if let Some(chain_id) = tx.chain_id {
            if chain_id != self.chain_id {
                return Err(KeelError::Rpc(format!(
                    "invalid chain id: have {chain_id}, want {}",
                    self.chain_id
                )));
            }
        }

        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => self.state.lock().nonce(&from),
        };
        let mut preimage = Vec::with_capacity(20 + 8 + tx.data.len());
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&tx.data);

        self.execute(Execution {
            hash: keccak256(&preimage),
            from,
            to: tx.to.map(TxKind::Call).unwrap_or(TxKind::Create),
            nonce,
            gas_limit: tx.gas.unwrap_or(DEV_BLOCK_GAS_LIMIT / 3),
            gas_price: tx.gas_price.unwrap_or(DEV_GAS_PRICE),
            value: tx.value,
            input: tx.data.clone(),
        })
    }

    fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }

    fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self
            .state
            .lock()
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }
}
