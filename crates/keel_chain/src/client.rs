use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use keel_core::{KeelConfig, KeelError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dev_chain::DevChain;
use crate::networks::{ConnectionKind, NetworkDefinition};
use crate::rpc::JsonRpcClient;

/// Endpoint used for `type: auto`.
pub const AUTO_ENDPOINT: &str = "http://localhost:8545";

/// A transaction as handed to the signing pipeline. Unset fields are filled
/// in (nonce, chain id) or rejected (gas price) further down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Option<Address>,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
}

impl TransactionRequest {
    /// A contract-creation transaction carrying `code`.
    pub fn deploy(from: Address, code: Bytes) -> Self {
        Self {
            from: Some(from),
            data: code,
            ..Default::default()
        }
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Upper bound on what the transaction can cost the sender.
    pub fn max_cost(&self) -> Option<U256> {
        let gas = U256::from(self.gas?);
        let price = U256::from(self.gas_price?);
        Some(gas.saturating_mul(price).saturating_add(self.value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub contract_address: Option<Address>,
    /// `true` when the transaction executed successfully.
    pub status: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

/// The subset of node functionality the deployment engine drives.
///
/// All calls block. Provider-side failures surface as [`KeelError::Rpc`]
/// carrying the provider's message unchanged.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> Result<u64>;

    fn get_balance(&self, address: Address) -> Result<U256>;

    fn get_transaction_count(&self, address: Address) -> Result<u64>;

    fn gas_price(&self) -> Result<u128>;

    /// Accounts the node itself can sign for.
    fn accounts(&self) -> Result<Vec<Address>>;

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256>;

    /// Ask the node to sign and send.
    fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256>;

    fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;

    fn get_code(&self, address: Address) -> Result<Bytes>;

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    /// Block until the transaction is mined. Timeouts, if any, are the
    /// implementation's policy.
    fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        loop {
            if let Some(receipt) = self.get_transaction_receipt(hash)? {
                return Ok(receipt);
            }
            std::thread::sleep(self.poll_interval());
        }
    }
}

/// Build a client for a network definition.
pub fn connect(network: &NetworkDefinition, config: &KeelConfig) -> Result<Arc<dyn ChainClient>> {
    debug!(network = %network.name, kind = ?network.kind, "connecting");
    network.validate()?;

    let client: Arc<dyn ChainClient> = match network.kind {
        ConnectionKind::Auto => Arc::new(JsonRpcClient::http(AUTO_ENDPOINT, config)?),
        ConnectionKind::Http => {
            let url = network.url.as_deref().unwrap_or(AUTO_ENDPOINT);
            Arc::new(JsonRpcClient::http(url, config)?)
        }
        ConnectionKind::Ipc => {
            let path = network.ipc_path().ok_or_else(|| {
                KeelError::Configuration(format!("network '{}' has no ipc file", network.name))
            })?;
            Arc::new(JsonRpcClient::ipc(path, config)?)
        }
        ConnectionKind::TestChain => Arc::new(DevChain::new()),
        ConnectionKind::Websocket => {
            return Err(KeelError::Configuration(format!(
                "network '{}': websocket connections are not supported, use http or ipc",
                network.name
            )));
        }
    };

    info!(network = %network.name, "connected");
    Ok(client)
}

/// Parse an address in any case and return it; display is checksummed.
pub fn normalize_address(address: &str) -> Result<Address> {
    Address::from_str(address.trim())
        .map_err(|e| KeelError::Validation(format!("invalid address {address}: {e}")))
}
