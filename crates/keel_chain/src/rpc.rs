//! Blocking JSON-RPC client for real nodes.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, B256, Bytes, U256};
use keel_core::utils::remove_0x;
use keel_core::{KeelConfig, KeelError, Result};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::client::{ChainClient, TransactionReceipt, TransactionRequest};

enum Transport {
    Http {
        client: reqwest::blocking::Client,
        url: String,
    },
    Ipc {
        path: PathBuf,
    },
}

/// JSON-RPC client speaking to a node over HTTP or a Unix socket.
pub struct JsonRpcClient {
    transport: Transport,
    next_id: AtomicU64,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl JsonRpcClient {
    pub fn http(url: &str, config: &KeelConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()
            .map_err(|e| KeelError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_transport(
            Transport::Http {
                client,
                url: url.to_string(),
            },
            config,
        ))
    }

    pub fn ipc(path: PathBuf, config: &KeelConfig) -> Result<Self> {
        if !cfg!(unix) {
            return Err(KeelError::Configuration(
                "ipc connections are only supported on unix".into(),
            ));
        }
        Ok(Self::with_transport(Transport::Ipc { path }, config))
    }

    fn with_transport(transport: Transport, config: &KeelConfig) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
            receipt_timeout: Duration::from_secs(config.rpc_timeout_secs.saturating_mul(10)),
        }
    }

    /// Perform one call and return its `result` member.
    pub fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "rpc request");

        let response = match &self.transport {
            Transport::Http { client, url } => client
                .post(url)
                .json(&body)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json::<Value>())
                .map_err(|e| KeelError::Rpc(format!("{method}: {e}")))?,
            Transport::Ipc { path } => ipc_roundtrip(path, &body)?,
        };

        parse_response(method, response)
    }
}

#[cfg(unix)]
fn ipc_roundtrip(path: &std::path::Path, body: &Value) -> Result<Value> {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(path).map_err(|e| {
        KeelError::Rpc(format!("connection to {} failed: {e}", path.display()))
    })?;
    serde_json::to_writer(&mut stream, body)?;
    stream.flush()?;

    let mut values = serde_json::Deserializer::from_reader(stream).into_iter::<Value>();
    match values.next() {
        Some(value) => Ok(value?),
        None => Err(KeelError::Rpc("ipc connection closed without a response".into())),
    }
}

#[cfg(not(unix))]
fn ipc_roundtrip(_path: &std::path::Path, _body: &Value) -> Result<Value> {
    Err(KeelError::Configuration(
        "ipc connections are only supported on unix".into(),
    ))
}

fn parse_response(method: &str, mut response: Value) -> Result<Value> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        debug!(method, %message, "rpc error");
        return Err(KeelError::Rpc(message));
    }
    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(KeelError::Rpc(format!("{method}: response has no result"))),
    }
}

// ---------------------------------------------------------------------------
// Hex quantity helpers
// ---------------------------------------------------------------------------

fn as_str<'a>(value: &'a Value, what: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| KeelError::Rpc(format!("expected hex string for {what}, got {value}")))
}

pub(crate) fn parse_u256(value: &Value, what: &str) -> Result<U256> {
    let s = as_str(value, what)?;
    U256::from_str_radix(remove_0x(s), 16)
        .map_err(|e| KeelError::Rpc(format!("invalid quantity for {what}: {e}")))
}

pub(crate) fn parse_u64(value: &Value, what: &str) -> Result<u64> {
    let s = as_str(value, what)?;
    u64::from_str_radix(remove_0x(s), 16)
        .map_err(|e| KeelError::Rpc(format!("invalid quantity for {what}: {e}")))
}

fn parse_u128(value: &Value, what: &str) -> Result<u128> {
    let s = as_str(value, what)?;
    u128::from_str_radix(remove_0x(s), 16)
        .map_err(|e| KeelError::Rpc(format!("invalid quantity for {what}: {e}")))
}

fn parse_b256(value: &Value, what: &str) -> Result<B256> {
    B256::from_str(as_str(value, what)?)
        .map_err(|e| KeelError::Rpc(format!("invalid hash for {what}: {e}")))
}

fn parse_address(value: &Value, what: &str) -> Result<Address> {
    Address::from_str(as_str(value, what)?)
        .map_err(|e| KeelError::Rpc(format!("invalid address for {what}: {e}")))
}

fn parse_bytes(value: &Value, what: &str) -> Result<Bytes> {
    let decoded = hex::decode(remove_0x(as_str(value, what)?))
        .map_err(|e| KeelError::Rpc(format!("invalid bytes for {what}: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn quantity(v: impl std::fmt::LowerHex) -> String {
    format!("0x{v:x}")
}

/// JSON-RPC shape of a transaction request.
pub(crate) fn request_to_json(tx: &TransactionRequest) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(from) = tx.from {
        obj.insert("from".into(), json!(from.to_string()));
    }
    if let Some(to) = tx.to {
        obj.insert("to".into(), json!(to.to_string()));
    }
    obj.insert("value".into(), json!(quantity(tx.value)));
    obj.insert("data".into(), json!(format!("0x{}", hex::encode(&tx.data))));
    if let Some(gas) = tx.gas {
        obj.insert("gas".into(), json!(quantity(gas)));
    }
    if let Some(price) = tx.gas_price {
        obj.insert("gasPrice".into(), json!(quantity(price)));
    }
    if let Some(nonce) = tx.nonce {
        obj.insert("nonce".into(), json!(quantity(nonce)));
    }
    if let Some(chain_id) = tx.chain_id {
        obj.insert("chainId".into(), json!(quantity(chain_id)));
    }
    Value::Object(obj)
}

pub(crate) fn receipt_from_json(value: &Value) -> Result<TransactionReceipt> {
    let contract_address = match value.get("contractAddress") {
        Some(v) if !v.is_null() => Some(parse_address(v, "contractAddress")?),
        _ => None,
    };
    let status = match value.get("status") {
        Some(v) if !v.is_null() => parse_u64(v, "status")? == 1,
        // Pre-byzantium receipts carry no status.
        _ => true,
    };
    let block_number = match value.get("blockNumber") {
        Some(v) if !v.is_null() => Some(parse_u64(v, "blockNumber")?),
        _ => None,
    };
    Ok(TransactionReceipt {
        transaction_hash: parse_b256(&value["transactionHash"], "transactionHash")?,
        contract_address,
        status,
        gas_used: parse_u64(&value["gasUsed"], "gasUsed")?,
        block_number,
    })
}

impl ChainClient for JsonRpcClient {
    fn chain_id(&self) -> Result<u64> {
        let result = self.request("eth_chainId", json!([]))?;
        parse_u64(&result, "eth_chainId")
    }

    fn get_balance(&self, address: Address) -> Result<U256> {
        let result = self.request("eth_getBalance", json!([address.to_string(), "latest"]))?;
        parse_u256(&result, "eth_getBalance")
    }

    fn get_transaction_count(&self, address: Address) -> Result<u64> {
        let result = self.request(
            "eth_getTransactionCount",
            json!([address.to_string(), "pending"]),
        )?;
        parse_u64(&result, "eth_getTransactionCount")
    }

    fn gas_price(&self) -> Result<u128> {
        let result = self.request("eth_gasPrice", json!([]))?;
        parse_u128(&result, "eth_gasPrice")
    }

    fn accounts(&self) -> Result<Vec<Address>> {
        let result = self.request("eth_accounts", json!([]))?;
        result
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|v| parse_address(v, "eth_accounts"))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let result = self.request(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw))]),
        )?;
        parse_b256(&result, "eth_sendRawTransaction")
    }

    fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        let result = self.request("eth_sendTransaction", json!([request_to_json(tx)]))?;
        parse_b256(&result, "eth_sendTransaction")
    }

    fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let result = self.request("eth_getTransactionReceipt", json!([hash.to_string()]))?;
        if result.is_null() {
            return Ok(None);
        }
        receipt_from_json(&result).map(Some)
    }

    fn get_code(&self, address: Address) -> Result<Bytes> {
        let result = self.request("eth_getCode", json!([address.to_string(), "latest"]))?;
        parse_bytes(&result, "eth_getCode")
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        let started = Instant::now();
        loop {
            if let Some(receipt) = self.get_transaction_receipt(hash)? {
                return Ok(receipt);
            }
            if started.elapsed() > self.receipt_timeout {
                return Err(KeelError::Rpc(format!(
                    "timeout waiting for receipt of {hash} after {:?}",
                    self.receipt_timeout
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
