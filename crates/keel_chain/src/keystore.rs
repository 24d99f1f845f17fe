//! Encrypted account files in the standard Ethereum secret-storage format.
//!
//! One file per account, named `UTC--<timestamp>--<address>`. Encryption and
//! MAC verification are delegated to `eth-keystore`; this module handles
//! discovery, unlocking, the per-process key cache, and signing.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use chrono::Utc;
use eth_keystore::KeystoreError;
use keel_core::{KeelError, ProjectContext, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::client::{ChainClient, TransactionRequest, normalize_address};

/// Length of a secp256k1 private key.
pub const PRIVATE_KEY_LEN: usize = 32;

/// An account backed by a keystore file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreAccount {
    pub address: Address,
    pub path: PathBuf,
    /// Balance in wei, when a chain connection was available while listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
}

/// Source of passwords when none was supplied and nothing is cached.
pub trait PasswordPrompt: Send + Sync {
    fn prompt(&self, address: Address) -> Result<Zeroizing<String>>;
}

/// Never prompts; unlocking without a password fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn prompt(&self, address: Address) -> Result<Zeroizing<String>> {
        Err(KeelError::Validation(format!(
            "a password is required to unlock {address}"
        )))
    }
}

/// Reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl PasswordPrompt for StdinPrompt {
    fn prompt(&self, address: Address) -> Result<Zeroizing<String>> {
        let mut stderr = std::io::stderr();
        write!(stderr, "Password for {address}: ")?;
        stderr.flush()?;

        let mut line = Zeroizing::new(String::new());
        std::io::stdin().lock().read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}

/// Directory of encrypted account files plus the unlocked-key cache.
pub struct KeyStore {
    dir: PathBuf,
    passphrase: Option<Zeroizing<String>>,
    prompt: Box<dyn PasswordPrompt>,
    unlocked: Mutex<HashMap<Address, Zeroizing<Vec<u8>>>>,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            passphrase: None,
            prompt: Box::new(NoPrompt),
            unlocked: Mutex::new(HashMap::new()),
        }
    }

    /// Keystore for the context's keystore dir, using its session passphrase.
    pub fn from_context(ctx: &ProjectContext) -> Self {
        let mut store = Self::new(ctx.keystore_dir());
        store.passphrase = ctx.passphrase().map(|p| Zeroizing::new(p.to_string()));
        store
    }

    pub fn with_prompt(mut self, prompt: Box<dyn PasswordPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the keystore directory. Files that are not valid keystore JSON
    /// are skipped. With a client, each account's balance is filled in.
    pub fn list_accounts(&self, client: Option<&dyn ChainClient>) -> Result<Vec<KeystoreAccount>> {
        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "keystore directory does not exist");
            return Ok(Vec::new());
        }

        let mut accounts = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match read_account_address(&path) {
                Ok(address) => accounts.push(KeystoreAccount {
                    address,
                    path,
                    balance: None,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping keystore file"),
            }
        }
        accounts.sort_by(|a, b| a.address.cmp(&b.address));

        if let Some(client) = client {
            for account in &mut accounts {
                account.balance = Some(client.get_balance(account.address)?);
            }
        }
        Ok(accounts)
    }

    pub fn get_account(&self, address: Address) -> Result<KeystoreAccount> {
        self.list_accounts(None)?
            .into_iter()
            .find(|a| a.address == address)
            .ok_or_else(|| KeelError::NotFound(format!("no keystore file for {address}")))
    }

    pub fn contains(&self, address: Address) -> Result<bool> {
        Ok(self
            .list_accounts(None)?
            .iter()
            .any(|a| a.address == address))
    }

    /// Membership test for an address in any letter case.
    pub fn account_known(&self, address: &str) -> Result<bool> {
        self.contains(normalize_address(address)?)
    }

    /// Generate a key, encrypt it under `password` and write it out.
    pub fn create_account(&self, password: &str) -> Result<Address> {
        std::fs::create_dir_all(&self.dir)?;

        let signer = PrivateKeySigner::random();
        let address = signer.address();
        let key = Zeroizing::new(signer.credential().to_bytes().to_vec());

        let filename = keystore_filename(address);
        eth_keystore::encrypt_key(
            &self.dir,
            &mut rand::thread_rng(),
            key.as_slice(),
            password,
            Some(&filename),
        )
        .map_err(|e| KeelError::Io(std::io::Error::other(e.to_string())))?;

        let path = self.dir.join(&filename);
        add_address_field(&path, address)?;
        restrict_permissions(&path)?;

        info!(address = %address, path = %path.display(), "account created");
        Ok(address)
    }

    /// Decrypt the key for `address`.
    ///
    /// An explicit password is always checked against the file. Without one,
    /// a previously unlocked key is reused, then the session passphrase, then
    /// the prompt.
    pub fn unlock(&self, address: Address, password: Option<&str>) -> Result<Zeroizing<Vec<u8>>> {
        if password.is_none() {
            if let Some(key) = self.unlocked.lock().get(&address) {
                return Ok(key.clone());
            }
        }

        let account = self.get_account(address)?;
        let password = match password {
            Some(p) => Zeroizing::new(p.to_string()),
            None => match &self.passphrase {
                Some(p) => p.clone(),
                None => self.prompt.prompt(address)?,
            },
        };

        let key = Zeroizing::new(
            eth_keystore::decrypt_key(&account.path, password.as_bytes()).map_err(|e| match e {
                KeystoreError::MacMismatch => KeelError::WrongPassword {
                    address: address.to_string(),
                },
                other => KeelError::CorruptState(format!(
                    "unable to decrypt {}: {other}",
                    account.path.display()
                )),
            })?,
        );

        if key.len() != PRIVATE_KEY_LEN {
            return Err(KeelError::CorruptState(format!(
                "{} holds a key of {} bytes",
                account.path.display(),
                key.len()
            )));
        }
        let signer = signer_from_key(&key)?;
        if signer.address() != address {
            return Err(KeelError::CorruptState(format!(
                "{} decrypts to a key for {}",
                account.path.display(),
                signer.address()
            )));
        }

        debug!(address = %address, "account unlocked");
        self.unlocked.lock().insert(address, key.clone());
        Ok(key)
    }

    pub fn is_unlocked(&self, address: Address) -> bool {
        self.unlocked.lock().contains_key(&address)
    }

    /// Drop every cached key.
    pub fn lock_all(&self) {
        self.unlocked.lock().clear();
    }

    /// Sign `tx` as `address`.
    ///
    /// Gas price and gas limit must already be set. A missing nonce or chain
    /// id is fetched from the client.
    pub fn sign_transaction(
        &self,
        client: Option<&dyn ChainClient>,
        address: Address,
        tx: &TransactionRequest,
        password: Option<&str>,
    ) -> Result<SignedTransaction> {
        let client = client.ok_or_else(|| {
            KeelError::Validation("cannot sign a transaction without a chain connection".into())
        })?;
        let gas_price = tx.gas_price.ok_or_else(|| {
            KeelError::Validation("gas price must be set before signing".into())
        })?;
        let gas_limit = tx
            .gas
            .ok_or_else(|| KeelError::Validation("gas limit must be set before signing".into()))?;
        if let Some(from) = tx.from {
            if from != address {
                return Err(KeelError::Validation(format!(
                    "transaction is from {from} but signing account is {address}"
                )));
            }
        }

        let nonce = match tx.nonce {
            Some(nonce) => nonce,
            None => client.get_transaction_count(address)?,
        };
        let chain_id = match tx.chain_id {
            Some(id) => id,
            None => client.chain_id()?,
        };

        let key = self.unlock(address, password)?;
        let signer = signer_from_key(&key)?;

        let legacy = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: tx.to.map(TxKind::Call).unwrap_or(TxKind::Create),
            value: tx.value,
            input: tx.data.clone(),
        };
        let signature = signer
            .sign_hash_sync(&legacy.signature_hash())
            .map_err(|e| KeelError::Validation(format!("signing failed: {e}")))?;
        let signed = legacy.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::from(signed).encoded_2718();

        debug!(address = %address, nonce, chain_id, hash = %hash, "transaction signed");
        Ok(SignedTransaction {
            raw: Bytes::from(raw),
            hash,
        })
    }
}

fn signer_from_key(key: &[u8]) -> Result<PrivateKeySigner> {
    PrivateKeySigner::from_slice(key)
        .map_err(|e| KeelError::CorruptState(format!("invalid private key: {e}")))
}

/// `UTC--2024-05-01T10-20-30.123456789Z--5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed`
fn keystore_filename(address: Address) -> String {
    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.9fZ");
    let checksummed = address.to_checksum(None);
    format!(
        "UTC--{timestamp}--{}",
        checksummed.trim_start_matches("0x")
    )
}

#[derive(Deserialize)]
struct KeystoreHeader {
    address: Option<String>,
    crypto: Option<serde_json::Value>,
    #[serde(rename = "Crypto")]
    crypto_upper: Option<serde_json::Value>,
}

fn read_account_address(path: &Path) -> Result<Address> {
    let content = std::fs::read_to_string(path)?;
    let header: KeystoreHeader = serde_json::from_str(&content)?;
    if header.crypto.is_none() && header.crypto_upper.is_none() {
        return Err(KeelError::CorruptState("no crypto section".into()));
    }
    let raw = header
        .address
        .ok_or_else(|| KeelError::CorruptState("no address field".into()))?;
    let prefixed = if raw.starts_with("0x") || raw.starts_with("0X") {
        raw
    } else {
        format!("0x{raw}")
    };
    Address::from_str(&prefixed)
        .map_err(|e| KeelError::CorruptState(format!("invalid address field: {e}")))
}

/// `eth-keystore` omits the address; wallets expect it.
fn add_address_field(path: &Path, address: Address) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut value: serde_json::Value = serde_json::from_str(&content)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "address".into(),
            serde_json::Value::String(hex::encode(address.as_slice())),
        );
    }
    std::fs::write(path, serde_json::to_string(&value)?)?;
    Ok(())
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
