//! Per-project record of what was deployed where (`metafile.json`).
//!
//! ```json
//! {
//!   "contracts": [{
//!     "name": "Main",
//!     "networks": {
//!       "1": {
//!         "deployedHash": "0x...",
//!         "deployedInstances": [
//!           {"hash": "0x...", "date": "2024-05-01T10:20:30.000000Z", "address": "0x...", "abi": []}
//!         ]
//!       }
//!     }
//!   }],
//!   "seenAccounts": ["0x..."],
//!   "defaultAccount": "0x..."
//! }
//! ```
//!
//! The file is the source of truth. Every mutator reloads it first and
//! writes it back before returning.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::Address;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use keel_chain::networks::is_official_chain_id;
use keel_core::utils::{hash_file, normalize_hexstring};
use keel_core::{KeelError, ProjectContext, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::artifacts::AbiItem;

mod ledger_date {
    use super::*;

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(date) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(date.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| serde::de::Error::custom(format!("invalid date {raw}: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub hash: String,
    #[serde(with = "ledger_date")]
    pub date: DateTime<Utc>,
    pub address: String,
    #[serde(default)]
    pub abi: Vec<AbiItem>,
}

impl DeploymentRecord {
    pub fn address(&self) -> Result<Address> {
        Address::from_str(&self.address).map_err(|e| {
            KeelError::CorruptState(format!("invalid address {} in ledger: {e}", self.address))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub deployed_hash: String,
    #[serde(default)]
    pub deployed_instances: Vec<DeploymentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub name: String,
    /// Keyed by chain id.
    #[serde(default)]
    pub networks: BTreeMap<u64, NetworkEntry>,
}

impl ContractEntry {
    pub fn latest(&self, chain_id: u64) -> Option<&DeploymentRecord> {
        self.networks
            .get(&chain_id)
            .and_then(|n| n.deployed_instances.last())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    #[serde(default)]
    pub contracts: Vec<ContractEntry>,
    #[serde(default)]
    pub seen_accounts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_account: Option<String>,
}

impl LedgerDocument {
    fn find(&self, name: &str) -> Result<Option<usize>> {
        let mut hits = self
            .contracts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == name)
            .map(|(i, _)| i);
        let first = hits.next();
        if hits.next().is_some() {
            return Err(KeelError::CorruptState(format!(
                "multiple ledger entries for contract {name}"
            )));
        }
        Ok(first)
    }
}

/// The deployment ledger of one project.
pub struct DeploymentLedger {
    path: PathBuf,
    read_only: bool,
    cache: Mutex<Option<LedgerDocument>>,
}

impl DeploymentLedger {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
            cache: Mutex::new(None),
        }
    }

    pub fn from_context(ctx: &ProjectContext) -> Self {
        Self::open(ctx.ledger_path())
    }

    /// A ledger that never touches disk. It starts empty, and changes live
    /// only as long as the value.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: true,
            cache: Mutex::new(Some(LedgerDocument::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read_from_disk(&self) -> Result<LedgerDocument> {
        if !self.path.exists() {
            return Ok(LedgerDocument::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(LedgerDocument::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            KeelError::CorruptState(format!("unable to read {}: {e}", self.path.display()))
        })
    }

    fn write_to_disk(&self, doc: &LedgerDocument) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(doc)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| KeelError::Io(e.error))?;
        debug!(path = %self.path.display(), "ledger saved");
        Ok(())
    }

    /// Run `f` against the current document, loading it on first use.
    fn read<T>(&self, f: impl FnOnce(&LedgerDocument) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock();
        if cache.is_none() {
            *cache = Some(self.read_from_disk()?);
        }
        match cache.as_ref() {
            Some(doc) => f(doc),
            None => Err(KeelError::CorruptState("ledger cache is empty".into())),
        }
    }

    /// Reload, apply `f`, save. Nothing is saved if `f` fails.
    fn mutate<T>(&self, f: impl FnOnce(&mut LedgerDocument) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock();
        let mut doc = if self.read_only {
            cache.take().unwrap_or_default()
        } else {
            self.read_from_disk()?
        };

        let out = f(&mut doc);
        if self.read_only {
            *cache = Some(doc);
            return out;
        }
        if out.is_err() {
            *cache = None;
            return out;
        }
        if let Err(e) = self.write_to_disk(&doc) {
            *cache = None;
            return Err(e);
        }
        *cache = Some(doc);
        out
    }

    /// Drop the in-memory copy so the next read goes to disk.
    pub fn reload(&self) {
        if !self.read_only {
            *self.cache.lock() = None;
        }
    }

    pub fn get_all_contracts(&self) -> Result<Vec<ContractEntry>> {
        self.read(|doc| Ok(doc.contracts.clone()))
    }

    /// The entry for `name`. Two entries with the same name mean the file
    /// is corrupt.
    pub fn get_contract(&self, name: &str) -> Result<Option<ContractEntry>> {
        self.read(|doc| Ok(doc.find(name)?.map(|i| doc.contracts[i].clone())))
    }

    pub fn latest_hash(&self, name: &str, chain_id: u64) -> Result<Option<String>> {
        Ok(self
            .get_contract(name)?
            .and_then(|c| c.networks.get(&chain_id).map(|n| n.deployed_hash.clone())))
    }

    pub fn latest_deployment(&self, name: &str, chain_id: u64) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .get_contract(name)?
            .and_then(|c| c.latest(chain_id).cloned()))
    }

    /// Append a deployment and make its hash the latest for `chain_id`.
    pub fn add(
        &self,
        name: &str,
        chain_id: u64,
        address: Address,
        abi: &[AbiItem],
        hash: &str,
    ) -> Result<DeploymentRecord> {
        let record = DeploymentRecord {
            hash: normalize_hexstring(hash)?,
            date: Utc::now(),
            address: address.to_checksum(None),
            abi: abi.to_vec(),
        };

        self.mutate(|doc| {
            let idx = match doc.find(name)? {
                Some(i) => i,
                None => {
                    doc.contracts.push(ContractEntry {
                        name: name.to_string(),
                        networks: BTreeMap::new(),
                    });
                    doc.contracts.len() - 1
                }
            };
            let network = doc.contracts[idx]
                .networks
                .entry(chain_id)
                .or_insert_with(|| NetworkEntry {
                    deployed_hash: record.hash.clone(),
                    deployed_instances: Vec::new(),
                });
            network.deployed_hash = record.hash.clone();
            network.deployed_instances.push(record.clone());
            Ok(())
        })?;

        info!(contract = name, chain_id, address = %record.address, "deployment recorded");
        Ok(record)
    }

    pub fn account_known(&self, address: Address) -> Result<bool> {
        let wanted = address.to_checksum(None);
        self.read(|doc| Ok(doc.seen_accounts.iter().any(|a| *a == wanted)))
    }

    pub fn add_account(&self, address: Address) -> Result<()> {
        let checksummed = address.to_checksum(None);
        self.mutate(|doc| {
            if !doc.seen_accounts.contains(&checksummed) {
                doc.seen_accounts.push(checksummed.clone());
            }
            Ok(())
        })
    }

    /// Set the default account, remembering it as seen.
    pub fn set_default_account(&self, address: Address) -> Result<()> {
        let checksummed = address.to_checksum(None);
        self.mutate(|doc| {
            if !doc.seen_accounts.contains(&checksummed) {
                doc.seen_accounts.push(checksummed.clone());
            }
            doc.default_account = Some(checksummed.clone());
            Ok(())
        })
    }

    pub fn get_default_account(&self) -> Result<Option<Address>> {
        self.read(|doc| {
            doc.default_account
                .as_deref()
                .map(|a| {
                    Address::from_str(a).map_err(|e| {
                        KeelError::CorruptState(format!("invalid default account {a}: {e}"))
                    })
                })
                .transpose()
        })
    }

    /// Remove deployments on non-official chains. Returns the removed
    /// `(contract, chain id)` pairs. A dry run only reports them.
    pub fn cleanup(&self, dry_run: bool) -> Result<Vec<(String, u64)>> {
        let collect = |doc: &LedgerDocument| -> Vec<(String, u64)> {
            doc.contracts
                .iter()
                .flat_map(|c| {
                    c.networks
                        .keys()
                        .filter(|id| !is_official_chain_id(**id))
                        .map(|id| (c.name.clone(), *id))
                })
                .collect()
        };

        if dry_run {
            // Same view of the file the real run would mutate.
            self.reload();
            let found = self.read(|doc| Ok(collect(doc)))?;
            for (name, chain_id) in &found {
                info!(contract = %name, chain_id, "would remove test deployment");
            }
            return Ok(found);
        }

        let removed = self.mutate(|doc| {
            let found = collect(&*doc);
            for contract in &mut doc.contracts {
                contract.networks.retain(|id, _| is_official_chain_id(*id));
            }
            Ok(found)
        })?;
        for (name, chain_id) in &removed {
            info!(contract = %name, chain_id, "removed test deployment");
        }
        Ok(removed)
    }

    /// Copy the ledger file to `dest` and verify the copy. Returns `false`
    /// if the copy does not match.
    pub fn backup(&self, dest: &Path) -> Result<bool> {
        if !self.path.is_file() {
            return Err(KeelError::NotFound(format!(
                "no ledger at {}",
                self.path.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::copy(&self.path, dest)?;

        let source_hash = hash_file(&self.path)?;
        let dest_hash = hash_file(dest)?;
        if source_hash != dest_hash {
            error!(
                source = %self.path.display(),
                dest = %dest.display(),
                "ledger backup does not match the original"
            );
            return Ok(false);
        }
        if self.read_only {
            warn!("backing up the on-disk ledger of a read-only session");
        }
        info!(dest = %dest.display(), "ledger backed up");
        Ok(true)
    }
}
