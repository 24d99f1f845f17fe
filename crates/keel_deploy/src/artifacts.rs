//! Compiler output as read from `<project>/build/<Name>/<Name>.{bin,abi}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use keel_core::{KeelError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const BIN_EXTENSION: &str = "bin";
pub const ABI_EXTENSION: &str = "abi";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Solidity,
    Vyper,
}

impl SourceKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "sol" => Some(Self::Solidity),
            "vy" => Some(Self::Vyper),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiItemKind {
    Function,
    Constructor,
    Event,
    Fallback,
    Receive,
    Error,
}

fn default_item_kind() -> AbiItemKind {
    AbiItemKind::Function
}

/// A function, event or constructor parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<AbiParam>>,
    #[serde(
        default,
        rename = "internalType",
        skip_serializing_if = "Option::is_none"
    )]
    pub internal_type: Option<String>,
}

/// One entry of a contract ABI. Keys the compiler emits that are not
/// modelled here (`constant`, `payable`, `gas`, ...) are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbiItem {
    #[serde(rename = "type", default = "default_item_kind")]
    pub kind: AbiItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<AbiParam>>,
    #[serde(
        default,
        rename = "stateMutability",
        skip_serializing_if = "Option::is_none"
    )]
    pub state_mutability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Parse an ABI JSON array.
pub fn parse_abi(content: &str) -> Result<Vec<AbiItem>> {
    Ok(serde_json::from_str(content)?)
}

/// Output of the compiler for one contract. Read-only here.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledContract {
    pub name: String,
    pub abi: Vec<AbiItem>,
    /// Hex, possibly with link placeholders and `//` link comment lines.
    pub bytecode: String,
    pub source_kind: SourceKind,
}

impl CompiledContract {
    pub fn new(name: impl Into<String>, abi: Vec<AbiItem>, bytecode: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abi,
            bytecode: bytecode.into(),
            source_kind: SourceKind::Solidity,
        }
    }

    /// Interfaces and abstract contracts compile to no code.
    pub fn has_bytecode(&self) -> bool {
        self.bytecode.lines().any(|l| {
            let l = l.trim();
            !l.is_empty() && !l.starts_with("//") && l != "0x"
        })
    }

    /// The constructor entry, if the ABI declares one.
    pub fn constructor(&self) -> Option<&AbiItem> {
        self.abi.iter().find(|i| i.kind == AbiItemKind::Constructor)
    }

    /// Load `<build_dir>/<name>/<name>.{bin,abi}`.
    pub fn load(build_dir: &Path, name: &str) -> Result<Self> {
        let dir = build_dir.join(name);
        let bin_path = dir.join(format!("{name}.{BIN_EXTENSION}"));
        let abi_path = dir.join(format!("{name}.{ABI_EXTENSION}"));

        if !bin_path.is_file() {
            return Err(KeelError::NotFound(format!(
                "no compiled bytecode for {name} at {}",
                bin_path.display()
            )));
        }
        let bytecode = std::fs::read_to_string(&bin_path)?;
        let abi = if abi_path.is_file() {
            parse_abi(&std::fs::read_to_string(&abi_path)?)?
        } else {
            warn!(contract = name, "no ABI file, using an empty ABI");
            Vec::new()
        };

        Ok(Self {
            name: name.to_string(),
            abi,
            bytecode,
            source_kind: SourceKind::Solidity,
        })
    }
}

/// Load every contract in `build_dir`, sorted by name. Source kinds are
/// taken from the matching file under `contracts_dir` when there is one.
pub fn load_all(build_dir: &Path, contracts_dir: &Path) -> Result<Vec<CompiledContract>> {
    if !build_dir.is_dir() {
        debug!(dir = %build_dir.display(), "build directory does not exist");
        return Ok(Vec::new());
    }

    let sources = source_files(contracts_dir);
    let mut contracts = Vec::new();
    for entry in std::fs::read_dir(build_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let bin = entry.path().join(format!("{name}.{BIN_EXTENSION}"));
        if !bin.is_file() {
            debug!(dir = %entry.path().display(), "not a contract build directory");
            continue;
        }

        let mut contract = CompiledContract::load(build_dir, &name)?;
        if let Some(kind) = sources.get(&name) {
            contract.source_kind = *kind;
        }
        contracts.push(contract);
    }

    contracts.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(count = contracts.len(), "loaded compiled contracts");
    Ok(contracts)
}

/// Map of file stem to source kind for every source under `dir`.
fn source_files(dir: &Path) -> BTreeMap<String, SourceKind> {
    let mut found = BTreeMap::new();
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let kind = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(SourceKind::from_extension);
            let stem = path.file_stem().and_then(|s| s.to_str());
            if let (Some(kind), Some(stem)) = (kind, stem) {
                found.insert(stem.to_string(), kind);
            }
        }
    }
    found
}
