//! Library linking for solc `.bin` output.
//!
//! Unlinked bytecode contains 40-character placeholders such as
//! `__$13811623e8434e588b8942cf9304d14b96$__`, and one comment line per
//! library naming its target:
//!
//! ```text
//! 6080...__$13811623e8434e588b8942cf9304d14b96$__...
//! // $13811623e8434e588b8942cf9304d14b96$ -> /project/contracts/Lib.sol:Lib
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use alloy_primitives::{Address, Bytes, keccak256};
use keel_core::utils::remove_0x;
use keel_core::{KeelError, Result};
use regex::Regex;
use tracing::trace;

/// Length of a placeholder, including the surrounding underscores.
pub const PLACEHOLDER_LEN: usize = 40;

static LINK_CONTRACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([A-Za-z0-9_]+)\s*$").expect("valid regex"));
static LINK_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[A-Za-z0-9]{34}\$").expect("valid regex"));
static BYTECODE_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__\$[A-Za-z0-9]{34}\$__").expect("valid regex"));

/// A placeholder and the library it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkDef {
    pub library: String,
    /// `$...$`, without the underscores.
    pub placeholder: String,
    /// Source file the compiler named, when present.
    pub source_path: Option<String>,
}

impl LinkDef {
    /// The token as it appears inside the bytecode.
    pub fn token(&self) -> String {
        format!("__{}__", self.placeholder)
    }
}

fn parse_def_line(line: &str) -> Result<LinkDef> {
    let placeholder = LINK_PLACEHOLDER_RE
        .find(line)
        .ok_or_else(|| KeelError::Link(format!("no placeholder in link definition: {line}")))?;
    let library = LINK_CONTRACT_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .ok_or_else(|| KeelError::Link(format!("no library name in link definition: {line}")))?;

    let target = line[placeholder.end()..].trim_start();
    let target = target.strip_prefix("->").unwrap_or(target).trim();
    let source_path = target
        .rsplit_once(':')
        .map(|(path, _)| path.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Ok(LinkDef {
        library: library.as_str().to_string(),
        placeholder: placeholder.as_str().to_string(),
        source_path,
    })
}

/// Read the link definitions from the comment lines of `bytecode`.
/// Repeated lines are reported once.
pub fn parse_link_defs(bytecode: &str) -> Result<Vec<LinkDef>> {
    let mut defs = BTreeSet::new();
    for line in bytecode.lines() {
        let line = line.trim();
        if line.starts_with("//") {
            defs.insert(parse_def_line(line)?);
        }
    }
    Ok(defs.into_iter().collect())
}

/// Drop comment and blank lines and join what is left.
pub fn clean_bytecode(bytecode: &str) -> String {
    bytecode
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("//"))
        .collect()
}

pub fn has_placeholders(bytecode: &str) -> bool {
    BYTECODE_PLACEHOLDER_RE.is_match(bytecode)
}

/// Substitute library addresses into `bytecode`.
///
/// Every library named by a link definition must have an address; the error
/// lists all that don't. Bytecode without link definitions comes back as is.
pub fn link(bytecode: &str, addresses: &HashMap<String, Address>) -> Result<String> {
    let defs = parse_link_defs(bytecode)?;
    if defs.is_empty() {
        if has_placeholders(bytecode) {
            return Err(KeelError::Link(
                "bytecode has placeholders but no link definitions".into(),
            ));
        }
        return Ok(bytecode.to_string());
    }

    let missing: BTreeSet<&str> = defs
        .iter()
        .filter(|d| !addresses.contains_key(&d.library))
        .map(|d| d.library.as_str())
        .collect();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.into_iter().collect();
        return Err(KeelError::Link(format!(
            "missing link addresses for: {}",
            names.join(", ")
        )));
    }

    let mut linked = bytecode.to_string();
    for def in &defs {
        let address = hex::encode(addresses[&def.library].as_slice());
        trace!(library = %def.library, placeholder = %def.placeholder, "linking");
        linked = linked.replace(&def.token(), &address);
    }

    let linked = clean_bytecode(&linked);
    if has_placeholders(&linked) {
        return Err(KeelError::Link(
            "bytecode still has placeholders without a link definition".into(),
        ));
    }
    Ok(linked)
}

/// Deterministic stand-in for a library's address: the first 40 hex
/// characters of keccak256 of its name.
pub fn pseudo_address(library: &str) -> String {
    hex::encode(&keccak256(library.as_bytes())[..20])
}

/// Content hash of `bytecode` that does not depend on where its libraries
/// live. Placeholders are replaced with [`pseudo_address`] of the library
/// name before hashing.
pub fn hash_address_independent(bytecode: &str) -> Result<String> {
    let defs = parse_link_defs(bytecode)?;
    let mut substituted = bytecode.to_string();
    for def in &defs {
        substituted = substituted.replace(&def.token(), &pseudo_address(&def.library));
    }

    let cleaned = clean_bytecode(&substituted);
    let digest = match hex::decode(remove_0x(&cleaned)) {
        Ok(bytes) => keccak256(&bytes),
        Err(_) => keccak256(cleaned.as_bytes()),
    };
    Ok(format!("0x{}", hex::encode(digest)))
}

/// Linked hex bytecode to raw bytes.
pub fn decode_bytecode(linked: &str) -> Result<Bytes> {
    let cleaned = clean_bytecode(linked);
    if has_placeholders(&cleaned) {
        return Err(KeelError::Link("bytecode is not fully linked".into()));
    }
    hex::decode(remove_0x(&cleaned))
        .map(Bytes::from)
        .map_err(|e| KeelError::Link(format!("bytecode is not valid hex: {e}")))
}
