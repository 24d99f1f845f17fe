//! Project network definitions loaded from `networks.yml`.
//!
//! ```yaml
//! dev:
//!   type: auto
//!   autodeploy_allowed: true
//!   use_default_account: true
//!
//! mainnet:
//!   type: http
//!   url: https://mainnet.example.com
//!
//! geth:
//!   type: ipc
//!   file: ~/.ethereum/geth.ipc
//!
//! test:
//!   type: eth_tester
//!   autodeploy_allowed: true
//!   use_default_account: true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use keel_core::{KeelError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Name of the network that is available even when not configured.
pub const IMPLICIT_TEST_NETWORK: &str = "test";

/// Chain ids at or below this value are public chains. Ledger cleanup and
/// transaction routing both key off it.
pub const OFFICIAL_CHAIN_ID_CEILING: u64 = 100;

pub fn is_official_chain_id(chain_id: u64) -> bool {
    chain_id <= OFFICIAL_CHAIN_ID_CEILING
}

/// How to reach a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Whatever answers on the default local endpoint.
    Auto,
    Http,
    Websocket,
    Ipc,
    /// In-process test backend.
    #[serde(
        rename = "test-chain",
        alias = "eth_tester",
        alias = "eth-tester",
        alias = "ethereum-tester"
    )]
    TestChain,
}

impl ConnectionKind {
    pub fn is_test_chain(&self) -> bool {
        matches!(self, ConnectionKind::TestChain)
    }
}

/// A single named network from `networks.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// IPC socket path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub autodeploy_allowed: bool,
    #[serde(default)]
    pub use_default_account: bool,
}

impl NetworkDefinition {
    /// The definition used for `test` when the project does not declare it.
    pub fn implicit_test() -> Self {
        Self {
            name: IMPLICIT_TEST_NETWORK.into(),
            kind: ConnectionKind::TestChain,
            url: None,
            file: None,
            autodeploy_allowed: true,
            use_default_account: true,
        }
    }

    /// Check the fields required by the connection kind.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            ConnectionKind::Http | ConnectionKind::Websocket => {
                let url = self.url.as_deref().ok_or_else(|| {
                    KeelError::Configuration(format!(
                        "network '{}' of type {:?} requires a url",
                        self.name, self.kind
                    ))
                })?;
                if !validate_url(url, self.kind) {
                    return Err(KeelError::Configuration(format!(
                        "network '{}' has an invalid url: {url}",
                        self.name
                    )));
                }
            }
            ConnectionKind::Ipc => {
                if self.file.is_none() && self.url.is_none() {
                    return Err(KeelError::Configuration(format!(
                        "network '{}' of type ipc requires a file",
                        self.name
                    )));
                }
            }
            ConnectionKind::Auto | ConnectionKind::TestChain => {}
        }
        Ok(())
    }

    /// IPC socket path with `~` expanded.
    pub fn ipc_path(&self) -> Option<PathBuf> {
        let raw = self
            .file
            .clone()
            .or_else(|| self.url.as_ref().map(PathBuf::from))?;
        Some(expand_home(&raw))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// All network definitions of a project.
#[derive(Debug, Clone, Default)]
pub struct NetworksConfig {
    path: Option<PathBuf>,
    networks: BTreeMap<String, NetworkDefinition>,
}

impl NetworksConfig {
    /// Load `networks.yml`. A missing file yields an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "networks.yml not found");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                networks: BTreeMap::new(),
            });
        }

        debug!(path = %path.display(), "loading network configuration");
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse and validate network definitions from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(KeelError::Configuration(
                "Unable to load networks.yml: file is empty".into(),
            ));
        }

        let mut networks: BTreeMap<String, NetworkDefinition> = serde_yaml::from_str(content)
            .map_err(|e| KeelError::Configuration(format!("Unable to load networks.yml: {e}")))?;

        for (name, def) in networks.iter_mut() {
            def.name = name.clone();
            def.validate()?;
        }

        Ok(Self { path: None, networks })
    }

    pub fn network_names(&self) -> Vec<&str> {
        self.networks.keys().map(String::as_str).collect()
    }

    pub fn network_config_exists(&self, name: &str) -> bool {
        self.networks.contains_key(name)
    }

    /// Return the definition for `name`. `test` is always available.
    pub fn get_network_config(&self, name: &str) -> Result<NetworkDefinition> {
        if let Some(def) = self.networks.get(name) {
            return Ok(def.clone());
        }
        if name == IMPLICIT_TEST_NETWORK {
            return Ok(NetworkDefinition::implicit_test());
        }
        let location = self
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "networks.yml".into());
        Err(KeelError::Configuration(format!(
            "Network config for '{name}' does not exist in {location}"
        )))
    }

    /// Autodeploy must be explicitly allowed.
    pub fn autodeploy_allowed(&self, name: &str) -> Result<bool> {
        Ok(self.get_network_config(name)?.autodeploy_allowed)
    }

    pub fn use_default_account(&self, name: &str) -> Result<bool> {
        Ok(self.get_network_config(name)?.use_default_account)
    }

    pub fn is_test_chain(&self, name: &str) -> Result<bool> {
        Ok(self.get_network_config(name)?.kind.is_test_chain())
    }
}

/// Validate that a URL is well-formed and uses a scheme suitable for `kind`.
pub fn validate_url(url: &str, kind: ConnectionKind) -> bool {
    let allowed: &[&str] = match kind {
        ConnectionKind::Http | ConnectionKind::Auto => &["http", "https"],
        ConnectionKind::Websocket => &["ws", "wss"],
        ConnectionKind::Ipc | ConnectionKind::TestChain => return false,
    };
    match url::Url::parse(url) {
        Ok(parsed) => allowed.contains(&parsed.scheme()) && parsed.host().is_some(),
        Err(_) => false,
    }
}
