use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// User configuration stored at `~/.keel/config.json`.
///
/// Project-specific settings (networks, ledger) live in the project
/// directory; this file only holds per-user defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Directory holding the encrypted secret-storage files.
    pub keystore_dir: PathBuf,

    // Transactions
    pub default_gas_limit: u64,
    /// Overrides the node's reported gas price when set.
    pub gas_price_wei: Option<u128>,
    pub receipt_poll_interval_ms: u64,
    pub rpc_timeout_secs: u64,

    // General
    pub log_level: String,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            keystore_dir: default_keystore_dir(),
            default_gas_limit: 3_000_000,
            gas_price_wei: None,
            receipt_poll_interval_ms: 500,
            rpc_timeout_secs: 30,
            log_level: "info".into(),
        }
    }
}

/// `~/.ethereum/keystore`, or a relative fallback when there is no home.
fn default_keystore_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ethereum").join("keystore"))
        .unwrap_or_else(|| PathBuf::from(".ethereum/keystore"))
}

impl KeelConfig {
    /// Returns the base config directory: `~/.keel/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".keel"))
    }

    /// Returns the config file path: `~/.keel/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.keel/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        let dirs = [Self::base_dir()?, Self::logs_dir()?];
        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from disk, or creates default if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Saves config to `~/.keel/config.json`.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to_path(&path)
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}
