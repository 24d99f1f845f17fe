use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::KeelConfig;

pub const BUILD_DIR_NAME: &str = "build";
pub const CONTRACTS_DIR_NAME: &str = "contracts";
pub const LEDGER_FILENAME: &str = "metafile.json";
pub const NETWORKS_FILENAME: &str = "networks.yml";

/// Everything a deployment session needs to know about where it runs.
///
/// Built once by the caller and handed to constructors; nothing here is
/// process-global.
#[derive(Clone)]
pub struct ProjectContext {
    project_dir: PathBuf,
    keystore_dir: PathBuf,
    network_name: Option<String>,
    passphrase: Option<String>,
    config: KeelConfig,
}

impl ProjectContext {
    /// Create a context for `project_dir` using the given user config.
    pub fn new(project_dir: impl Into<PathBuf>, config: KeelConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            keystore_dir: config.keystore_dir.clone(),
            network_name: None,
            passphrase: None,
            config,
        }
    }

    /// Overrides the keystore directory from the config.
    pub fn with_keystore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keystore_dir = dir.into();
        self
    }

    pub fn with_network(mut self, name: impl Into<String>) -> Self {
        self.network_name = Some(name.into());
        self
    }

    /// Session-wide passphrase used to unlock accounts without prompting.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn keystore_dir(&self) -> &Path {
        &self.keystore_dir
    }

    pub fn network_name(&self) -> Option<&str> {
        self.network_name.as_deref()
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// `<project>/build`
    pub fn build_dir(&self) -> PathBuf {
        self.project_dir.join(BUILD_DIR_NAME)
    }

    /// `<project>/contracts`
    pub fn contracts_dir(&self) -> PathBuf {
        self.project_dir.join(CONTRACTS_DIR_NAME)
    }

    /// `<project>/metafile.json`
    pub fn ledger_path(&self) -> PathBuf {
        self.project_dir.join(LEDGER_FILENAME)
    }

    /// `<project>/networks.yml`
    pub fn networks_path(&self) -> PathBuf {
        self.project_dir.join(NETWORKS_FILENAME)
    }
}

impl fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectContext")
            .field("project_dir", &self.project_dir)
            .field("keystore_dir", &self.keystore_dir)
            .field("network_name", &self.network_name)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
