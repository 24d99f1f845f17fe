use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain error shared by every keel crate.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Wrong password for account {address}")]
    WrongPassword { address: String },

    #[error("Deployment error: {0}")]
    Deployment(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider error passed through as reported by the node.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = KeelError> = std::result::Result<T, E>;

/// Classification of errors for logging and user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Bad input or bad project setup.
    UserError,
    /// The chain or the provider rejected something.
    ChainError,
    /// Password or key material problem.
    SecurityError,
    /// Local disk state is unreadable or inconsistent.
    StateError,
    /// Invalid or missing configuration.
    ConfigError,
}

impl KeelError {
    /// Returns the broad error category for routing and display purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::Yaml(_) => ErrorCategory::ConfigError,
            Self::Link(_) | Self::Validation(_) | Self::NotFound(_) => ErrorCategory::UserError,
            Self::WrongPassword { .. } => ErrorCategory::SecurityError,
            Self::Deployment(_) | Self::Rpc(_) => ErrorCategory::ChainError,
            Self::CorruptState(_) | Self::Io(_) | Self::Json(_) => ErrorCategory::StateError,
        }
    }

    /// Returns a user-friendly message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("Configuration issue: {msg}"),
            Self::Link(msg) => format!("Unable to link bytecode: {msg}"),
            Self::Validation(msg) => format!("Invalid request: {msg}"),
            Self::WrongPassword { address } => format!("Wrong password for {address}."),
            Self::Deployment(msg) => format!("Deployment failed: {msg}"),
            Self::CorruptState(msg) => {
                format!("Project state looks corrupt and was left untouched: {msg}")
            }
            Self::NotFound(msg) => format!("Not found: {msg}"),
            Self::Rpc(msg) => format!("The node returned an error: {msg}"),
            Self::Io(_) => "File error. Check disk space and permissions.".into(),
            Self::Json(_) => "Unable to read a JSON file.".into(),
            Self::Yaml(_) => "Unable to read networks.yml.".into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Provider error classification (message-pattern based)
// ---------------------------------------------------------------------------

/// What a provider error message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    /// The account cannot pay for gas.
    Underfunded,
    /// The nonce was stale or collided with a pending transaction.
    Nonce,
    /// Timeouts and connection failures.
    Connectivity,
    /// Anything else.
    Other,
}

/// Classify a provider error message by looking for known patterns.
pub fn classify_provider_error(message: &str) -> ProviderErrorKind {
    let msg = message.to_lowercase();

    if msg.contains("out of gas")
        || msg.contains("cannot afford")
        || msg.contains("insufficient funds")
    {
        ProviderErrorKind::Underfunded
    } else if msg.contains("nonce too low")
        || msg.contains("nonce too high")
        || msg.contains("replacement transaction underpriced")
    {
        ProviderErrorKind::Nonce
    } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("connection") {
        ProviderErrorKind::Connectivity
    } else {
        ProviderErrorKind::Other
    }
}
