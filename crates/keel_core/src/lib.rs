pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::KeelConfig;
pub use context::ProjectContext;
pub use error::{
    ErrorCategory, KeelError, ProviderErrorKind, Result, classify_provider_error,
};
