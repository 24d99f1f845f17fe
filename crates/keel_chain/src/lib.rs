//! Everything that talks to a chain: network definitions, clients,
//! the local keystore, and the signing policy.

pub mod client;
pub mod dev_chain;
pub mod keystore;
pub mod networks;
pub mod rpc;
pub mod signer;

pub use client::{ChainClient, TransactionReceipt, TransactionRequest, connect, normalize_address};
pub use dev_chain::DevChain;
pub use keystore::{
    KeyStore, KeystoreAccount, NoPrompt, PasswordPrompt, SignedTransaction, StdinPrompt,
};
pub use networks::{
    ConnectionKind, IMPLICIT_TEST_NETWORK, NetworkDefinition, NetworksConfig,
    OFFICIAL_CHAIN_ID_CEILING, is_official_chain_id,
};
pub use rpc::JsonRpcClient;
pub use signer::{OutboundTransaction, TransactionSigner};
