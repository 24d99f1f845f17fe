use std::sync::Arc;

use alloy_primitives::B256;
use keel_core::{KeelError, Result};
use tracing::debug;
use zeroize::Zeroizing;

use crate::client::{ChainClient, TransactionRequest};
use crate::keystore::{KeyStore, SignedTransaction};
use crate::networks::{ConnectionKind, is_official_chain_id};

/// What will actually be sent for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundTransaction {
    /// Signed locally, sent with `eth_sendRawTransaction`.
    Raw(SignedTransaction),
    /// Handed to the node unchanged.
    PassThrough(TransactionRequest),
}

/// Decides how each outgoing transaction gets signed.
///
/// | sender | network | action |
/// |---|---|---|
/// | in the local keystore | any | sign locally, send raw |
/// | unknown | official chain | refuse |
/// | unknown | test backend | pass through |
pub struct TransactionSigner {
    client: Arc<dyn ChainClient>,
    keystore: Arc<KeyStore>,
    kind: ConnectionKind,
    password: Option<Zeroizing<String>>,
}

impl TransactionSigner {
    pub fn new(client: Arc<dyn ChainClient>, keystore: Arc<KeyStore>, kind: ConnectionKind) -> Self {
        Self {
            client,
            keystore,
            kind,
            password: None,
        }
    }

    /// Password used when a local account has to be unlocked.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.map(Zeroizing::new);
        self
    }

    /// Sign with a different keystore, e.g. one with an interactive prompt.
    pub fn with_keystore(mut self, keystore: Arc<KeyStore>) -> Self {
        self.keystore = keystore;
        self
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// Whether the connected chain is a public one.
    pub fn is_official(&self) -> Result<bool> {
        if self.kind.is_test_chain() {
            return Ok(false);
        }
        Ok(is_official_chain_id(self.client.chain_id()?))
    }

    /// Apply the decision table to `tx`.
    pub fn route(&self, tx: &TransactionRequest) -> Result<OutboundTransaction> {
        let from = tx.from.ok_or_else(|| {
            KeelError::Validation("transaction has no sender".into())
        })?;

        if self.keystore.contains(from)? {
            debug!(from = %from, "signing locally");
            let signed = self.keystore.sign_transaction(
                Some(self.client.as_ref()),
                from,
                tx,
                self.password.as_deref().map(String::as_str),
            )?;
            return Ok(OutboundTransaction::Raw(signed));
        }

        if self.is_official()? {
            return Err(KeelError::Validation(format!(
                "account {from} is not in the local keystore; unlocking accounts over RPC is disabled on official networks"
            )));
        }

        debug!(from = %from, "passing transaction through to the node");
        Ok(OutboundTransaction::PassThrough(tx.clone()))
    }

    /// Route and submit `tx`, returning its hash.
    pub fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        match self.route(tx)? {
            OutboundTransaction::Raw(signed) => self.client.send_raw_transaction(&signed.raw),
            OutboundTransaction::PassThrough(tx) => self.client.send_transaction(&tx),
        }
    }
}
