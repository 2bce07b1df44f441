//! Collaborators the on-chain adapters are written against. Key custody and
//! RPC transport live behind these traits.

use async_trait::async_trait;
use htlc_core::{Amount, ChainId, Error};
use serde::{Deserialize, Serialize};

/// Funds attached to a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub denom: String,
    pub amount: Amount,
}

/// Unsigned chain call produced by an escrow codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCall {
    /// Contract address, P2SH script hash or outpoint
    pub target: String,
    /// ABI calldata, JSON execute message or partial scriptSig
    pub payload: Vec<u8>,
    pub attached: Option<Attachment>,
    /// Minimum transaction lock time (UTXO refunds)
    pub lock_time: Option<u64>,
}

impl ChainCall {
    pub fn new(target: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            target: target.into(),
            payload,
            attached: None,
            lock_time: None,
        }
    }

    pub fn with_funds(mut self, denom: impl Into<String>, amount: Amount) -> Self {
        self.attached = Some(Attachment {
            denom: denom.into(),
            amount,
        });
        self
    }

    pub fn with_lock_time(mut self, lock_time: u64) -> Self {
        self.lock_time = Some(lock_time);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub chain_id: ChainId,
    pub signer: String,
    pub raw: Vec<u8>,
}

/// Inclusion of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: String,
    pub height: u64,
    pub timestamp: u64,
    /// Call return data, if the chain reports any
    pub output: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTime {
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<ConnectorError> for Error {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Unavailable(msg) => Error::ChainUnavailable(msg),
            ConnectorError::Rejected(msg) => Error::RejectedByChain(msg),
            ConnectorError::InsufficientFunds(msg) => Error::InsufficientFunds(msg),
            ConnectorError::Malformed(msg) => Error::InvalidEncoding(msg),
        }
    }
}

/// Signs calls on behalf of the party the adapter acts for
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(
        &self,
        chain_id: &ChainId,
        call: &ChainCall,
    ) -> Result<SignedTransaction, ConnectorError>;
}

/// Transport to one chain's nodes
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Broadcasts and waits for inclusion
    async fn submit(&self, tx: SignedTransaction) -> Result<Confirmation, ConnectorError>;

    /// Latest block height and timestamp
    async fn chain_time(&self) -> Result<ChainTime, ConnectorError>;

    /// Read-only state query; `None` when `target` is unknown to the chain
    async fn lookup(&self, target: &str, query: &[u8]) -> Result<Option<Vec<u8>>, ConnectorError>;
}
