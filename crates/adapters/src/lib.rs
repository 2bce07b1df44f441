//! Escrow adapters for EVM, Cosmos and UTXO chains.
//!
//! Each family contributes an [`EscrowCodec`]; [`OnChainEscrow`] pairs a codec
//! with a [`TransactionSigner`] and a [`ChainConnector`] to implement
//! `htlc_core::EscrowAdapter`.

pub mod connector;
pub mod cosmos;
pub mod escrow;
pub mod evm;
pub mod utxo;

pub use connector::{
    Attachment, ChainCall, ChainConnector, ChainTime, Confirmation, ConnectorError,
    SignedTransaction, TransactionSigner,
};
pub use cosmos::{CosmosCodec, CosmosEscrowConfig};
pub use escrow::{EscrowCodec, OnChainEscrow, OnChainState};
pub use evm::{EvmCodec, EvmEscrowConfig};
pub use utxo::{HtlcScript, UtxoCodec};

pub type EvmEscrowAdapter = OnChainEscrow<EvmCodec>;
pub type CosmosEscrowAdapter = OnChainEscrow<CosmosCodec>;
pub type UtxoEscrowAdapter = OnChainEscrow<UtxoCodec>;
