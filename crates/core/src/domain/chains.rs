use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::timelocks::TimelockUnit;
use crate::{Error, Result};

/// Chain identifier: numeric for EVM and UTXO style chains, a string for Cosmos style chains
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainId {
    Numeric(u64),
    Named(String),
}

impl ChainId {
    /// Parses an identifier; an all-digit string is numeric
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<u64>() {
            Ok(id) => ChainId::Numeric(id),
            Err(_) => ChainId::Named(raw.to_string()),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Numeric(id) => write!(f, "{}", id),
            ChainId::Named(name) => f.write_str(name),
        }
    }
}

impl FromStr for ChainId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ChainId::parse(s))
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId::Numeric(id)
    }
}

impl From<&str> for ChainId {
    fn from(raw: &str) -> Self {
        ChainId::parse(raw)
    }
}

/// Closed set of chain families, each with its own commitment and escrow convention
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Cosmos,
    Utxo,
}

impl ChainFamily {
    pub const ALL: [ChainFamily; 3] = [ChainFamily::Evm, ChainFamily::Cosmos, ChainFamily::Utxo];

    /// Returns family name
    pub fn name(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Cosmos => "cosmos",
            ChainFamily::Utxo => "utxo",
        }
    }

    /// Native unit of timelocks on this family
    pub fn timelock_unit(&self) -> TimelockUnit {
        match self {
            ChainFamily::Evm | ChainFamily::Cosmos => TimelockUnit::UnixSeconds,
            ChainFamily::Utxo => TimelockUnit::BlockHeight,
        }
    }

    /// Whether escrows on this family can verify hashlocks built with
    /// `commitment`'s hash function. EVM escrows take Keccak-256 plus the
    /// SHA-256 deployment, CosmWasm takes SHA-256 and Keccak-256, and script
    /// has only HASH160 and SHA-256.
    pub fn can_verify(&self, commitment: ChainFamily) -> bool {
        match self {
            ChainFamily::Evm | ChainFamily::Cosmos => commitment != ChainFamily::Utxo,
            ChainFamily::Utxo => commitment != ChainFamily::Evm,
        }
    }

    /// Length in bytes of this family's hashlock
    pub fn hashlock_len(&self) -> usize {
        match self {
            ChainFamily::Evm | ChainFamily::Cosmos => 32,
            ChainFamily::Utxo => 20,
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(ChainFamily::Evm),
            "cosmos" => Ok(ChainFamily::Cosmos),
            "utxo" | "dogecoin" => Ok(ChainFamily::Utxo),
            other => Err(Error::UnsupportedChainFamily(other.to_string())),
        }
    }
}

/// Static description of a supported chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainInfo {
    pub chain_id: ChainId,
    pub name: String,
    pub family: ChainFamily,
    /// Typical block time in seconds
    pub block_time_secs: u64,
    /// Bech32 prefix for Cosmos chains
    #[serde(default)]
    pub address_prefix: Option<String>,
}

// (chain id, name, family, block time, address prefix)
const BUILTIN_CHAINS: &[(&str, &str, ChainFamily, u64, Option<&str>)] = &[
    ("1", "Ethereum", ChainFamily::Evm, 12, None),
    ("10", "Optimism", ChainFamily::Evm, 2, None),
    ("56", "BNB Smart Chain", ChainFamily::Evm, 3, None),
    ("137", "Polygon", ChainFamily::Evm, 2, None),
    ("8453", "Base", ChainFamily::Evm, 2, None),
    ("42161", "Arbitrum", ChainFamily::Evm, 1, None),
    ("43114", "Avalanche", ChainFamily::Evm, 2, None),
    ("11155111", "Sepolia", ChainFamily::Evm, 12, None),
    ("80002", "Polygon Amoy", ChainFamily::Evm, 2, None),
    ("568", "Dogecoin", ChainFamily::Utxo, 60, None),
    ("osmosis-1", "Osmosis", ChainFamily::Cosmos, 6, Some("osmo")),
    ("osmo-test-5", "Osmosis Testnet", ChainFamily::Cosmos, 6, Some("osmo")),
    ("cosmoshub-4", "Cosmos Hub", ChainFamily::Cosmos, 6, Some("cosmos")),
];

/// Lookup table from chain identifier to chain family
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<ChainId, ChainInfo>,
}

impl ChainRegistry {
    /// Creates a registry with no chains
    pub fn empty() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    /// Adds extra chains on top of the built-in table
    pub fn with_chains(mut self, chains: impl IntoIterator<Item = ChainInfo>) -> Self {
        for info in chains {
            self.register(info);
        }
        self
    }

    /// Registers or replaces a chain entry
    pub fn register(&mut self, info: ChainInfo) {
        self.chains.insert(info.chain_id.clone(), info);
    }

    /// Maps a chain identifier to its family
    pub fn classify(&self, chain_id: &ChainId) -> Result<ChainFamily> {
        self.info(chain_id).map(|info| info.family)
    }

    /// Returns the full table entry for a chain
    pub fn info(&self, chain_id: &ChainId) -> Result<&ChainInfo> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| Error::UnknownChain(chain_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainInfo> {
        self.chains.values()
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        let chains = BUILTIN_CHAINS
            .iter()
            .map(|(id, name, family, block_time, prefix)| {
                let chain_id = ChainId::parse(id);
                let info = ChainInfo {
                    chain_id: chain_id.clone(),
                    name: name.to_string(),
                    family: *family,
                    block_time_secs: *block_time,
                    address_prefix: prefix.map(str::to_string),
                };
                (chain_id, info)
            })
            .collect();
        Self { chains }
    }
}
