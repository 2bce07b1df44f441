use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::chains::{ChainFamily, ChainId};
use crate::{Error, Result};

/// Amount in the token's smallest unit, passed through to chains unmodified
pub type Amount = U256;

/// A token on a specific chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Token {
    /// Chain where token exists
    pub chain_id: ChainId,

    /// Contract address (EVM), denom (Cosmos) or ticker (UTXO)
    pub denom: String,
}

impl Token {
    /// Creates a new token
    pub fn new(chain_id: ChainId, denom: impl Into<String>) -> Self {
        Self {
            chain_id,
            denom: denom.into(),
        }
    }

    /// Checks the denomination has the shape the chain family expects
    pub fn validate_for(&self, family: ChainFamily) -> Result<()> {
        let denom = self.denom.trim();
        if denom.is_empty() {
            return Err(Error::InvalidTerms(format!(
                "empty token on chain {}",
                self.chain_id
            )));
        }

        match family {
            ChainFamily::Evm => {
                denom.parse::<Address>().map_err(|_| {
                    Error::InvalidTerms(format!("{} is not an EVM token address", denom))
                })?;
            }
            ChainFamily::Cosmos => {
                if denom.chars().any(char::is_whitespace) {
                    return Err(Error::InvalidTerms(format!(
                        "{} is not a valid denom",
                        denom
                    )));
                }
            }
            ChainFamily::Utxo => {
                if !denom.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(Error::InvalidTerms(format!(
                        "{} is not a valid UTXO asset ticker",
                        denom
                    )));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.denom, self.chain_id)
    }
}
