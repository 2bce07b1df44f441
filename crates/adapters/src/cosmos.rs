use htlc_core::{
    ChainFamily, ChainInfo, DepositHandle, DepositRequest, DepositStatus, EscrowDeposit, Error,
    Hashlock, Result, Secret,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::connector::{ChainCall, Confirmation};
use crate::escrow::{EscrowCodec, OnChainState};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// CosmWasm atomic-swap contract on one Cosmos chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CosmosEscrowConfig {
    pub contract: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
    Keccak256,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Expiration {
    /// Block time in nanoseconds, as a decimal string
    AtTime(String),
}

impl Expiration {
    fn at_unix(secs: u64) -> Self {
        Expiration::AtTime(secs.saturating_mul(NANOS_PER_SEC).to_string())
    }

    fn unix(&self) -> Result<u64> {
        let Expiration::AtTime(nanos) = self;
        nanos
            .parse::<u64>()
            .map(|n| n / NANOS_PER_SEC)
            .map_err(|e| Error::InvalidEncoding(format!("expiration {}: {}", nanos, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    Create {
        id: String,
        hash: String,
        hash_algorithm: HashAlgorithm,
        recipient: String,
        expires: Expiration,
    },
    Release {
        id: String,
        preimage: String,
    },
    Refund {
        id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    Details { id: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Open,
    Released,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailsResponse {
    pub id: String,
    pub hash: String,
    pub recipient: String,
    pub source: String,
    pub expires: Expiration,
    pub state: SwapState,
    #[serde(default)]
    pub preimage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CosmosCodec {
    config: CosmosEscrowConfig,
}

impl CosmosCodec {
    pub fn new(config: CosmosEscrowConfig) -> Self {
        Self { config }
    }

    fn algorithm(family: ChainFamily) -> Result<HashAlgorithm> {
        match family {
            ChainFamily::Cosmos => Ok(HashAlgorithm::Sha256),
            ChainFamily::Evm => Ok(HashAlgorithm::Keccak256),
            ChainFamily::Utxo => Err(Error::RejectedByChain(
                "hash160 hashlocks are not supported by the swap contract".to_string(),
            )),
        }
    }

    fn execute(&self, msg: &ExecuteMsg) -> Result<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|e| Error::InvalidEncoding(e.to_string()))
    }

    /// Swap id derived from the deposit terms
    fn swap_id(request: &DepositRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.depositor.as_bytes());
        hasher.update(request.beneficiary.as_bytes());
        hasher.update(request.hashlock.as_bytes());
        hasher.update(request.timelock.value.to_be_bytes());
        hasher.update(request.token.denom.as_bytes());
        hasher.update(request.amount.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn check_bech32(address: &str, prefix: &str, role: &str) -> Result<()> {
    let valid = address
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('1'))
        .map(|data| {
            !data.is_empty()
                && data
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
        .unwrap_or(false);
    if !valid {
        return Err(Error::RejectedByChain(format!(
            "{} {} is not a {} address",
            role, address, prefix
        )));
    }
    Ok(())
}

impl EscrowCodec for CosmosCodec {
    fn family(&self) -> ChainFamily {
        ChainFamily::Cosmos
    }

    fn supports_commitment(&self, family: ChainFamily) -> bool {
        Self::algorithm(family).is_ok()
    }

    fn validate_request(&self, info: &ChainInfo, request: &DepositRequest) -> Result<()> {
        if let Some(prefix) = info.address_prefix.as_deref() {
            check_bech32(&request.depositor, prefix, "depositor")?;
            check_bech32(&request.beneficiary, prefix, "beneficiary")?;
        }
        Self::algorithm(request.commitment_family)?;
        Ok(())
    }

    fn encode_create(&self, request: &DepositRequest) -> Result<Vec<ChainCall>> {
        let msg = ExecuteMsg::Create {
            id: Self::swap_id(request),
            hash: hex::encode(request.hashlock.as_bytes()),
            hash_algorithm: Self::algorithm(request.commitment_family)?,
            recipient: request.beneficiary.clone(),
            expires: Expiration::at_unix(request.timelock.value),
        };
        let call = ChainCall::new(self.config.contract.clone(), self.execute(&msg)?)
            .with_funds(request.token.denom.clone(), request.amount);
        Ok(vec![call])
    }

    fn encode_claim(&self, deposit: &EscrowDeposit, secret: &Secret) -> Result<ChainCall> {
        let msg = ExecuteMsg::Release {
            id: deposit.handle.0.clone(),
            preimage: hex::encode(secret.as_bytes()),
        };
        Ok(ChainCall::new(self.config.contract.clone(), self.execute(&msg)?))
    }

    fn encode_refund(&self, deposit: &EscrowDeposit) -> Result<ChainCall> {
        let msg = ExecuteMsg::Refund {
            id: deposit.handle.0.clone(),
        };
        Ok(ChainCall::new(self.config.contract.clone(), self.execute(&msg)?))
    }

    fn deposit_handle(
        &self,
        request: &DepositRequest,
        _confirmation: &Confirmation,
    ) -> Result<DepositHandle> {
        Ok(DepositHandle(Self::swap_id(request)))
    }

    fn encode_lookup(&self, deposit: &EscrowDeposit) -> Result<(String, Vec<u8>)> {
        let query = QueryMsg::Details {
            id: deposit.handle.0.clone(),
        };
        let bytes = serde_json::to_vec(&query).map_err(|e| Error::InvalidEncoding(e.to_string()))?;
        Ok((self.config.contract.clone(), bytes))
    }

    fn decode_state(&self, _deposit: &EscrowDeposit, raw: &[u8]) -> Result<OnChainState> {
        let details: DetailsResponse = serde_json::from_slice(raw)
            .map_err(|e| Error::InvalidEncoding(format!("details: {}", e)))?;

        let status = match details.state {
            SwapState::Open => DepositStatus::Funded,
            SwapState::Released => DepositStatus::Claimed,
            SwapState::Refunded => DepositStatus::Refunded,
        };
        let revealed = match (&details.state, &details.preimage) {
            (SwapState::Released, Some(preimage)) => Some(Secret::from_hex(preimage)?),
            _ => None,
        };

        Ok(OnChainState {
            status,
            revealed,
            hashlock: Some(Hashlock::from_hex(&details.hash)?),
            timelock: Some(details.expires.unix()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::OnChainEscrow;
    use crate::testkit::{FakeConnector, JsonSigner};
    use ethers::types::U256;
    use htlc_core::{commit, ChainId, ChainRegistry, EscrowAdapter, Timelock, Token};
    use serde_json::json;
    use std::sync::Arc;

    const START: u64 = 1_700_000_000;
    const CONTRACT: &str = "osmo1swapcontract";

    fn adapter(connector: Arc<FakeConnector>) -> OnChainEscrow<CosmosCodec> {
        let info = ChainRegistry::default()
            .info(&ChainId::from("osmosis-1"))
            .unwrap()
            .clone();
        let codec = CosmosCodec::new(CosmosEscrowConfig {
            contract: CONTRACT.to_string(),
        });
        OnChainEscrow::new(info, codec, Arc::new(JsonSigner), connector).unwrap()
    }

    fn request(secret: &Secret) -> DepositRequest {
        DepositRequest {
            depositor: "osmo1bob".to_string(),
            beneficiary: "osmo1alice".to_string(),
            token: Token::new(ChainId::from("osmosis-1"), "uosmo"),
            amount: U256::from(1_000_000u64),
            hashlock: commit(secret, ChainFamily::Evm),
            commitment_family: ChainFamily::Evm,
            timelock: Timelock::unix(START + 3_600),
        }
    }

    fn details(secret: &Secret, id: &str, state: &str, preimage: Option<String>) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "hash": hex::encode(commit(secret, ChainFamily::Evm).as_bytes()),
            "recipient": "osmo1alice",
            "source": "osmo1bob",
            "expires": { "at_time": ((START + 3_600) * NANOS_PER_SEC).to_string() },
            "state": state,
            "preimage": preimage,
        }))
        .unwrap()
    }

    #[test]
    fn test_create_message_shape() {
        let secret = Secret::from_bytes([4u8; 32]);
        let codec = CosmosCodec::new(CosmosEscrowConfig {
            contract: CONTRACT.to_string(),
        });
        let calls = codec.encode_create(&request(&secret)).unwrap();
        assert_eq!(calls.len(), 1);
        let call = calls[0].clone();
        let msg: serde_json::Value = serde_json::from_slice(&call.payload).unwrap();

        assert_eq!(msg["create"]["hash_algorithm"], "keccak256");
        assert_eq!(msg["create"]["recipient"], "osmo1alice");
        assert_eq!(
            msg["create"]["expires"]["at_time"],
            ((START + 3_600) * NANOS_PER_SEC).to_string()
        );
        assert_eq!(call.attached.unwrap().denom, "uosmo");
    }

    #[test]
    fn test_address_prefix_enforced() {
        let secret = Secret::from_bytes([4u8; 32]);
        let mut req = request(&secret);
        req.beneficiary = "cosmos1alice".to_string();
        let info = ChainRegistry::default()
            .info(&ChainId::from("osmosis-1"))
            .unwrap()
            .clone();
        let codec = CosmosCodec::new(CosmosEscrowConfig {
            contract: CONTRACT.to_string(),
        });
        assert!(matches!(
            codec.validate_request(&info, &req),
            Err(Error::RejectedByChain(_))
        ));
        assert!(!codec.supports_commitment(ChainFamily::Utxo));
    }

    #[tokio::test]
    async fn test_release_reveals_preimage() {
        let connector = Arc::new(FakeConnector::new(START));
        let escrow = adapter(connector.clone());
        let secret = Secret::from_bytes([4u8; 32]);

        let deposit = escrow.create_deposit(request(&secret)).await.unwrap();
        assert_eq!(deposit.handle.0.len(), 64);

        connector.set_state(CONTRACT, details(&secret, &deposit.handle.0, "open", None));
        escrow.claim_with_secret(&deposit, &secret).await.unwrap();

        let release: serde_json::Value =
            serde_json::from_slice(&connector.submitted()[1].payload).unwrap();
        assert_eq!(release["release"]["preimage"], hex::encode([4u8; 32]));

        connector.set_state(
            CONTRACT,
            details(&secret, &deposit.handle.0, "released", Some(hex::encode([4u8; 32]))),
        );
        assert_eq!(escrow.revealed_secret(&deposit).await.unwrap(), Some(secret));
    }

    #[tokio::test]
    async fn test_refund_only_once() {
        let connector = Arc::new(FakeConnector::new(START));
        let escrow = adapter(connector.clone());
        let secret = Secret::from_bytes([4u8; 32]);
        let deposit = escrow.create_deposit(request(&secret)).await.unwrap();

        connector.advance(3_600);
        connector.set_state(CONTRACT, details(&secret, &deposit.handle.0, "open", None));
        escrow.claim_after_timelock(&deposit).await.unwrap();

        connector.set_state(CONTRACT, details(&secret, &deposit.handle.0, "refunded", None));
        for _ in 0..2 {
            assert!(matches!(
                escrow.claim_after_timelock(&deposit).await,
                Err(Error::DepositSettled(_))
            ));
        }
        assert_eq!(connector.submitted().len(), 2);
    }
}
