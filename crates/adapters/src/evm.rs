//! EVM escrow: HashedTimelock-style ERC-20 contract.
//!
//! One deployment per hash function. The escrow pulls the tokens with
//! `transferFrom`, so funding is an ERC-20 `approve` followed by `newContract`.
//! `newContract` returns the contract id,
//! `sha256(abi.encodePacked(sender, receiver, token, amount, hashlock, timelock))`.

use ethers::abi::{self, ParamType, Token as AbiToken};
use ethers::types::{Address, U256};
use ethers::utils::id;
use htlc_core::encoding::{from_prefixed_hex, to_prefixed_hex};
use htlc_core::{
    ChainFamily, ChainInfo, DepositHandle, DepositRequest, DepositStatus, EscrowDeposit, Error,
    Hashlock, Result, Secret,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::connector::{ChainCall, Confirmation};
use crate::escrow::{EscrowCodec, OnChainState};

const APPROVE: &str = "approve(address,uint256)";
const NEW_CONTRACT: &str = "newContract(address,bytes32,uint256,address,uint256)";
const WITHDRAW: &str = "withdraw(bytes32,bytes32)";
const REFUND: &str = "refund(bytes32)";
const GET_CONTRACT: &str = "getContract(bytes32)";

/// Escrow contract deployments on one EVM chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvmEscrowConfig {
    /// Contract verifying `keccak256(preimage) == hashlock`
    pub keccak_contract: Address,

    /// Contract verifying `sha256(preimage) == hashlock`
    #[serde(default)]
    pub sha256_contract: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct EvmCodec {
    config: EvmEscrowConfig,
}

impl EvmCodec {
    pub fn new(config: EvmEscrowConfig) -> Self {
        Self { config }
    }

    fn contract_for(&self, family: ChainFamily) -> Result<Address> {
        match family {
            ChainFamily::Evm => Ok(self.config.keccak_contract),
            ChainFamily::Cosmos => self.config.sha256_contract.ok_or_else(|| {
                Error::RejectedByChain("no sha256 escrow contract configured".to_string())
            }),
            ChainFamily::Utxo => Err(Error::RejectedByChain(
                "hash160 hashlocks are not supported on EVM escrows".to_string(),
            )),
        }
    }

    fn call(signature: &str, args: &[AbiToken]) -> Vec<u8> {
        let mut data = id(signature).to_vec();
        data.extend(abi::encode(args));
        data
    }

    fn contract_id(handle: &DepositHandle) -> Result<Vec<u8>> {
        let bytes = from_prefixed_hex(&handle.0)?;
        if bytes.len() != 32 {
            return Err(Error::InvalidEncoding(format!(
                "EVM deposit handle must be 32 bytes: {}",
                handle
            )));
        }
        Ok(bytes)
    }
}

fn parse_address(raw: &str, role: &str) -> Result<Address> {
    raw.parse::<Address>()
        .map_err(|_| Error::RejectedByChain(format!("{} {} is not an EVM address", role, raw)))
}

impl EscrowCodec for EvmCodec {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn supports_commitment(&self, family: ChainFamily) -> bool {
        self.contract_for(family).is_ok()
    }

    fn validate_request(&self, _info: &ChainInfo, request: &DepositRequest) -> Result<()> {
        parse_address(&request.depositor, "depositor")?;
        parse_address(&request.beneficiary, "beneficiary")?;
        parse_address(&request.token.denom, "token")?;
        self.contract_for(request.commitment_family)?;
        Ok(())
    }

    fn encode_create(&self, request: &DepositRequest) -> Result<Vec<ChainCall>> {
        let contract = self.contract_for(request.commitment_family)?;
        let token = parse_address(&request.token.denom, "token")?;

        let approve = Self::call(
            APPROVE,
            &[AbiToken::Address(contract), AbiToken::Uint(request.amount)],
        );
        let lock = Self::call(
            NEW_CONTRACT,
            &[
                AbiToken::Address(parse_address(&request.beneficiary, "beneficiary")?),
                AbiToken::FixedBytes(request.hashlock.as_bytes().to_vec()),
                AbiToken::Uint(U256::from(request.timelock.value)),
                AbiToken::Address(token),
                AbiToken::Uint(request.amount),
            ],
        );
        Ok(vec![
            ChainCall::new(format!("{:?}", token), approve),
            ChainCall::new(format!("{:?}", contract), lock),
        ])
    }

    fn encode_claim(&self, deposit: &EscrowDeposit, secret: &Secret) -> Result<ChainCall> {
        let contract = self.contract_for(deposit.commitment_family)?;
        let data = Self::call(
            WITHDRAW,
            &[
                AbiToken::FixedBytes(Self::contract_id(&deposit.handle)?),
                AbiToken::FixedBytes(secret.as_bytes().to_vec()),
            ],
        );
        Ok(ChainCall::new(format!("{:?}", contract), data))
    }

    fn encode_refund(&self, deposit: &EscrowDeposit) -> Result<ChainCall> {
        let contract = self.contract_for(deposit.commitment_family)?;
        let data = Self::call(
            REFUND,
            &[AbiToken::FixedBytes(Self::contract_id(&deposit.handle)?)],
        );
        Ok(ChainCall::new(format!("{:?}", contract), data))
    }

    fn deposit_handle(
        &self,
        request: &DepositRequest,
        confirmation: &Confirmation,
    ) -> Result<DepositHandle> {
        if confirmation.output.len() == 32 {
            return Ok(DepositHandle(to_prefixed_hex(&confirmation.output)));
        }

        let packed = abi::encode_packed(&[
            AbiToken::Address(parse_address(&request.depositor, "depositor")?),
            AbiToken::Address(parse_address(&request.beneficiary, "beneficiary")?),
            AbiToken::Address(parse_address(&request.token.denom, "token")?),
            AbiToken::Uint(request.amount),
            AbiToken::FixedBytes(request.hashlock.as_bytes().to_vec()),
            AbiToken::Uint(U256::from(request.timelock.value)),
        ])
        .map_err(|e| Error::InvalidEncoding(e.to_string()))?;
        Ok(DepositHandle(to_prefixed_hex(&Sha256::digest(packed))))
    }

    fn encode_lookup(&self, deposit: &EscrowDeposit) -> Result<(String, Vec<u8>)> {
        let contract = self.contract_for(deposit.commitment_family)?;
        let data = Self::call(
            GET_CONTRACT,
            &[AbiToken::FixedBytes(Self::contract_id(&deposit.handle)?)],
        );
        Ok((format!("{:?}", contract), data))
    }

    fn decode_state(&self, deposit: &EscrowDeposit, raw: &[u8]) -> Result<OnChainState> {
        let tokens = abi::decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::Uint(256),
                ParamType::Bool,
                ParamType::Bool,
                ParamType::FixedBytes(32),
            ],
            raw,
        )
        .map_err(|e| Error::InvalidEncoding(format!("getContract: {}", e)))?;

        let malformed = || Error::InvalidEncoding("getContract: unexpected field".to_string());
        let mut fields = tokens.into_iter();
        let mut next = || fields.next().ok_or_else(malformed);

        let sender = next()?.into_address().ok_or_else(malformed)?;
        if sender.is_zero() {
            return Err(Error::RejectedByChain(format!(
                "contract {} does not exist",
                deposit.handle
            )));
        }
        let _receiver = next()?;
        let _token = next()?;
        let _amount = next()?;
        let hashlock = next()?.into_fixed_bytes().ok_or_else(malformed)?;
        let timelock = next()?.into_uint().ok_or_else(malformed)?;
        let withdrawn = next()?.into_bool().ok_or_else(malformed)?;
        let refunded = next()?.into_bool().ok_or_else(malformed)?;
        let preimage = next()?.into_fixed_bytes().ok_or_else(malformed)?;

        let status = if withdrawn {
            DepositStatus::Claimed
        } else if refunded {
            DepositStatus::Refunded
        } else {
            DepositStatus::Funded
        };

        let revealed = if withdrawn {
            let bytes = <[u8; 32]>::try_from(preimage.as_slice()).map_err(|_| malformed())?;
            Some(Secret::from_bytes(bytes))
        } else {
            None
        };

        Ok(OnChainState {
            status,
            revealed,
            hashlock: Some(Hashlock::from_bytes(hashlock)?),
            timelock: Some(u64::try_from(timelock).map_err(|_| malformed())?),
        })
    }
}
