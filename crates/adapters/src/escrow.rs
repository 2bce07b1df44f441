use async_trait::async_trait;
use htlc_core::escrow::{check_claim, check_refund, ClaimKind, ClaimReceipt};
use htlc_core::{
    ChainFamily, ChainId, ChainInfo, DepositHandle, DepositRequest, DepositStatus,
    EscrowAdapter, EscrowDeposit, Error, Hashlock, Result, Secret, Timelock, TimelockUnit,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::connector::{ChainCall, ChainConnector, ChainTime, Confirmation, TransactionSigner};

/// Deposit fields as reported by chain state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainState {
    pub status: DepositStatus,
    pub revealed: Option<Secret>,
    pub hashlock: Option<Hashlock>,
    pub timelock: Option<u64>,
}

impl OnChainState {
    pub fn funded() -> Self {
        Self {
            status: DepositStatus::Funded,
            revealed: None,
            hashlock: None,
            timelock: None,
        }
    }
}

/// Family-specific wire format of an HTLC escrow
pub trait EscrowCodec: Send + Sync {
    fn family(&self) -> ChainFamily;

    fn supports_commitment(&self, family: ChainFamily) -> bool;

    /// Address and parameter checks beyond the structural ones
    fn validate_request(&self, info: &ChainInfo, request: &DepositRequest) -> Result<()>;

    /// Calls that fund the escrow, submitted in order; the last one locks the funds
    fn encode_create(&self, request: &DepositRequest) -> Result<Vec<ChainCall>>;

    fn encode_claim(&self, deposit: &EscrowDeposit, secret: &Secret) -> Result<ChainCall>;

    fn encode_refund(&self, deposit: &EscrowDeposit) -> Result<ChainCall>;

    /// Identifier of a deposit once its funding transaction is included
    fn deposit_handle(
        &self,
        request: &DepositRequest,
        confirmation: &Confirmation,
    ) -> Result<DepositHandle>;

    /// Target and query bytes for reading a deposit back
    fn encode_lookup(&self, deposit: &EscrowDeposit) -> Result<(String, Vec<u8>)>;

    fn decode_state(&self, deposit: &EscrowDeposit, raw: &[u8]) -> Result<OnChainState>;
}

/// Escrow adapter for a real chain: a codec plus signer and connector.
/// Holds no deposit state of its own; every read goes to the chain.
pub struct OnChainEscrow<C> {
    info: ChainInfo,
    codec: C,
    signer: Arc<dyn TransactionSigner>,
    connector: Arc<dyn ChainConnector>,
}

impl<C: EscrowCodec> OnChainEscrow<C> {
    pub fn new(
        info: ChainInfo,
        codec: C,
        signer: Arc<dyn TransactionSigner>,
        connector: Arc<dyn ChainConnector>,
    ) -> Result<Self> {
        if info.family != codec.family() {
            return Err(Error::Config(format!(
                "chain {} is {}, codec is {}",
                info.chain_id,
                info.family,
                codec.family()
            )));
        }
        Ok(Self {
            info,
            codec,
            signer,
            connector,
        })
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    async fn native_now(&self) -> Result<u64> {
        let ChainTime { height, timestamp } = self.connector.chain_time().await?;
        Ok(match self.info.family.timelock_unit() {
            TimelockUnit::UnixSeconds => timestamp,
            TimelockUnit::BlockHeight => height,
        })
    }

    async fn send(&self, call: ChainCall) -> Result<Confirmation> {
        let signed = self.signer.sign(&self.info.chain_id, &call).await?;
        debug!(chain = %self.info.chain_id, target = %call.target, "Submitting transaction");
        Ok(self.connector.submit(signed).await?)
    }

    async fn read_state(&self, deposit: &EscrowDeposit) -> Result<OnChainState> {
        let (target, query) = self.codec.encode_lookup(deposit)?;
        let raw = self
            .connector
            .lookup(&target, &query)
            .await?
            .ok_or_else(|| {
                Error::RejectedByChain(format!("deposit {} not found on chain", deposit.handle))
            })?;
        self.codec.decode_state(deposit, &raw)
    }
}

#[async_trait]
impl<C: EscrowCodec> EscrowAdapter for OnChainEscrow<C> {
    fn chain_id(&self) -> &ChainId {
        &self.info.chain_id
    }

    fn family(&self) -> ChainFamily {
        self.info.family
    }

    fn supports_commitment(&self, family: ChainFamily) -> bool {
        self.codec.supports_commitment(family)
    }

    async fn timelock_after(&self, window_secs: u64) -> Result<Timelock> {
        let now = self.native_now().await?;
        Ok(self
            .info
            .family
            .timelock_unit()
            .advance(now, window_secs, self.info.block_time_secs))
    }

    async fn seconds_until(&self, timelock: &Timelock) -> Result<u64> {
        if timelock.unit != self.info.family.timelock_unit() {
            return Err(Error::RejectedByChain(format!(
                "timelock {} is not native to chain {}",
                timelock, self.info.chain_id
            )));
        }
        let now = self.native_now().await?;
        Ok(timelock.seconds_remaining(now, self.info.block_time_secs))
    }

    async fn create_deposit(&self, request: DepositRequest) -> Result<EscrowDeposit> {
        request.validate_for(self.info.family)?;
        if !self.codec.supports_commitment(request.commitment_family) {
            return Err(Error::RejectedByChain(format!(
                "chain {} cannot verify {} hashlocks",
                self.info.chain_id, request.commitment_family
            )));
        }
        if request.token.chain_id != self.info.chain_id {
            return Err(Error::RejectedByChain(format!(
                "token {} does not live on chain {}",
                request.token, self.info.chain_id
            )));
        }
        self.codec.validate_request(&self.info, &request)?;

        if request.timelock.is_expired_at(self.native_now().await?) {
            return Err(Error::RejectedByChain(format!(
                "timelock {} already passed",
                request.timelock
            )));
        }

        let mut confirmation = None;
        for call in self.codec.encode_create(&request)? {
            confirmation = Some(self.send(call).await?);
        }
        let confirmation = confirmation.ok_or_else(|| {
            Error::Config(format!("no funding calls for chain {}", self.info.chain_id))
        })?;
        let handle = self.codec.deposit_handle(&request, &confirmation)?;

        let deposit = EscrowDeposit {
            handle,
            chain_id: self.info.chain_id.clone(),
            family: self.info.family,
            depositor: request.depositor,
            beneficiary: request.beneficiary,
            token: request.token,
            amount: request.amount,
            hashlock: request.hashlock,
            commitment_family: request.commitment_family,
            timelock: request.timelock,
            status: DepositStatus::Funded,
            funding_reference: confirmation.tx_hash,
        };

        info!(
            chain = %self.info.chain_id,
            handle = %deposit.handle,
            height = confirmation.height,
            "Escrow funded"
        );
        Ok(deposit)
    }

    async fn claim_with_secret(
        &self,
        deposit: &EscrowDeposit,
        secret: &Secret,
    ) -> Result<ClaimReceipt> {
        let current = self.fetch_deposit(deposit).await?;
        check_claim(&current, secret, self.native_now().await?)?;

        let confirmation = self.send(self.codec.encode_claim(&current, secret)?).await?;

        info!(chain = %self.info.chain_id, handle = %current.handle, "Escrow claimed with secret");
        Ok(ClaimReceipt {
            handle: current.handle,
            chain_id: self.info.chain_id.clone(),
            reference: confirmation.tx_hash,
            recipient: current.beneficiary,
            amount: current.amount,
            kind: ClaimKind::Secret,
        })
    }

    async fn claim_after_timelock(&self, deposit: &EscrowDeposit) -> Result<ClaimReceipt> {
        let current = self.fetch_deposit(deposit).await?;
        check_refund(&current, self.native_now().await?)?;

        let confirmation = self.send(self.codec.encode_refund(&current)?).await?;

        info!(chain = %self.info.chain_id, handle = %current.handle, "Escrow refunded");
        Ok(ClaimReceipt {
            handle: current.handle,
            chain_id: self.info.chain_id.clone(),
            reference: confirmation.tx_hash,
            recipient: current.depositor,
            amount: current.amount,
            kind: ClaimKind::Refund,
        })
    }

    async fn fetch_deposit(&self, deposit: &EscrowDeposit) -> Result<EscrowDeposit> {
        if deposit.chain_id != self.info.chain_id {
            return Err(Error::RejectedByChain(format!(
                "deposit {} lives on chain {}, not {}",
                deposit.handle, deposit.chain_id, self.info.chain_id
            )));
        }

        let state = self.read_state(deposit).await?;
        let mut current = deposit.clone();
        current.status = state.status;
        if let Some(hashlock) = state.hashlock {
            current.hashlock = hashlock;
        }
        if let Some(value) = state.timelock {
            current.timelock.value = value;
        }
        Ok(current)
    }

    async fn revealed_secret(&self, deposit: &EscrowDeposit) -> Result<Option<Secret>> {
        Ok(self.read_state(deposit).await?.revealed)
    }
}
