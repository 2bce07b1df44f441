//! Deterministic in-memory escrow chain.

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    check_claim, check_refund, ClaimKind, ClaimReceipt, Clock, DepositHandle, DepositRequest,
    DepositStatus, EscrowAdapter, EscrowDeposit,
};
use crate::commitment::Secret;
use crate::domain::{Amount, ChainFamily, ChainId, ChainInfo, ChainRegistry, Timelock, Token};
use crate::encoding::to_prefixed_hex;
use crate::{Error, Result};

/// Height reported by UTXO chains at unix time zero
const UTXO_BASE_HEIGHT: u64 = 5_000_000;

enum Fault {
    Unavailable,
    Reject(String),
}

struct StoredDeposit {
    deposit: EscrowDeposit,
    revealed: Option<Secret>,
}

#[derive(Default)]
struct Ledger {
    /// (address, denom) -> balance
    balances: HashMap<(String, String), Amount>,
    deposits: HashMap<DepositHandle, StoredDeposit>,
    nonce: u64,
    faults: VecDeque<Fault>,
}

/// Single-chain escrow simulator with balances, deposits and fault injection
pub struct InMemoryEscrow {
    info: ChainInfo,
    clock: Arc<dyn Clock>,
    ledger: RwLock<Ledger>,
}

impl InMemoryEscrow {
    pub fn new(info: ChainInfo, clock: Arc<dyn Clock>) -> Self {
        Self {
            info,
            clock,
            ledger: RwLock::new(Ledger::default()),
        }
    }

    /// Builds a simulator for a chain known to `registry`
    pub fn for_chain(
        registry: &ChainRegistry,
        chain_id: &ChainId,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(registry.info(chain_id)?.clone(), clock))
    }

    /// Credits `amount` of `token` to `address`
    pub fn fund(&self, address: &str, token: &Token, amount: Amount) {
        let mut ledger = self.ledger.write();
        let balance = ledger
            .balances
            .entry((address.to_string(), token.denom.clone()))
            .or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, address: &str, token: &Token) -> Amount {
        self.ledger
            .read()
            .balances
            .get(&(address.to_string(), token.denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Next `count` submissions fail with `ChainUnavailable`
    pub fn fail_next(&self, count: usize) {
        let mut ledger = self.ledger.write();
        for _ in 0..count {
            ledger.faults.push_back(Fault::Unavailable);
        }
    }

    /// Next submission is rejected with `reason`
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.ledger
            .write()
            .faults
            .push_back(Fault::Reject(reason.into()));
    }

    /// Current chain time in this family's timelock unit
    pub fn chain_time(&self) -> u64 {
        let now = self.clock.now();
        match self.info.family {
            ChainFamily::Utxo => UTXO_BASE_HEIGHT + now / self.info.block_time_secs.max(1),
            ChainFamily::Evm | ChainFamily::Cosmos => now,
        }
    }

    fn take_fault(ledger: &mut Ledger, chain_id: &ChainId) -> Result<()> {
        match ledger.faults.pop_front() {
            None => Ok(()),
            Some(Fault::Unavailable) => Err(Error::ChainUnavailable(format!(
                "chain {} did not respond",
                chain_id
            ))),
            Some(Fault::Reject(reason)) => Err(Error::RejectedByChain(reason)),
        }
    }

    fn digest(&self, tag: &str, nonce: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.info.chain_id.to_string().as_bytes());
        hasher.update(tag.as_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().into()
    }

    fn handle_for(&self, nonce: u64) -> DepositHandle {
        let id = self.digest("deposit", nonce);
        DepositHandle(match self.info.family {
            ChainFamily::Evm => to_prefixed_hex(&id),
            ChainFamily::Cosmos => hex::encode(id),
            ChainFamily::Utxo => format!("{}:0", hex::encode(id)),
        })
    }

    fn tx_reference(&self, tag: &str, nonce: u64) -> String {
        let id = self.digest(tag, nonce);
        match self.info.family {
            ChainFamily::Evm => to_prefixed_hex(&id),
            ChainFamily::Cosmos => hex::encode_upper(id),
            ChainFamily::Utxo => hex::encode(id),
        }
    }

    fn credit(ledger: &mut Ledger, address: &str, token: &Token, amount: Amount) {
        let balance = ledger
            .balances
            .entry((address.to_string(), token.denom.clone()))
            .or_default();
        *balance = balance.saturating_add(amount);
    }
}

#[async_trait]
impl EscrowAdapter for InMemoryEscrow {
    fn chain_id(&self) -> &ChainId {
        &self.info.chain_id
    }

    fn family(&self) -> ChainFamily {
        self.info.family
    }

    fn supports_commitment(&self, family: ChainFamily) -> bool {
        self.info.family.can_verify(family)
    }

    async fn timelock_after(&self, window_secs: u64) -> Result<Timelock> {
        Ok(self.info.family.timelock_unit().advance(
            self.chain_time(),
            window_secs,
            self.info.block_time_secs,
        ))
    }

    async fn seconds_until(&self, timelock: &Timelock) -> Result<u64> {
        if timelock.unit != self.info.family.timelock_unit() {
            return Err(Error::RejectedByChain(format!(
                "timelock {} is not native to chain {}",
                timelock, self.info.chain_id
            )));
        }
        Ok(timelock.seconds_remaining(self.chain_time(), self.info.block_time_secs))
    }

    async fn create_deposit(&self, request: DepositRequest) -> Result<EscrowDeposit> {
        let now = self.chain_time();
        let mut ledger = self.ledger.write();
        Self::take_fault(&mut ledger, &self.info.chain_id)?;

        request.validate_for(self.info.family)?;
        if !self.info.family.can_verify(request.commitment_family) {
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
        if request.timelock.is_expired_at(now) {
            return Err(Error::RejectedByChain(format!(
                "timelock {} already passed",
                request.timelock
            )));
        }

        let key = (request.depositor.clone(), request.token.denom.clone());
        let available = ledger.balances.get(&key).copied().unwrap_or_default();
        if available < request.amount {
            return Err(Error::InsufficientFunds(format!(
                "{} holds {} {}, needs {}",
                request.depositor, available, request.token.denom, request.amount
            )));
        }
        ledger.balances.insert(key, available - request.amount);

        ledger.nonce += 1;
        let nonce = ledger.nonce;
        let deposit = EscrowDeposit {
            handle: self.handle_for(nonce),
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
            funding_reference: self.tx_reference("fund", nonce),
        };

        info!(
            chain = %self.info.chain_id,
            handle = %deposit.handle,
            timelock = %deposit.timelock,
            "Deposit created"
        );

        ledger.deposits.insert(
            deposit.handle.clone(),
            StoredDeposit {
                deposit: deposit.clone(),
                revealed: None,
            },
        );
        Ok(deposit)
    }

    async fn claim_with_secret(
        &self,
        deposit: &EscrowDeposit,
        secret: &Secret,
    ) -> Result<ClaimReceipt> {
        let now = self.chain_time();
        let mut ledger = self.ledger.write();
        Self::take_fault(&mut ledger, &self.info.chain_id)?;

        ledger.nonce += 1;
        let nonce = ledger.nonce;
        let stored = ledger
            .deposits
            .get_mut(&deposit.handle)
            .ok_or_else(|| Error::RejectedByChain(format!("unknown deposit {}", deposit.handle)))?;

        check_claim(&stored.deposit, secret, now)?;
        stored.deposit.status = DepositStatus::Claimed;
        stored.revealed = Some(secret.clone());

        let receipt = ClaimReceipt {
            handle: stored.deposit.handle.clone(),
            chain_id: self.info.chain_id.clone(),
            reference: self.tx_reference("claim", nonce),
            recipient: stored.deposit.beneficiary.clone(),
            amount: stored.deposit.amount,
            kind: ClaimKind::Secret,
        };
        let token = stored.deposit.token.clone();
        Self::credit(&mut ledger, &receipt.recipient, &token, receipt.amount);

        debug!(
            chain = %self.info.chain_id,
            handle = %receipt.handle,
            "Deposit claimed with secret"
        );
        Ok(receipt)
    }

    async fn claim_after_timelock(&self, deposit: &EscrowDeposit) -> Result<ClaimReceipt> {
        let now = self.chain_time();
        let mut ledger = self.ledger.write();
        Self::take_fault(&mut ledger, &self.info.chain_id)?;

        ledger.nonce += 1;
        let nonce = ledger.nonce;
        let stored = ledger
            .deposits
            .get_mut(&deposit.handle)
            .ok_or_else(|| Error::RejectedByChain(format!("unknown deposit {}", deposit.handle)))?;

        check_refund(&stored.deposit, now)?;
        stored.deposit.status = DepositStatus::Refunded;

        let receipt = ClaimReceipt {
            handle: stored.deposit.handle.clone(),
            chain_id: self.info.chain_id.clone(),
            reference: self.tx_reference("refund", nonce),
            recipient: stored.deposit.depositor.clone(),
            amount: stored.deposit.amount,
            kind: ClaimKind::Refund,
        };
        let token = stored.deposit.token.clone();
        Self::credit(&mut ledger, &receipt.recipient, &token, receipt.amount);

        debug!(chain = %self.info.chain_id, handle = %receipt.handle, "Deposit refunded");
        Ok(receipt)
    }

    async fn fetch_deposit(&self, deposit: &EscrowDeposit) -> Result<EscrowDeposit> {
        self.ledger
            .read()
            .deposits
            .get(&deposit.handle)
            .map(|stored| stored.deposit.clone())
            .ok_or_else(|| Error::RejectedByChain(format!("unknown deposit {}", deposit.handle)))
    }

    async fn revealed_secret(&self, deposit: &EscrowDeposit) -> Result<Option<Secret>> {
        let ledger = self.ledger.read();
        let stored = ledger
            .deposits
            .get(&deposit.handle)
            .ok_or_else(|| Error::RejectedByChain(format!("unknown deposit {}", deposit.handle)))?;
        Ok(stored.revealed.clone())
    }
}
