//! Escrow capability shared by every chain family.
//!
//! The coordinator only ever talks to [`EscrowAdapter`]; concrete chain
//! bindings live in the adapters crate, and [`InMemoryEscrow`] is the
//! deterministic fake used by tests and the simulator.

pub mod clock;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::InMemoryEscrow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::commitment::{verify, Hashlock, Secret};
use crate::domain::{Amount, ChainFamily, ChainId, Timelock, Token};
use crate::{Error, Result};

/// Chain-specific reference to a deposit (contract id, swap id or outpoint)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositHandle(pub String);

impl fmt::Display for DepositHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    Funded,
    Claimed,
    Refunded,
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters for locking funds in an escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub depositor: String,
    pub beneficiary: String,
    pub token: Token,
    pub amount: Amount,
    pub hashlock: Hashlock,
    /// Family whose commitment function produced `hashlock`
    pub commitment_family: ChainFamily,
    pub timelock: Timelock,
}

impl DepositRequest {
    /// Structural checks every chain performs before accepting a deposit
    pub fn validate_for(&self, family: ChainFamily) -> Result<()> {
        if self.amount.is_zero() {
            return Err(Error::RejectedByChain("zero deposit amount".to_string()));
        }

        if self.depositor.trim().is_empty() || self.beneficiary.trim().is_empty() {
            return Err(Error::RejectedByChain(
                "depositor and beneficiary are required".to_string(),
            ));
        }

        let expected = self.commitment_family.hashlock_len();
        if self.hashlock.len() != expected {
            return Err(Error::RejectedByChain(format!(
                "{} hashlock must be {} bytes, got {}",
                self.commitment_family,
                expected,
                self.hashlock.len()
            )));
        }

        if self.timelock.unit != family.timelock_unit() {
            return Err(Error::RejectedByChain(format!(
                "{} chains do not accept timelock {}",
                family, self.timelock
            )));
        }

        Ok(())
    }
}

/// A deposit as recorded on its chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDeposit {
    pub handle: DepositHandle,
    pub chain_id: ChainId,
    pub family: ChainFamily,
    pub depositor: String,
    pub beneficiary: String,
    pub token: Token,
    pub amount: Amount,
    pub hashlock: Hashlock,
    pub commitment_family: ChainFamily,
    pub timelock: Timelock,
    pub status: DepositStatus,
    /// Transaction that created the deposit
    pub funding_reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimKind {
    /// Beneficiary claimed by revealing the secret
    Secret,
    /// Depositor reclaimed after the timelock
    Refund,
}

/// Confirmation of a settled deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub handle: DepositHandle,
    pub chain_id: ChainId,
    /// Settling transaction
    pub reference: String,
    pub recipient: String,
    pub amount: Amount,
    pub kind: ClaimKind,
}

/// Rules a chain applies to a secret claim. `now` is chain time in the
/// deposit's timelock unit.
pub fn check_claim(deposit: &EscrowDeposit, secret: &Secret, now: u64) -> Result<()> {
    if deposit.status != DepositStatus::Funded {
        return Err(Error::DepositSettled(deposit.status.to_string()));
    }

    if deposit.timelock.is_expired_at(now) {
        return Err(Error::TimelockExpired {
            timelock: deposit.timelock.value,
        });
    }

    if !verify(secret, deposit.commitment_family, &deposit.hashlock) {
        return Err(Error::InvalidSecret);
    }

    Ok(())
}

/// Rules a chain applies to a refund after expiry
pub fn check_refund(deposit: &EscrowDeposit, now: u64) -> Result<()> {
    if deposit.status != DepositStatus::Funded {
        return Err(Error::DepositSettled(deposit.status.to_string()));
    }

    if !deposit.timelock.is_expired_at(now) {
        return Err(Error::TimelockNotYetExpired {
            timelock: deposit.timelock.value,
            now,
        });
    }

    Ok(())
}

/// Escrow capability set implemented once per chain family
#[async_trait]
pub trait EscrowAdapter: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    fn family(&self) -> ChainFamily;

    /// Whether this chain can enforce hashlocks made with `family`'s commitment
    fn supports_commitment(&self, _family: ChainFamily) -> bool {
        true
    }

    /// Timelock `window_secs` from current chain time, in chain-native units
    async fn timelock_after(&self, window_secs: u64) -> Result<Timelock>;

    /// Estimated seconds until `timelock` expires (zero once expired)
    async fn seconds_until(&self, timelock: &Timelock) -> Result<u64>;

    /// Locks funds; returns once the deposit is confirmed
    async fn create_deposit(&self, request: DepositRequest) -> Result<EscrowDeposit>;

    /// Pays the beneficiary; publishes `secret` on this chain
    async fn claim_with_secret(
        &self,
        deposit: &EscrowDeposit,
        secret: &Secret,
    ) -> Result<ClaimReceipt>;

    /// Returns funds to the depositor once the timelock has passed
    async fn claim_after_timelock(&self, deposit: &EscrowDeposit) -> Result<ClaimReceipt>;

    /// Reads the deposit back from chain state. Works for deposits created
    /// by any adapter instance.
    async fn fetch_deposit(&self, deposit: &EscrowDeposit) -> Result<EscrowDeposit>;

    /// Secret published by a successful claim, if any
    async fn revealed_secret(&self, deposit: &EscrowDeposit) -> Result<Option<Secret>>;
}
