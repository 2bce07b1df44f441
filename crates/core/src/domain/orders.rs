use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::chains::ChainId;
use super::timelocks::TimelockPair;
use super::tokens::{Amount, Token};
use crate::commitment::Hashlock;
use crate::encoding;
use crate::{Error, Result};

/// A swap participant with one address on each chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Party {
    /// Human-readable label used in logs
    pub label: String,

    /// Address on the source chain
    pub source_address: String,

    /// Address on the destination chain
    pub destination_address: String,
}

impl Party {
    pub fn new(
        label: impl Into<String>,
        source_address: impl Into<String>,
        destination_address: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            source_address: source_address.into(),
            destination_address: destination_address.into(),
        }
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.source_address.trim().is_empty() || self.destination_address.trim().is_empty() {
            return Err(Error::InvalidTerms(format!(
                "{} ({}) must have an address on both chains",
                role, self.label
            )));
        }
        Ok(())
    }
}

/// Terms agreed by the two parties before anything is locked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderTerms {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source_token: Token,
    pub destination_token: Token,
    pub source_amount: Amount,
    pub destination_amount: Amount,
    /// Party that funds the source escrow and holds the secret
    pub proposer: Party,
    /// Party that funds the destination escrow
    pub counterparty: Party,
    /// Unix time after which the order can no longer be accepted
    pub deadline: u64,
}

/// Order unique identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OrderId(#[serde(with = "crate::encoding::hex32")] pub [u8; 32]);

impl OrderId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encoding::to_prefixed_hex(&self.0))
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    /// Terms recorded, awaiting the counterparty
    Proposed,
    /// Hashlock and timelocks bound
    Accepted,
    /// Both escrows funded
    Funded,
    /// Both claims confirmed
    Completed,
    /// Lapsed before both escrows were funded
    Expired,
    /// Funded escrows returned to their depositors
    Refunded,
}

impl OrderStatus {
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Proposed, Accepted)
                | (Proposed, Expired)
                | (Accepted, Funded)
                | (Accepted, Expired)
                | (Funded, Completed)
                | (Funded, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Expired | OrderStatus::Refunded
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Negotiated swap order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub terms: OrderTerms,
    pub status: OrderStatus,
    /// Bound at acceptance
    pub hashlock: Option<Hashlock>,
    /// Bound at acceptance
    pub timelocks: Option<TimelockPair>,
    pub created_at: u64,
}

/// Records a new order in `Proposed` state
pub fn propose(terms: OrderTerms, now: u64) -> Result<Order> {
    if terms.source_chain == terms.destination_chain {
        return Err(Error::InvalidTerms(format!(
            "source and destination chain are both {}",
            terms.source_chain
        )));
    }

    if terms.source_amount.is_zero() || terms.destination_amount.is_zero() {
        return Err(Error::InvalidTerms(
            "amounts must be greater than zero".to_string(),
        ));
    }

    if terms.deadline <= now {
        return Err(Error::InvalidTerms(format!(
            "deadline {} is not in the future (now {})",
            terms.deadline, now
        )));
    }

    if terms.source_token.chain_id != terms.source_chain
        || terms.destination_token.chain_id != terms.destination_chain
    {
        return Err(Error::InvalidTerms(
            "token chains must match the order chains".to_string(),
        ));
    }

    terms.proposer.validate("proposer")?;
    terms.counterparty.validate("counterparty")?;

    Ok(Order {
        id: OrderId::random(),
        terms,
        status: OrderStatus::Proposed,
        hashlock: None,
        timelocks: None,
        created_at: now,
    })
}

/// Binds the hashlock and timelocks the counterparty commits to honouring.
/// The timelocks must leave `margin_secs` for each claim.
pub fn accept(
    order: &mut Order,
    hashlock: Hashlock,
    timelocks: TimelockPair,
    now: u64,
    margin_secs: u64,
) -> Result<()> {
    if order.status != OrderStatus::Proposed {
        return Err(Error::OrderNotProposed(order.status.to_string()));
    }

    if order.is_expired(now) {
        return Err(Error::OrderExpired {
            deadline: order.terms.deadline,
            now,
        });
    }

    timelocks.check_ordering(now, margin_secs)?;

    order.hashlock = Some(hashlock);
    order.timelocks = Some(timelocks);
    order.status = OrderStatus::Accepted;
    Ok(())
}

impl Order {
    /// Checks if the acceptance deadline has passed
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.terms.deadline
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_funded(&mut self) -> Result<()> {
        self.transition(OrderStatus::Funded)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(OrderStatus::Completed)
    }

    pub fn expire(&mut self) -> Result<()> {
        self.transition(OrderStatus::Expired)
    }

    pub fn refund(&mut self) -> Result<()> {
        self.transition(OrderStatus::Refunded)
    }

    fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
