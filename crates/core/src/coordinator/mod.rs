pub mod engine;
pub mod retry;

pub use engine::SwapCoordinator;
pub use retry::{with_retry, RetryPolicy};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::commitment::{Hashlock, Secret};
use crate::domain::{
    Amount, ChainFamily, ChainId, Order, OrderStatus, Party, TimelockPair, Token,
};
use crate::encoding;
use crate::escrow::{DepositStatus, EscrowDeposit};
use crate::{Error, ErrorClass, Result};

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Lifetime of the source escrow; the destination escrow gets half
    pub swap_window_secs: u64,

    /// Claims are refused when less than this remains on the timelock
    pub claim_safety_margin_secs: u64,

    /// Default acceptance deadline for new orders
    pub order_ttl_secs: u64,

    /// Resubmission policy for transient chain failures
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            swap_window_secs: 7_200,
            claim_safety_margin_secs: 300,
            order_ttl_secs: 600,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn source_window_secs(&self) -> u64 {
        self.swap_window_secs
    }

    pub fn destination_window_secs(&self) -> u64 {
        self.swap_window_secs / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.destination_window_secs() == 0 {
            return Err(Error::Config("swap_window_secs must be at least 2".to_string()));
        }
        if self.claim_safety_margin_secs >= self.destination_window_secs() {
            return Err(Error::Config(format!(
                "claim_safety_margin_secs ({}) must be below the destination window ({}s)",
                self.claim_safety_margin_secs,
                self.destination_window_secs()
            )));
        }
        if self.order_ttl_secs == 0 {
            return Err(Error::Config("order_ttl_secs must be positive".to_string()));
        }
        self.retry.validate()
    }
}

/// Swap unique identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SwapId(#[serde(with = "crate::encoding::hex32")] pub [u8; 32]);

impl SwapId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encoding::to_prefixed_hex(&self.0))
    }
}

impl FromStr for SwapId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = encoding::from_prefixed_hex(s)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map(SwapId)
            .map_err(|_| Error::InvalidEncoding(format!("swap id must be 32 bytes: {}", s)))
    }
}

/// What party A wants to exchange with party B
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwapRequest {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    /// Amount A locks on the source chain
    pub amount: Amount,
    /// Amount B locks on the destination chain; defaults to `amount`
    pub destination_amount: Option<Amount>,
    pub source_token: Token,
    pub destination_token: Token,
    /// Initiator, holder of the secret
    pub party_a: Party,
    pub party_b: Party,
    /// Order acceptance deadline; defaults to now + `order_ttl_secs`
    pub deadline: Option<u64>,
}

impl SwapRequest {
    pub fn new(
        source_chain: ChainId,
        destination_chain: ChainId,
        amount: Amount,
        source_token: impl Into<String>,
        destination_token: impl Into<String>,
        party_a: Party,
        party_b: Party,
    ) -> Self {
        Self {
            source_token: Token::new(source_chain.clone(), source_token),
            destination_token: Token::new(destination_chain.clone(), destination_token),
            source_chain,
            destination_chain,
            amount,
            destination_amount: None,
            party_a,
            party_b,
            deadline: None,
        }
    }

    pub fn with_destination_amount(mut self, amount: Amount) -> Self {
        self.destination_amount = Some(amount);
        self
    }

    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Swap lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SwapState {
    Initiated,
    OrderAccepted,
    SourceFunded,
    DestinationFunded,
    DestinationClaimed,
    SourceClaimed,
    Completed,
    /// Every funded escrow went back to its depositor
    Refunded,
    /// Abandoned before any escrow was funded
    Cancelled,
}

impl SwapState {
    pub fn can_transition_to(&self, next: SwapState) -> bool {
        use SwapState::*;
        matches!(
            (self, next),
            (Initiated, OrderAccepted)
                | (Initiated, Cancelled)
                | (OrderAccepted, SourceFunded)
                | (OrderAccepted, Cancelled)
                | (SourceFunded, DestinationFunded)
                | (SourceFunded, Refunded)
                | (DestinationFunded, DestinationClaimed)
                | (DestinationFunded, Refunded)
                | (DestinationClaimed, SourceClaimed)
                | (DestinationClaimed, Refunded)
                | (SourceClaimed, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Completed | SwapState::Refunded | SwapState::Cancelled
        )
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Coordinator operation that produced a log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SwapStep {
    Initiate,
    FundSource,
    FundDestination,
    ClaimDestination,
    ClaimSource,
    Complete,
    RefundSource,
    RefundDestination,
    Cancel,
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded { reference: Option<String> },
    Failed { class: ErrorClass, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepLogEntry {
    pub step: SwapStep,
    pub at: u64,
    pub outcome: StepOutcome,
}

/// Everything the coordinator knows about one swap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwapRecord {
    pub id: SwapId,
    pub state: SwapState,
    pub request: SwapRequest,
    pub order: Order,
    pub source_family: ChainFamily,
    pub destination_family: ChainFamily,
    /// Held by party A until the destination claim publishes it
    pub secret: Secret,
    pub source_deposit: Option<EscrowDeposit>,
    pub destination_deposit: Option<EscrowDeposit>,
    pub secret_revealed: bool,
    pub cancel_requested: bool,
    /// Append-only
    pub log: Vec<StepLogEntry>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SwapRecord {
    pub fn hashlock(&self) -> Result<&Hashlock> {
        self.order
            .hashlock
            .as_ref()
            .ok_or_else(|| Error::OrderNotProposed("order has no hashlock".to_string()))
    }

    pub fn timelocks(&self) -> Result<&TimelockPair> {
        self.order
            .timelocks
            .as_ref()
            .ok_or_else(|| Error::OrderNotProposed("order has no timelocks".to_string()))
    }

    /// True while any escrow still holds funds
    pub fn funds_committed(&self) -> bool {
        [&self.source_deposit, &self.destination_deposit]
            .iter()
            .filter_map(|deposit| deposit.as_ref())
            .any(|deposit| deposit.status == DepositStatus::Funded)
    }

    pub(crate) fn advance(&mut self, next: SwapState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn require_state(&self, expected: SwapState, next: SwapState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn push_log(&mut self, step: SwapStep, at: u64, outcome: StepOutcome) {
        self.log.push(StepLogEntry { step, at, outcome });
        self.updated_at = at;
    }
}

/// Externally visible summary of a swap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwapStatus {
    pub id: SwapId,
    pub state: SwapState,
    pub order_status: OrderStatus,
    pub hashlock: Option<Hashlock>,
    pub timelocks: Option<TimelockPair>,
    pub source_deposit: Option<DepositStatus>,
    pub destination_deposit: Option<DepositStatus>,
    pub secret_revealed: bool,
    pub cancel_requested: bool,
    pub steps: usize,
    pub updated_at: u64,
}

impl From<&SwapRecord> for SwapStatus {
    fn from(record: &SwapRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            order_status: record.order.status,
            hashlock: record.order.hashlock.clone(),
            timelocks: record.order.timelocks,
            source_deposit: record.source_deposit.as_ref().map(|d| d.status),
            destination_deposit: record.destination_deposit.as_ref().map(|d| d.status),
            secret_revealed: record.secret_revealed,
            cancel_requested: record.cancel_requested,
            steps: record.log.len(),
            updated_at: record.updated_at,
        }
    }
}

/// What a caller can do after a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recovery {
    /// Transient; run the same step again
    RetryStep,
    /// Nothing is locked; a new swap may be attempted
    RetrySwap,
    /// Funds are locked; wait for the timelock and refund
    AwaitRefund,
    /// Nothing is locked and retrying cannot help
    Abandon,
}

/// Outcome of a coordinator step
pub type StepResult = std::result::Result<SwapRecord, SwapError>;

/// Failure of a coordinator step
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{step} failed for swap {swap_id}: {source}")]
pub struct SwapError {
    pub swap_id: SwapId,
    pub step: SwapStep,
    pub source: Error,
    /// Whether any escrow still held funds when the step failed
    pub funds_committed: bool,
}

impl SwapError {
    pub fn new(swap_id: SwapId, step: SwapStep, source: Error, funds_committed: bool) -> Self {
        Self {
            swap_id,
            step,
            source,
            funds_committed,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.source.class()
    }

    pub fn recovery(&self) -> Recovery {
        if matches!(self.source, Error::SwapBusy(_)) {
            return Recovery::RetryStep;
        }
        match (self.source.class(), self.funds_committed) {
            (ErrorClass::Transient, _) => Recovery::RetryStep,
            (_, true) => Recovery::AwaitRefund,
            (ErrorClass::Configuration, false) => Recovery::Abandon,
            (ErrorClass::Protocol, false) => Recovery::RetrySwap,
        }
    }
}
