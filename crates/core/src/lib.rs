pub mod commitment;
pub mod coordinator;
pub mod domain;
pub mod encoding;
pub mod escrow;
pub mod store;

pub use commitment::{commit, generate_secret, verify, Hashlock, Secret};
pub use coordinator::{
    CoordinatorConfig, Recovery, RetryPolicy, StepLogEntry, StepOutcome, StepResult,
    SwapCoordinator, SwapError, SwapId, SwapRecord, SwapRequest, SwapState, SwapStatus, SwapStep,
};
pub use domain::{
    Amount, ChainFamily, ChainId, ChainInfo, ChainRegistry, Order, OrderId, OrderStatus,
    OrderTerms, Party, Timelock, TimelockPair, TimelockUnit, Token,
};
pub use escrow::{
    ClaimKind, ClaimReceipt, Clock, DepositHandle, DepositRequest, DepositStatus, EscrowAdapter,
    EscrowDeposit, InMemoryEscrow, ManualClock, SystemClock,
};
pub use store::{InMemorySwapStore, SwapStore};

/// Core result type for swap operations
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure should be treated by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Bad configuration or input data; never retried
    Configuration,
    /// Protocol or state error; fatal for the step, may leave a refund path open
    Protocol,
    /// Chain connectivity; retried with backoff up to a ceiling
    Transient,
}

/// Core error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid terms: {0}")]
    InvalidTerms(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Unsupported chain family: {0}")]
    UnsupportedChainFamily(String),

    #[error("No escrow adapter registered for chain {0}")]
    AdapterNotRegistered(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Rejected by chain: {0}")]
    RejectedByChain(String),

    #[error("Secret does not match hashlock")]
    InvalidSecret,

    #[error("Timelock {timelock} has expired")]
    TimelockExpired { timelock: u64 },

    #[error("Timelock {timelock} not yet expired (chain time {now})")]
    TimelockNotYetExpired { timelock: u64, now: u64 },

    #[error("Timelock too close: {remaining_secs}s remaining, {required_secs}s required")]
    TimelockTooClose { remaining_secs: u64, required_secs: u64 },

    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("Order is not in proposed state (status: {0})")]
    OrderNotProposed(String),

    #[error("Order expired: deadline {deadline}, now {now}")]
    OrderExpired { deadline: u64, now: u64 },

    #[error("Deposit already settled ({0})")]
    DepositSettled(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Swap not found: {0}")]
    SwapNotFound(String),

    #[error("Swap {0} already has a step in flight")]
    SwapBusy(String),

    #[error("Secret not yet revealed on chain {0}")]
    SecretNotRevealed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Classifies the error for retry and recovery decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidTerms(_)
            | Error::UnknownChain(_)
            | Error::UnsupportedChainFamily(_)
            | Error::AdapterNotRegistered(_)
            | Error::Config(_)
            | Error::InvalidEncoding(_)
            | Error::EntropyUnavailable(_) => ErrorClass::Configuration,
            Error::ChainUnavailable(_) => ErrorClass::Transient,
            _ => ErrorClass::Protocol,
        }
    }

    /// Only transient connectivity failures may be resubmitted
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
