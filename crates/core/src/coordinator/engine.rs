use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::retry::with_retry;
use super::{
    CoordinatorConfig, StepOutcome, StepResult, SwapError, SwapId, SwapRecord, SwapRequest,
    SwapState, SwapStatus, SwapStep,
};
use crate::commitment::{commit, generate_secret};
use crate::domain::{accept, propose, ChainId, ChainRegistry, OrderTerms, Timelock, TimelockPair};
use crate::escrow::{Clock, DepositRequest, DepositStatus, EscrowAdapter, EscrowDeposit};
use crate::store::SwapStore;
use crate::{Error, Result};

/// Drives swaps through the HTLC sequence against registered escrow adapters
pub struct SwapCoordinator {
    config: CoordinatorConfig,
    registry: ChainRegistry,
    adapters: HashMap<ChainId, Arc<dyn EscrowAdapter>>,
    store: Arc<dyn SwapStore>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<SwapId>>,
    /// Records whose last save failed; they shadow the stored copy
    unsaved: Mutex<HashMap<SwapId, SwapRecord>>,
}

/// Releases the per-swap step slot on drop
struct InFlight<'a> {
    slots: &'a Mutex<HashSet<SwapId>>,
    id: SwapId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.id);
    }
}

impl SwapCoordinator {
    /// Creates a coordinator with no adapters registered
    pub fn new(
        config: CoordinatorConfig,
        registry: ChainRegistry,
        store: Arc<dyn SwapStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            adapters: HashMap::new(),
            store,
            clock,
            in_flight: Mutex::new(HashSet::new()),
            unsaved: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the escrow adapter for one chain
    pub fn register_adapter(&mut self, adapter: Arc<dyn EscrowAdapter>) -> Result<()> {
        let family = self.registry.classify(adapter.chain_id())?;
        if family != adapter.family() {
            return Err(Error::Config(format!(
                "chain {} is {} but the adapter speaks {}",
                adapter.chain_id(),
                family,
                adapter.family()
            )));
        }
        debug!(chain = %adapter.chain_id(), family = %family, "Registered escrow adapter");
        self.adapters.insert(adapter.chain_id().clone(), adapter);
        Ok(())
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn EscrowAdapter>) -> Result<Self> {
        self.register_adapter(adapter)?;
        Ok(self)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Runs every step of the swap in order
    pub async fn execute_swap(&self, request: SwapRequest) -> StepResult {
        let record = self.initiate(request).await?;
        let id = record.id;
        self.fund_source(&id).await?;
        self.fund_destination(&id).await?;
        self.claim_destination(&id).await?;
        self.claim_source(&id).await
    }

    /// Classifies both chains, commits to a fresh secret under the source
    /// family and records an accepted order
    pub async fn initiate(&self, request: SwapRequest) -> StepResult {
        let id = SwapId::random();
        let _slot = self.acquire(id, SwapStep::Initiate)?;

        let mut record = self
            .prepare(id, request)
            .await
            .map_err(|e| {
                warn!(swap = %id, error = %e, "Swap initiation failed");
                SwapError::new(id, SwapStep::Initiate, e, false)
            })?;

        let reference = Some(record.order.id.to_string());
        let result = record.advance(SwapState::OrderAccepted).map(|_| reference);
        self.finish(record, SwapStep::Initiate, result).await
    }

    pub async fn fund_source(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::FundSource).await
    }

    pub async fn fund_destination(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::FundDestination).await
    }

    pub async fn claim_destination(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::ClaimDestination).await
    }

    /// Claims the source escrow with the secret observed on the destination
    /// chain, then completes the order
    pub async fn claim_source(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::ClaimSource).await?;
        self.run_step(id, SwapStep::Complete).await
    }

    pub async fn refund_source(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::RefundSource).await
    }

    pub async fn refund_destination(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::RefundDestination).await
    }

    /// Cancels before funding; afterwards only flags the swap so that no
    /// further escrow is funded
    pub async fn cancel(&self, id: &SwapId) -> StepResult {
        self.run_step(id, SwapStep::Cancel).await
    }

    pub async fn get_swap_status(&self, id: &SwapId) -> Result<SwapStatus> {
        let record = self.load(id).await?;
        Ok(SwapStatus::from(&record))
    }

    pub async fn get_swap(&self, id: &SwapId) -> Result<SwapRecord> {
        self.load(id).await
    }

    async fn load(&self, id: &SwapId) -> Result<SwapRecord> {
        if let Some(record) = self.unsaved.lock().get(id).cloned() {
            return Ok(record);
        }
        self.store.load(id).await
    }

    /// Saves `record`; on failure keeps it in memory until a later save lands
    async fn persist(&self, record: &SwapRecord) -> Result<()> {
        match self.store.save(record).await {
            Ok(()) => {
                self.unsaved.lock().remove(&record.id);
                Ok(())
            }
            Err(err) => {
                self.unsaved.lock().insert(record.id, record.clone());
                Err(err)
            }
        }
    }

    fn acquire(&self, id: SwapId, step: SwapStep) -> std::result::Result<InFlight<'_>, SwapError> {
        if !self.in_flight.lock().insert(id) {
            return Err(SwapError::new(id, step, Error::SwapBusy(id.to_string()), false));
        }
        Ok(InFlight {
            slots: &self.in_flight,
            id,
        })
    }

    fn adapter(&self, chain_id: &ChainId) -> Result<&Arc<dyn EscrowAdapter>> {
        self.adapters
            .get(chain_id)
            .ok_or_else(|| Error::AdapterNotRegistered(chain_id.to_string()))
    }

    async fn run_step(&self, id: &SwapId, step: SwapStep) -> StepResult {
        let _slot = self.acquire(*id, step)?;
        let mut record = self
            .load(id)
            .await
            .map_err(|e| SwapError::new(*id, step, e, false))?;

        debug!(swap = %id, step = %step, state = %record.state, "Running step");

        let result = match step {
            SwapStep::FundSource => self.fund_source_step(&mut record).await,
            SwapStep::FundDestination => self.fund_destination_step(&mut record).await,
            SwapStep::ClaimDestination => self.claim_destination_step(&mut record).await,
            SwapStep::ClaimSource => self.claim_source_step(&mut record).await,
            SwapStep::Complete => self.complete_step(&mut record),
            SwapStep::RefundSource => self.refund_step(&mut record, true).await,
            SwapStep::RefundDestination => self.refund_step(&mut record, false).await,
            SwapStep::Cancel => self.cancel_step(&mut record),
            SwapStep::Initiate => Err(Error::InvalidTransition {
                from: record.state.to_string(),
                to: SwapState::Initiated.to_string(),
            }),
        };

        self.finish(record, step, result).await
    }

    /// Appends the outcome to the log and persists the record. Once a step has
    /// changed chain state a failed save only warns: the record stays in memory
    /// and the next load sees the on-chain result.
    async fn finish(
        &self,
        mut record: SwapRecord,
        step: SwapStep,
        result: Result<Option<String>>,
    ) -> StepResult {
        let now = self.clock.now();
        match result {
            Ok(reference) => {
                record.push_log(step, now, StepOutcome::Succeeded { reference });
                if let Err(save_err) = self.persist(&record).await {
                    if step == SwapStep::Initiate {
                        self.unsaved.lock().remove(&record.id);
                        return Err(SwapError::new(record.id, step, save_err, false));
                    }
                    warn!(
                        swap = %record.id,
                        step = %step,
                        error = %save_err,
                        "Step applied on chain but the record was not persisted"
                    );
                }
                info!(swap = %record.id, step = %step, state = %record.state, "Step succeeded");
                Ok(record)
            }
            Err(err) => {
                record.push_log(
                    step,
                    now,
                    StepOutcome::Failed {
                        class: err.class(),
                        error: err.to_string(),
                    },
                );
                if let Err(save_err) = self.persist(&record).await {
                    warn!(swap = %record.id, error = %save_err, "Failed to persist step failure");
                }
                warn!(
                    swap = %record.id,
                    step = %step,
                    state = %record.state,
                    error = %err,
                    "Step failed"
                );
                Err(SwapError::new(record.id, step, err, record.funds_committed()))
            }
        }
    }

    async fn prepare(&self, id: SwapId, request: SwapRequest) -> Result<SwapRecord> {
        let source_family = self.registry.classify(&request.source_chain)?;
        let destination_family = self.registry.classify(&request.destination_chain)?;
        let source = self.adapter(&request.source_chain)?;
        let destination = self.adapter(&request.destination_chain)?;

        // both escrows verify the same hashlock
        for adapter in [source, destination] {
            if !adapter.supports_commitment(source_family) {
                return Err(Error::UnsupportedChainFamily(format!(
                    "chain {} cannot verify {} hashlocks",
                    adapter.chain_id(),
                    source_family
                )));
            }
        }

        request.source_token.validate_for(source_family)?;
        request.destination_token.validate_for(destination_family)?;

        let secret = generate_secret()?;
        let hashlock = commit(&secret, source_family);

        let now = self.clock.now();
        let terms = OrderTerms {
            source_chain: request.source_chain.clone(),
            destination_chain: request.destination_chain.clone(),
            source_token: request.source_token.clone(),
            destination_token: request.destination_token.clone(),
            source_amount: request.amount,
            destination_amount: request.destination_amount.unwrap_or(request.amount),
            proposer: request.party_a.clone(),
            counterparty: request.party_b.clone(),
            deadline: request
                .deadline
                .unwrap_or_else(|| now.saturating_add(self.config.order_ttl_secs)),
        };
        let mut order = propose(terms, now)?;

        let timelocks = TimelockPair {
            source: self
                .timelock_after(source.as_ref(), self.config.source_window_secs())
                .await?,
            destination: self
                .timelock_after(destination.as_ref(), self.config.destination_window_secs())
                .await?,
            source_expires_at: 0,
            destination_expires_at: 0,
        };
        let timelocks = TimelockPair {
            source_expires_at: now
                .saturating_add(self.seconds_until(source.as_ref(), &timelocks.source).await?),
            destination_expires_at: now.saturating_add(
                self.seconds_until(destination.as_ref(), &timelocks.destination)
                    .await?,
            ),
            ..timelocks
        };

        let margin = self.config.claim_safety_margin_secs;
        accept(&mut order, hashlock, timelocks, now, margin)?;

        info!(
            swap = %id,
            order = %order.id,
            source = %request.source_chain,
            destination = %request.destination_chain,
            family = %source_family,
            source_timelock = %timelocks.source,
            destination_timelock = %timelocks.destination,
            "Order accepted"
        );

        Ok(SwapRecord {
            id,
            state: SwapState::Initiated,
            request,
            order,
            source_family,
            destination_family,
            secret,
            source_deposit: None,
            destination_deposit: None,
            secret_revealed: false,
            cancel_requested: false,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn fund_source_step(&self, record: &mut SwapRecord) -> Result<Option<String>> {
        record.require_state(SwapState::OrderAccepted, SwapState::SourceFunded)?;
        let timelocks = *record.timelocks()?;
        if self.clock.now() >= timelocks.destination_expires_at {
            return Err(Error::TimelockExpired {
                timelock: timelocks.destination.value,
            });
        }

        let terms = &record.order.terms;
        let request = DepositRequest {
            depositor: terms.proposer.source_address.clone(),
            beneficiary: terms.counterparty.source_address.clone(),
            token: terms.source_token.clone(),
            amount: terms.source_amount,
            hashlock: record.hashlock()?.clone(),
            commitment_family: record.source_family,
            timelock: timelocks.source,
        };

        let source = self.adapter(&terms.source_chain)?;
        let deposit = self.create_deposit(source.as_ref(), request).await?;
        let reference = deposit.funding_reference.clone();

        record.source_deposit = Some(deposit);
        record.advance(SwapState::SourceFunded)?;
        Ok(Some(reference))
    }

    async fn fund_destination_step(&self, record: &mut SwapRecord) -> Result<Option<String>> {
        record.require_state(SwapState::SourceFunded, SwapState::DestinationFunded)?;
        if record.cancel_requested {
            return Err(Error::InvalidTransition {
                from: format!("{} (cancel requested)", record.state),
                to: SwapState::DestinationFunded.to_string(),
            });
        }

        let timelocks = *record.timelocks()?;
        let hashlock = record.hashlock()?.clone();
        let terms = record.order.terms.clone();
        let source = self.adapter(&terms.source_chain)?;
        let destination = self.adapter(&terms.destination_chain)?;

        // B confirms A's deposit on-chain before locking anything
        let recorded = record
            .source_deposit
            .as_ref()
            .ok_or_else(|| Error::InvalidTransition {
                from: record.state.to_string(),
                to: SwapState::DestinationFunded.to_string(),
            })?;
        let onchain = self.fetch_deposit(source.as_ref(), recorded).await?;
        if onchain.status != DepositStatus::Funded {
            return Err(Error::DepositSettled(onchain.status.to_string()));
        }
        if onchain.hashlock != hashlock || onchain.commitment_family != record.source_family {
            return Err(Error::InvalidTerms(format!(
                "source deposit {} is not locked to the order hashlock",
                onchain.handle
            )));
        }
        if onchain.timelock != timelocks.source || onchain.amount != terms.source_amount {
            return Err(Error::InvalidTerms(format!(
                "source deposit {} does not match the order terms",
                onchain.handle
            )));
        }

        if self
            .seconds_until(destination.as_ref(), &timelocks.destination)
            .await?
            == 0
        {
            return Err(Error::TimelockExpired {
                timelock: timelocks.destination.value,
            });
        }

        let request = DepositRequest {
            depositor: terms.counterparty.destination_address.clone(),
            beneficiary: terms.proposer.destination_address.clone(),
            token: terms.destination_token.clone(),
            amount: terms.destination_amount,
            hashlock,
            commitment_family: record.source_family,
            timelock: timelocks.destination,
        };
        let deposit = self.create_deposit(destination.as_ref(), request).await?;
        let reference = deposit.funding_reference.clone();

        record.order.mark_funded()?;
        record.source_deposit = Some(onchain);
        record.destination_deposit = Some(deposit);
        record.advance(SwapState::DestinationFunded)?;
        Ok(Some(reference))
    }

    async fn claim_destination_step(&self, record: &mut SwapRecord) -> Result<Option<String>> {
        record.require_state(SwapState::DestinationFunded, SwapState::DestinationClaimed)?;
        let destination = self.adapter(&record.order.terms.destination_chain)?;
        let deposit = record
            .destination_deposit
            .clone()
            .ok_or_else(|| Error::InvalidTransition {
                from: record.state.to_string(),
                to: SwapState::DestinationClaimed.to_string(),
            })?;

        self.ensure_claim_window(destination.as_ref(), &deposit.timelock)
            .await?;

        let secret = record.secret.clone();
        let receipt = with_retry(&self.config.retry, "claim_with_secret", || {
            destination.claim_with_secret(&deposit, &secret)
        })
        .await?;

        if let Some(stored) = record.destination_deposit.as_mut() {
            stored.status = DepositStatus::Claimed;
        }
        record.secret_revealed = true;
        record.advance(SwapState::DestinationClaimed)?;
        Ok(Some(receipt.reference))
    }

    async fn claim_source_step(&self, record: &mut SwapRecord) -> Result<Option<String>> {
        record.require_state(SwapState::DestinationClaimed, SwapState::SourceClaimed)?;
        let terms = &record.order.terms;
        let source = self.adapter(&terms.source_chain)?;
        let destination = self.adapter(&terms.destination_chain)?;
        let missing = || Error::InvalidTransition {
            from: SwapState::DestinationClaimed.to_string(),
            to: SwapState::SourceClaimed.to_string(),
        };
        let source_deposit = record.source_deposit.clone().ok_or_else(missing)?;
        let destination_deposit = record.destination_deposit.clone().ok_or_else(missing)?;

        // B learns the secret from the destination chain, not from A
        let secret = with_retry(&self.config.retry, "revealed_secret", || {
            destination.revealed_secret(&destination_deposit)
        })
        .await?
        .ok_or_else(|| Error::SecretNotRevealed(terms.destination_chain.to_string()))?;

        self.ensure_claim_window(source.as_ref(), &source_deposit.timelock)
            .await?;

        let receipt = with_retry(&self.config.retry, "claim_with_secret", || {
            source.claim_with_secret(&source_deposit, &secret)
        })
        .await?;

        if let Some(stored) = record.source_deposit.as_mut() {
            stored.status = DepositStatus::Claimed;
        }
        record.advance(SwapState::SourceClaimed)?;
        Ok(Some(receipt.reference))
    }

    fn complete_step(&self, record: &mut SwapRecord) -> Result<Option<String>> {
        record.require_state(SwapState::SourceClaimed, SwapState::Completed)?;
        record.order.complete()?;
        record.advance(SwapState::Completed)?;
        info!(swap = %record.id, order = %record.order.id, "Swap completed");
        Ok(None)
    }

    async fn refund_step(
        &self,
        record: &mut SwapRecord,
        source_side: bool,
    ) -> Result<Option<String>> {
        let (chain_id, deposit) = if source_side {
            (&record.order.terms.source_chain, record.source_deposit.clone())
        } else {
            (
                &record.order.terms.destination_chain,
                record.destination_deposit.clone(),
            )
        };
        let deposit = deposit.ok_or_else(|| Error::InvalidTransition {
            from: record.state.to_string(),
            to: SwapState::Refunded.to_string(),
        })?;
        let adapter = self.adapter(chain_id)?;

        let receipt = with_retry(&self.config.retry, "claim_after_timelock", || {
            adapter.claim_after_timelock(&deposit)
        })
        .await?;

        let slot = if source_side {
            record.source_deposit.as_mut()
        } else {
            record.destination_deposit.as_mut()
        };
        if let Some(stored) = slot {
            stored.status = DepositStatus::Refunded;
        }

        if !record.funds_committed() && record.state.can_transition_to(SwapState::Refunded) {
            if record.destination_deposit.is_none() {
                record.order.expire()?;
            } else {
                record.order.refund()?;
            }
            record.advance(SwapState::Refunded)?;
        }
        Ok(Some(receipt.reference))
    }

    fn cancel_step(&self, record: &mut SwapRecord) -> Result<Option<String>> {
        match record.state {
            SwapState::Initiated | SwapState::OrderAccepted => {
                record.order.expire()?;
                record.advance(SwapState::Cancelled)?;
                Ok(None)
            }
            state if state.is_terminal() => Err(Error::InvalidTransition {
                from: state.to_string(),
                to: SwapState::Cancelled.to_string(),
            }),
            state => {
                warn!(
                    swap = %record.id,
                    state = %state,
                    "Cancel requested after funding; funds return through the refund path"
                );
                record.cancel_requested = true;
                Ok(None)
            }
        }
    }

    /// Refuses claims on expired timelocks or inside the safety margin
    async fn ensure_claim_window(
        &self,
        adapter: &dyn EscrowAdapter,
        timelock: &Timelock,
    ) -> Result<()> {
        let remaining = self.seconds_until(adapter, timelock).await?;
        if remaining == 0 {
            return Err(Error::TimelockExpired {
                timelock: timelock.value,
            });
        }
        if remaining < self.config.claim_safety_margin_secs {
            return Err(Error::TimelockTooClose {
                remaining_secs: remaining,
                required_secs: self.config.claim_safety_margin_secs,
            });
        }
        Ok(())
    }

    async fn timelock_after(
        &self,
        adapter: &dyn EscrowAdapter,
        window_secs: u64,
    ) -> Result<Timelock> {
        with_retry(&self.config.retry, "timelock_after", || {
            adapter.timelock_after(window_secs)
        })
        .await
    }

    async fn seconds_until(&self, adapter: &dyn EscrowAdapter, timelock: &Timelock) -> Result<u64> {
        with_retry(&self.config.retry, "seconds_until", || {
            adapter.seconds_until(timelock)
        })
        .await
    }

    async fn create_deposit(
        &self,
        adapter: &dyn EscrowAdapter,
        request: DepositRequest,
    ) -> Result<EscrowDeposit> {
        with_retry(&self.config.retry, "create_deposit", || {
            adapter.create_deposit(request.clone())
        })
        .await
    }

    async fn fetch_deposit(
        &self,
        adapter: &dyn EscrowAdapter,
        deposit: &EscrowDeposit,
    ) -> Result<EscrowDeposit> {
        with_retry(&self.config.retry, "fetch_deposit", || {
            adapter.fetch_deposit(deposit)
        })
        .await
    }
}
