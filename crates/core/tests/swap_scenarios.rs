use std::sync::Arc;

use ethers::types::U256;
use htlc_core::escrow::{ClaimKind, DepositRequest, DepositStatus, EscrowAdapter, InMemoryEscrow};
use htlc_core::{
    commit, generate_secret, ChainFamily, ChainId, ChainRegistry, Clock, CoordinatorConfig,
    Error, InMemorySwapStore, ManualClock, OrderStatus, Party, Recovery, SwapCoordinator,
    SwapRequest, SwapState, Timelock, TimelockUnit,
};
use htlc_core::domain::Token;

const START: u64 = 1_700_000_000;
const USDC: &str = "0x2791bca1f2de4661ed88a30c99a7a9449aa84174";
const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
const BOB: &str = "0x0000000000000000000000000000000000000b0b";
const ALICE_DOGE: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const BOB_DOGE: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

struct Network {
    clock: ManualClock,
    polygon: Arc<InMemoryEscrow>,
    osmosis: Arc<InMemoryEscrow>,
    dogecoin: Arc<InMemoryEscrow>,
    coordinator: SwapCoordinator,
}

fn usdc() -> Token {
    Token::new(ChainId::from(137), USDC)
}

fn uosmo() -> Token {
    Token::new(ChainId::from("osmosis-1"), "uosmo")
}

fn doge() -> Token {
    Token::new(ChainId::from(568), "DOGE")
}

fn network() -> Network {
    let clock = ManualClock::new(START);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let registry = ChainRegistry::default();

    let polygon = Arc::new(
        InMemoryEscrow::for_chain(&registry, &ChainId::from(137), shared.clone()).unwrap(),
    );
    let osmosis = Arc::new(
        InMemoryEscrow::for_chain(&registry, &ChainId::from("osmosis-1"), shared.clone())
            .unwrap(),
    );
    let dogecoin = Arc::new(
        InMemoryEscrow::for_chain(&registry, &ChainId::from(568), shared.clone()).unwrap(),
    );
    polygon.fund(ALICE, &usdc(), U256::from(2_000_000u64));
    osmosis.fund("osmo1bob", &uosmo(), U256::from(2_000_000u64));

    let coordinator = SwapCoordinator::new(
        CoordinatorConfig::default(),
        registry,
        Arc::new(InMemorySwapStore::new()),
        shared,
    )
    .unwrap()
    .with_adapter(polygon.clone())
    .unwrap()
    .with_adapter(osmosis.clone())
    .unwrap()
    .with_adapter(dogecoin.clone())
    .unwrap();

    Network {
        clock,
        polygon,
        osmosis,
        dogecoin,
        coordinator,
    }
}

fn polygon_to_osmosis() -> SwapRequest {
    SwapRequest::new(
        ChainId::from(137),
        ChainId::from("osmosis-1"),
        U256::from(1_000_000u64),
        USDC,
        "uosmo",
        Party::new("alice", ALICE, "osmo1alice"),
        Party::new("bob", BOB, "osmo1bob"),
    )
}

#[tokio::test]
async fn happy_path_evm_to_cosmos() {
    let net = network();
    let record = net
        .coordinator
        .execute_swap(polygon_to_osmosis())
        .await
        .unwrap();

    assert_eq!(record.state, SwapState::Completed);
    assert_eq!(record.order.status, OrderStatus::Completed);
    assert!(record.secret_revealed);

    let source = record.source_deposit.as_ref().unwrap();
    let destination = record.destination_deposit.as_ref().unwrap();
    assert_eq!(source.status, DepositStatus::Claimed);
    assert_eq!(destination.status, DepositStatus::Claimed);

    // one hashlock, keccak of the secret, on both escrows
    let keccak = commit(&record.secret, ChainFamily::Evm);
    assert_eq!(source.hashlock, keccak);
    assert_eq!(destination.hashlock, keccak);
    assert!(destination.timelock.value < source.timelock.value);

    assert_eq!(net.polygon.balance_of(BOB, &usdc()), U256::from(1_000_000u64));
    assert_eq!(net.polygon.balance_of(ALICE, &usdc()), U256::from(1_000_000u64));
    assert_eq!(
        net.osmosis.balance_of("osmo1alice", &uosmo()),
        U256::from(1_000_000u64)
    );

    // initiate, 2 fundings, 2 claims, completion
    assert_eq!(record.log.len(), 6);
    let status = net.coordinator.get_swap_status(&record.id).await.unwrap();
    assert_eq!(status.state, SwapState::Completed);
}

fn osmosis_to(destination: ChainId, token: &str, alice: &str, bob: &str) -> SwapRequest {
    SwapRequest::new(
        ChainId::from("osmosis-1"),
        destination,
        U256::from(1_000_000u64),
        "uosmo",
        token,
        Party::new("alice", "osmo1alice", alice),
        Party::new("bob", "osmo1bob", bob),
    )
}

#[tokio::test]
async fn happy_path_cosmos_to_evm() {
    let net = network();
    net.osmosis.fund("osmo1alice", &uosmo(), U256::from(1_000_000u64));
    net.polygon.fund(BOB, &usdc(), U256::from(1_000_000u64));

    let request = osmosis_to(ChainId::from(137), USDC, ALICE, BOB);
    let record = net.coordinator.execute_swap(request).await.unwrap();

    assert_eq!(record.state, SwapState::Completed);
    assert_eq!(record.source_family, ChainFamily::Cosmos);

    // the EVM escrow verifies the sha256 commitment
    let sha256 = commit(&record.secret, ChainFamily::Cosmos);
    let destination = record.destination_deposit.as_ref().unwrap();
    assert_eq!(destination.hashlock, sha256);
    assert_eq!(destination.commitment_family, ChainFamily::Cosmos);

    assert_eq!(net.polygon.balance_of(ALICE, &usdc()), U256::from(3_000_000u64));
    assert_eq!(
        net.osmosis.balance_of("osmo1bob", &uosmo()),
        U256::from(3_000_000u64)
    );
}

#[tokio::test]
async fn happy_path_cosmos_to_utxo() {
    let net = network();
    net.osmosis.fund("osmo1alice", &uosmo(), U256::from(1_000_000u64));
    net.dogecoin.fund(BOB_DOGE, &doge(), U256::from(1_000_000u64));

    let request = osmosis_to(ChainId::from(568), "DOGE", ALICE_DOGE, BOB_DOGE);
    let record = net.coordinator.execute_swap(request).await.unwrap();

    assert_eq!(record.state, SwapState::Completed);
    let source = record.source_deposit.as_ref().unwrap();
    let destination = record.destination_deposit.as_ref().unwrap();
    assert!(matches!(source.timelock.unit, TimelockUnit::UnixSeconds));
    assert!(matches!(destination.timelock.unit, TimelockUnit::BlockHeight));
    assert_eq!(destination.hashlock, commit(&record.secret, ChainFamily::Cosmos));

    assert_eq!(
        net.dogecoin.balance_of(ALICE_DOGE, &doge()),
        U256::from(1_000_000u64)
    );
    assert_eq!(
        net.osmosis.balance_of("osmo1bob", &uosmo()),
        U256::from(3_000_000u64)
    );
}

#[tokio::test]
async fn block_height_claim_window_is_enforced() {
    let net = network();
    net.osmosis.fund("osmo1alice", &uosmo(), U256::from(1_000_000u64));
    net.dogecoin.fund(BOB_DOGE, &doge(), U256::from(1_000_000u64));

    let request = osmosis_to(ChainId::from(568), "DOGE", ALICE_DOGE, BOB_DOGE);
    let record = net.coordinator.initiate(request).await.unwrap();
    net.coordinator.fund_source(&record.id).await.unwrap();
    let record = net.coordinator.fund_destination(&record.id).await.unwrap();
    let deposit = record.destination_deposit.clone().unwrap();
    assert_eq!(net.dogecoin.seconds_until(&deposit.timelock).await.unwrap(), 3_600);

    // four 60s blocks left, inside the 300s claim margin
    net.clock.advance(3_360);
    assert_eq!(net.dogecoin.seconds_until(&deposit.timelock).await.unwrap(), 240);
    let err = net
        .coordinator
        .claim_destination(&record.id)
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::TimelockTooClose { .. }));
    assert_eq!(err.recovery(), Recovery::AwaitRefund);
    assert_eq!(net.dogecoin.revealed_secret(&deposit).await.unwrap(), None);

    net.clock.advance(240);
    let record = net.coordinator.refund_destination(&record.id).await.unwrap();
    assert_eq!(
        record.destination_deposit.as_ref().map(|d| d.status),
        Some(DepositStatus::Refunded)
    );
    assert_eq!(net.dogecoin.balance_of(BOB_DOGE, &doge()), U256::from(1_000_000u64));
}

#[tokio::test]
async fn utxo_to_cosmos_is_refused() {
    let net = network();
    // CosmWasm escrows have no HASH160, so a UTXO-sourced hashlock cannot be enforced
    let request = SwapRequest::new(
        ChainId::from(568),
        ChainId::from("osmosis-1"),
        U256::from(1_000_000u64),
        "DOGE",
        "uosmo",
        Party::new("alice", ALICE_DOGE, "osmo1alice"),
        Party::new("bob", BOB_DOGE, "osmo1bob"),
    );
    let err = net.coordinator.initiate(request).await.unwrap_err();
    assert!(matches!(err.source, Error::UnsupportedChainFamily(_)));
    assert_eq!(err.recovery(), Recovery::Abandon);
    assert!(net.coordinator.get_swap(&err.swap_id).await.is_err());
}

#[tokio::test]
async fn abandonment_before_destination_funding() {
    let net = network();
    let record = net.coordinator.initiate(polygon_to_osmosis()).await.unwrap();
    net.coordinator.fund_source(&record.id).await.unwrap();

    let early = net.coordinator.refund_source(&record.id).await.unwrap_err();
    assert!(matches!(early.source, Error::TimelockNotYetExpired { .. }));
    assert_eq!(early.recovery(), Recovery::AwaitRefund);

    net.clock.advance(7_200);
    let record = net.coordinator.refund_source(&record.id).await.unwrap();
    assert_eq!(record.state, SwapState::Refunded);
    assert_eq!(record.order.status, OrderStatus::Expired);
    assert_eq!(net.polygon.balance_of(ALICE, &usdc()), U256::from(2_000_000u64));
}

#[tokio::test]
async fn late_destination_claim_falls_back_to_refunds() {
    let net = network();
    let record = net.coordinator.initiate(polygon_to_osmosis()).await.unwrap();
    net.coordinator.fund_source(&record.id).await.unwrap();
    let funded = net.coordinator.fund_destination(&record.id).await.unwrap();

    net.clock.advance(3_600);
    let err = net
        .coordinator
        .claim_destination(&record.id)
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::TimelockExpired { .. }));

    // the chain itself refuses the late claim too
    let deposit = funded.destination_deposit.clone().unwrap();
    let direct = net
        .osmosis
        .claim_with_secret(&deposit, &funded.secret)
        .await
        .unwrap_err();
    assert!(matches!(direct, Error::TimelockExpired { .. }));

    let record = net.coordinator.refund_destination(&record.id).await.unwrap();
    assert_eq!(
        record.destination_deposit.as_ref().map(|d| d.status),
        Some(DepositStatus::Refunded)
    );
    assert_eq!(record.state, SwapState::DestinationFunded);
    assert_eq!(
        net.osmosis.balance_of("osmo1bob", &uosmo()),
        U256::from(2_000_000u64)
    );

    net.clock.advance(3_600);
    let record = net.coordinator.refund_source(&record.id).await.unwrap();
    assert_eq!(record.state, SwapState::Refunded);
    assert_eq!(record.order.status, OrderStatus::Refunded);
    assert!(!record.secret_revealed);
}

#[tokio::test]
async fn wrong_family_hashlock_locks_funds_until_refund() {
    let net = network();
    let secret = generate_secret().unwrap();

    // hashed with the destination family but funded on an EVM escrow
    let wrong = commit(&secret, ChainFamily::Cosmos);
    let deposit = net
        .polygon
        .create_deposit(DepositRequest {
            depositor: ALICE.to_string(),
            beneficiary: BOB.to_string(),
            token: usdc(),
            amount: U256::from(1_000u64),
            hashlock: wrong,
            commitment_family: ChainFamily::Evm,
            timelock: Timelock::unix(START + 7_200),
        })
        .await
        .unwrap();

    let err = net
        .polygon
        .claim_with_secret(&deposit, &secret)
        .await
        .unwrap_err();
    assert_eq!(err, Error::InvalidSecret);

    net.clock.advance(7_200);
    let receipt = net.polygon.claim_after_timelock(&deposit).await.unwrap();
    assert_eq!(receipt.kind, ClaimKind::Refund);
    assert_eq!(receipt.recipient, ALICE);
}

#[tokio::test]
async fn double_refund_fails_identically() {
    let net = network();
    let record = net.coordinator.initiate(polygon_to_osmosis()).await.unwrap();
    net.coordinator.fund_source(&record.id).await.unwrap();
    net.clock.advance(7_200);
    net.coordinator.refund_source(&record.id).await.unwrap();

    let first = net.coordinator.refund_source(&record.id).await.unwrap_err();
    let second = net.coordinator.refund_source(&record.id).await.unwrap_err();
    assert!(matches!(first.source, Error::DepositSettled(_)));
    assert_eq!(first.source, second.source);
    assert_eq!(net.polygon.balance_of(ALICE, &usdc()), U256::from(2_000_000u64));
}

#[tokio::test]
async fn counterparty_uses_secret_from_destination_chain() {
    let net = network();
    let record = net.coordinator.initiate(polygon_to_osmosis()).await.unwrap();
    net.coordinator.fund_source(&record.id).await.unwrap();
    let record = net.coordinator.fund_destination(&record.id).await.unwrap();

    let deposit = record.destination_deposit.clone().unwrap();
    assert_eq!(net.osmosis.revealed_secret(&deposit).await.unwrap(), None);

    net.coordinator.claim_destination(&record.id).await.unwrap();
    assert_eq!(
        net.osmosis.revealed_secret(&deposit).await.unwrap(),
        Some(record.secret.clone())
    );

    let record = net.coordinator.claim_source(&record.id).await.unwrap();
    assert_eq!(record.state, SwapState::Completed);
}

#[tokio::test(start_paused = true)]
async fn transient_outage_during_claim_is_retried() {
    let net = network();
    let record = net.coordinator.initiate(polygon_to_osmosis()).await.unwrap();
    net.coordinator.fund_source(&record.id).await.unwrap();
    net.coordinator.fund_destination(&record.id).await.unwrap();

    net.osmosis.fail_next(3);
    let record = net.coordinator.claim_destination(&record.id).await.unwrap();
    assert_eq!(record.state, SwapState::DestinationClaimed);
}

#[tokio::test]
async fn distinct_amounts_per_leg() {
    let net = network();
    let request = polygon_to_osmosis().with_destination_amount(U256::from(1_500_000u64));
    let record = net.coordinator.execute_swap(request).await.unwrap();

    assert_eq!(record.state, SwapState::Completed);
    assert_eq!(
        net.osmosis.balance_of("osmo1alice", &uosmo()),
        U256::from(1_500_000u64)
    );
}

#[tokio::test]
async fn expired_order_deadline_is_rejected() {
    let net = network();
    let request = polygon_to_osmosis().with_deadline(START - 1);
    let err = net.coordinator.initiate(request).await.unwrap_err();
    assert!(matches!(err.source, Error::InvalidTerms(_)));
    assert_eq!(err.recovery(), Recovery::Abandon);
}
