//! swap-cli: inspect chains, generate commitments and simulate swaps

mod settings;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::U256;
use htlc_core::{
    commit, generate_secret, ChainFamily, ChainId, ChainInfo, ChainRegistry, Clock, EscrowAdapter,
    InMemoryEscrow, InMemorySwapStore, ManualClock, Party, Secret, SwapCoordinator, SwapRecord,
    SwapRequest, SwapStatus, SystemClock, Token,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use settings::{init_tracing, Settings};

/// HTLC cross-chain swap coordinator
#[derive(Parser, Debug)]
#[command(name = "swap-cli", version)]
#[command(about = "Hash-time-locked cross-chain swaps between EVM, Cosmos and UTXO chains")]
struct Cli {
    /// Configuration file (defaults to ./swap.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known chains, or classify one
    Chains {
        chain: Option<String>,
    },

    /// Generate a fresh secret and its hashlock
    Secret {
        #[arg(long, default_value = "evm")]
        family: ChainFamily,
    },

    /// Compute the hashlock of a hex secret
    Commit {
        secret: String,

        #[arg(long, default_value = "evm")]
        family: ChainFamily,
    },

    /// Run a swap end to end against in-memory chains
    Simulate {
        #[arg(long, default_value = "137")]
        source: String,

        #[arg(long, default_value = "osmosis-1")]
        destination: String,

        #[arg(long, default_value = "1000000", value_parser = parse_amount)]
        amount: U256,

        /// Amount delivered on the destination chain, when it differs
        #[arg(long, value_parser = parse_amount)]
        destination_amount: Option<U256>,

        #[arg(long)]
        source_token: Option<String>,

        #[arg(long)]
        destination_token: Option<String>,

        /// Stop after funding the source and refund once the timelock passes
        #[arg(long)]
        abandon: bool,
    },
}

fn parse_amount(raw: &str) -> std::result::Result<U256, String> {
    U256::from_dec_str(raw).map_err(|e| format!("{}: {}", raw, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&settings.log_level))?;

    let registry = settings.registry();
    match cli.command {
        Command::Chains { chain } => list_chains(&registry, chain.as_deref()),
        Command::Secret { family } => {
            let secret = generate_secret().context("failed to generate secret")?;
            print_json(&serde_json::json!({
                "secret": secret.to_hex(),
                "family": family,
                "hashlock": commit(&secret, family).to_hex(),
            }))
        }
        Command::Commit { secret, family } => {
            let secret = Secret::from_hex(&secret).context("invalid secret")?;
            print_json(&serde_json::json!({
                "family": family,
                "hashlock": commit(&secret, family).to_hex(),
            }))
        }
        Command::Simulate {
            source,
            destination,
            amount,
            destination_amount,
            source_token,
            destination_token,
            abandon,
        } => {
            let plan = SimulationPlan {
                source: ChainId::parse(&source),
                destination: ChainId::parse(&destination),
                amount,
                destination_amount,
                source_token,
                destination_token,
                abandon,
            };
            let record = simulate(&settings, registry, plan).await?;
            print_json(&SwapStatus::from(&record))?;
            print_json(&record.log)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_chains(registry: &ChainRegistry, chain: Option<&str>) -> Result<()> {
    if let Some(raw) = chain {
        let info = registry.info(&ChainId::parse(raw))?;
        return print_json(info);
    }

    let mut chains: Vec<_> = registry.iter().collect();
    chains.sort_by_key(|info| (info.family.name(), info.chain_id.to_string()));
    for info in chains {
        println!(
            "{:<14} {:<7} {:<18} block {}s",
            info.chain_id.to_string(),
            info.family,
            info.name,
            info.block_time_secs
        );
    }
    Ok(())
}

struct SimulationPlan {
    source: ChainId,
    destination: ChainId,
    amount: U256,
    destination_amount: Option<U256>,
    source_token: Option<String>,
    destination_token: Option<String>,
    abandon: bool,
}

/// Sample party with addresses in each chain's format
fn party(label: &str, source: &ChainInfo, destination: &ChainInfo) -> Party {
    Party::new(
        label,
        sample_address(label, source),
        sample_address(label, destination),
    )
}

fn sample_address(label: &str, chain: &ChainInfo) -> String {
    let seed = label.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    match chain.family {
        ChainFamily::Evm => format!("0x{}", hex_byte(seed).repeat(20)),
        ChainFamily::Cosmos => format!(
            "{}1{}",
            chain.address_prefix.as_deref().unwrap_or("cosmos"),
            label
        ),
        ChainFamily::Utxo => format!("02{}", hex_byte(seed).repeat(32)),
    }
}

fn hex_byte(byte: u8) -> String {
    format!("{:02x}", byte)
}

fn default_token(family: ChainFamily) -> &'static str {
    match family {
        ChainFamily::Evm => "0x2791bca1f2de4661ed88a30c99a7a9449aa84174",
        ChainFamily::Cosmos => "uatom",
        ChainFamily::Utxo => "DOGE",
    }
}

async fn simulate(
    settings: &Settings,
    registry: ChainRegistry,
    plan: SimulationPlan,
) -> Result<SwapRecord> {
    let source_info = registry.info(&plan.source)?.clone();
    let destination_info = registry.info(&plan.destination)?.clone();
    if source_info.chain_id == destination_info.chain_id {
        bail!("source and destination must differ");
    }

    let clock = ManualClock::new(SystemClock.now());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let source_chain = Arc::new(InMemoryEscrow::new(source_info.clone(), shared.clone()));
    let destination_chain = Arc::new(InMemoryEscrow::new(destination_info.clone(), shared.clone()));

    let alice = party("alice", &source_info, &destination_info);
    let bob = party("bob", &source_info, &destination_info);

    let source_token = plan
        .source_token
        .unwrap_or_else(|| default_token(source_info.family).to_string());
    let destination_token = plan
        .destination_token
        .unwrap_or_else(|| default_token(destination_info.family).to_string());
    let destination_amount = plan.destination_amount.unwrap_or(plan.amount);

    source_chain.fund(
        &alice.source_address,
        &Token::new(plan.source.clone(), source_token.clone()),
        plan.amount,
    );
    destination_chain.fund(
        &bob.destination_address,
        &Token::new(plan.destination.clone(), destination_token.clone()),
        destination_amount,
    );

    let coordinator = SwapCoordinator::new(
        settings.coordinator.clone(),
        registry,
        Arc::new(InMemorySwapStore::new()),
        shared,
    )?
    .with_adapter(source_chain.clone())?
    .with_adapter(destination_chain.clone())?;

    let mut request = SwapRequest::new(
        plan.source,
        plan.destination,
        plan.amount,
        source_token,
        destination_token,
        alice,
        bob,
    );
    if let Some(amount) = plan.destination_amount {
        request = request.with_destination_amount(amount);
    }

    if !plan.abandon {
        let record = coordinator
            .execute_swap(request)
            .await
            .map_err(|e| anyhow!("{} (recovery: {:?})", e, e.recovery()))?;
        info!(swap = %record.id, "Simulated swap completed");
        return Ok(record);
    }

    let record = coordinator.initiate(request).await?;
    coordinator.fund_source(&record.id).await?;
    let deposit = coordinator
        .get_swap(&record.id)
        .await?
        .source_deposit
        .ok_or_else(|| anyhow!("source deposit missing after funding"))?;

    let wait = source_chain.seconds_until(&deposit.timelock).await?;
    info!(swap = %record.id, wait, "Counterparty walked away; waiting out the source timelock");
    clock.advance(wait);

    let record = coordinator.refund_source(&record.id).await?;
    info!(swap = %record.id, state = %record.state, "Source refunded");
    Ok(record)
}
