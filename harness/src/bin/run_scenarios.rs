use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use field_math::FieldElement;
use mpc_auction::{preprocess_output_masks, preprocess_random_bit_sharings, validate_bid_vector, BitPool, Party};
use mpc_consensus::{DelayModel, Network, OmissionPolicy, PartyId, RandomnessBeacon};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

const N: usize = 4;
const F: usize = 1;
const DEFAULT_BIT_WIDTH: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "harness", about = "Runs the second-price auction MPC core against scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run a scenario, either a named seed scenario or an ad hoc bid vector.
    Run {
        /// Name of a seed scenario (seed1..seed5); mutually exclusive with --bids.
        #[arg(long)]
        scenario: Option<String>,

        /// Comma-separated bid vector for an ad hoc run, e.g. 5,20,13,7.
        #[arg(long, value_delimiter = ',')]
        bids: Option<Vec<u64>>,

        /// Party id (1-4) that omits its bid entirely, if any.
        #[arg(long)]
        omit: Option<PartyId>,

        /// PRNG seed for the network, beacon, and preprocessing.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Bit width K for bids, drawn from [0, 2^K). Ignored for named seed scenarios.
        #[arg(long, default_value_t = DEFAULT_BIT_WIDTH)]
        bit_width: usize,

        #[arg(long, value_enum, default_value_t = DelayKind::Fixed)]
        network_delay: DelayKind,

        /// Log level, falls back to RUST_LOG if unset.
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DelayKind {
    Fixed,
    Uniform,
    Exponential,
}

impl DelayKind {
    fn into_model(self) -> DelayModel {
        match self {
            DelayKind::Fixed => DelayModel::Fixed(Duration::from_millis(1)),
            DelayKind::Uniform => DelayModel::Uniform { min: Duration::from_millis(1), max: Duration::from_millis(5) },
            DelayKind::Exponential => DelayModel::Exponential { mean: Duration::from_millis(2) },
        }
    }
}

/// A fully-resolved run configuration, built either from a seed scenario
/// name or from ad hoc CLI flags (§6C).
struct ScenarioConfig {
    name: String,
    bids: Vec<u64>,
    omitter: Option<PartyId>,
    seed: u64,
    delay: DelayModel,
    bit_width: usize,
}

impl ScenarioConfig {
    fn seed(name: &str) -> Option<Self> {
        let (bids, omitter): (Vec<u64>, Option<PartyId>) = match name {
            "seed1" => (vec![5, 20, 13, 7], None),
            "seed2" => (vec![5, 20, 13, 7], Some(4)),
            "seed3" => (vec![5, 20, 13, 7], Some(2)),
            "seed4" => (vec![0, 1, 30, 31], None),
            "seed5" => (vec![10, 11, 12, 13], None),
            _ => return None,
        };
        Some(ScenarioConfig {
            name: name.to_string(),
            bids,
            omitter,
            seed: 42,
            delay: DelayModel::Fixed(Duration::ZERO),
            bit_width: DEFAULT_BIT_WIDTH,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Command::Run { scenario, bids, omit, seed, bit_width, network_delay, log_level } = cli.command;

    let filter = log_level
        .map(tracing_subscriber::EnvFilter::new)
        .unwrap_or_else(tracing_subscriber::EnvFilter::from_default_env);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match (scenario, bids) {
        (Some(name), None) => ScenarioConfig::seed(&name).with_context(|| format!("unknown scenario {name}"))?,
        (None, Some(bid_vec)) => {
            if bid_vec.len() != N {
                bail!("--bids must supply exactly {N} values, got {}", bid_vec.len());
            }
            ScenarioConfig {
                name: "ad-hoc".to_string(),
                bids: bid_vec,
                omitter: omit,
                seed,
                delay: network_delay.into_model(),
                bit_width,
            }
        }
        (Some(_), Some(_)) => bail!("--scenario and --bids are mutually exclusive"),
        (None, None) => bail!("one of --scenario or --bids is required"),
    };

    validate_bid_vector(&config.bids, config.bit_width).context("invalid bid vector")?;
    run_scenario(config).await
}

async fn run_scenario(config: ScenarioConfig) -> Result<()> {
    tracing::info!(scenario = %config.name, bids = ?config.bids, omitter = ?config.omitter, "starting run");

    let omission = match config.omitter {
        Some(party) => OmissionPolicy::DropAll { party, direction: mpc_consensus::Direction::Send },
        None => OmissionPolicy::None,
    };

    let network = Network::new(N as PartyId, config.delay, omission, ChaCha20Rng::seed_from_u64(config.seed));
    let beacon = RandomnessBeacon::new(F + 1, ChaCha20Rng::seed_from_u64(config.seed.wrapping_add(1)));

    let parties: Vec<PartyId> = (1..=N as PartyId).collect();
    let mut preprocess_rng = ChaCha20Rng::seed_from_u64(config.seed.wrapping_add(2));
    let bit_columns = preprocess_random_bit_sharings(config.bit_width * N, &parties, F, &mut preprocess_rng);
    let mask_columns = preprocess_output_masks(&parties, F, &mut preprocess_rng);

    let handles: Vec<_> = parties
        .iter()
        .map(|&party_id| {
            let party = Party::new(
                party_id,
                N,
                F,
                config.bit_width,
                network.clone(),
                beacon.clone(),
                ChaCha20Rng::seed_from_u64(config.seed.wrapping_add(100 + party_id as u64)),
            );
            let bid = FieldElement::from_u64(config.bids[party_id as usize - 1]);
            let pool = BitPool::new(bit_columns[&party_id].clone());
            let mask_shares: HashMap<PartyId, FieldElement> =
                mask_columns.iter().map(|(&owner, shares)| (owner, shares[&party_id])).collect();
            tokio::spawn(async move { (party_id, party.run(bid, pool, mask_shares).await) })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        let (party_id, outcome) = handle.await.context("party task panicked")?;
        results.push((party_id, outcome?));
    }
    results.sort_by_key(|(p, _)| *p);

    println!("scenario: {}", config.name);
    for (party_id, outcome) in &results {
        match outcome {
            Some(price) => println!("  party {party_id}: {}", price.to_u128()),
            None => println!("  party {party_id}: excluded from active set"),
        }
    }

    let metrics = &network.metrics;
    println!(
        "network: sent={} dropped={} elapsed={:?}",
        metrics.messages_sent.load(std::sync::atomic::Ordering::Relaxed),
        metrics.messages_dropped.load(std::sync::atomic::Ordering::Relaxed),
        metrics.elapsed().await,
    );

    Ok(())
}
