use std::time::Duration;

use ark_ec::CurveGroup;
use ark_serialize::CanonicalSerialize;
use clap::{Parser, ValueEnum};
use num_bigint::BigUint;
use reshare_orchestrator::backend::{Bls12381, Curve, Ed25519, ResharingSetup, Secp256k1};
use reshare_orchestrator::{
    DeliveryPolicy, Orchestrator, PartyId, PeerGroup, ReshareError, ResharingParameters,
    RunConfig,
};

#[derive(Parser, Debug)]
#[command(
    about = "Reshare an imported secret to a fresh committee, all in one process",
    author,
    version
)]
struct Cli {
    /// Curve the secret lives on
    #[arg(long = "curve", value_enum, default_value = "secp256k1")]
    curve: CurveArg,

    /// Secret held by the importer, in hex
    #[arg(long = "secret", default_value = "ff")]
    secret: String,

    /// Size of the new committee
    #[arg(long = "parties", default_value_t = 3)]
    parties: usize,

    /// Threshold of the new committee (must be below parties)
    #[arg(long = "threshold", default_value_t = 2)]
    threshold: usize,

    /// Overall run deadline in seconds
    #[arg(long = "timeout-secs", default_value_t = 60)]
    timeout_secs: u64,

    /// Capacity of the shared outbound stream
    #[arg(long = "outbound-capacity", default_value_t = 10)]
    outbound_capacity: usize,

    /// Fail on the first undeliverable message
    #[arg(long = "fail-fast", default_value_t = false)]
    fail_fast: bool,

    /// Derive all per-party randomness from this seed (reproducible runs)
    #[arg(long = "seed")]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CurveArg {
    Secp256k1,
    Ed25519,
    Bls12381,
}

impl From<CurveArg> for Curve {
    fn from(value: CurveArg) -> Self {
        match value {
            CurveArg::Secp256k1 => Curve::Secp256k1,
            CurveArg::Ed25519 => Curve::Ed25519,
            CurveArg::Bls12381 => Curve::Bls12381,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Resharing FAILED: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ReshareError> {
    let secret = parse_secret(&cli.secret)?;

    let importer = PartyId::new("importer", "Importer", 0)?;
    let signers = (1..=cli.parties as u64)
        .map(|i| PartyId::new(format!("signer{i}"), format!("Signer{i}"), i))
        .collect::<Result<Vec<_>, _>>()?;
    let params = ResharingParameters::new(
        PeerGroup::new(vec![importer])?,
        PeerGroup::new(signers)?,
        0,
        cli.threshold,
    )?;

    let policy = if cli.fail_fast {
        DeliveryPolicy::FailFast
    } else {
        DeliveryPolicy::BestEffort
    };
    let config = RunConfig::default()
        .with_run_timeout(Duration::from_secs(cli.timeout_secs))
        .with_outbound_capacity(cli.outbound_capacity)
        .with_delivery_policy(policy);

    let curve = Curve::from(cli.curve);
    println!(
        "Resharing {:#x} on {} to {} parties (threshold {})",
        secret, curve, cli.parties, cli.threshold
    );

    match curve {
        Curve::Secp256k1 => run_curve::<Secp256k1>(params, config, &secret, cli.seed).await,
        Curve::Ed25519 => run_curve::<Ed25519>(params, config, &secret, cli.seed).await,
        Curve::Bls12381 => run_curve::<Bls12381>(params, config, &secret, cli.seed).await,
    }
}

async fn run_curve<G: CurveGroup>(
    params: ResharingParameters,
    config: RunConfig,
    secret: &BigUint,
    seed: Option<u64>,
) -> Result<(), ReshareError> {
    let mut setup = ResharingSetup::<G>::new(params.clone(), secret)?;
    if let Some(seed) = seed {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&seed.to_le_bytes());
        setup = setup.with_seed(bytes);
    }

    let mut orchestrator = Orchestrator::new(params, config, setup);
    let report = orchestrator.run(secret).await?;

    for (i, (party, share)) in report.results.iter().enumerate() {
        let mut point = Vec::new();
        if let Some(x) = share.big_xj().get(i) {
            x.serialize_compressed(&mut point)
                .map_err(|e| ReshareError::Task(e.to_string()))?;
        }
        println!(
            "  {} (index {}): public share {}",
            party,
            party.key(),
            hex::encode(point)
        );
    }
    if !report.delivery_failures.is_empty() {
        println!("  {} message(s) could not be delivered", report.delivery_failures.len());
    }
    println!(
        "Resharing PASSED: {} shares recompose {:#x} ({} envelopes routed in {:?})",
        report.results.len(),
        report.reconstructed,
        report.router.envelopes,
        report.elapsed
    );
    Ok(())
}

fn parse_secret(input: &str) -> Result<BigUint, ReshareError> {
    let digits = input.trim().trim_start_matches("0x");
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| ReshareError::Config(format!("secret is not valid hex: {input}")))
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .try_init();
    });
}
