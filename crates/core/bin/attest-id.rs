use std::path::PathBuf;

use alloy::primitives::{Address, B256};
use attest_id_core::{
    AttestationResolver,
    Config,
    Environment,
    RequestEncoding,
    RequestGateway,
    primitives::{CircuitInputs, CircuitKind, IdentityBinding, ProofRequest, now_millis},
};
use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Context as _, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "attest-id", about = "Inspect and build attestation-bound proof requests")]
struct Args {
    /// JSON configuration file. Built-in defaults for `--environment` are used when absent.
    #[arg(long, env = "ATTEST_ID_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment environment.
    #[arg(long, env = "ATTEST_ID_ENVIRONMENT", default_value = "mainnet")]
    environment: Environment,

    /// Override the RPC mirrors (comma separated).
    #[arg(long, env = "ATTEST_ID_RPC_URLS", value_delimiter = ',')]
    rpc_urls: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and validate a proof request URL.
    Parse {
        /// The `<scheme>://proof-request?...` URL.
        url: String,
    },
    /// Derive the signal hash, scope and nullifier for a wallet.
    Nullifier {
        #[arg(long)]
        wallet: Address,
        #[arg(long)]
        scope: String,
        #[arg(long, default_value = "coinbase_attestation")]
        circuit: CircuitKind,
        /// Use this signal hash instead of deriving one.
        #[arg(long)]
        signal_hash: Option<B256>,
    },
    /// Find the attestation transaction that qualifies a wallet for a circuit.
    Resolve {
        #[arg(long)]
        wallet: Address,
        #[arg(long, default_value = "coinbase_attestation")]
        circuit: CircuitKind,
    },
    /// Build a proof request URL.
    Request {
        #[arg(long, default_value = "coinbase_attestation")]
        circuit: CircuitKind,
        #[arg(long)]
        scope: String,
        #[arg(long)]
        callback_url: String,
        /// Country codes for the country circuit (comma separated).
        #[arg(long, value_delimiter = ',')]
        countries: Vec<String>,
        /// Prove membership instead of non-membership of `--countries`.
        #[arg(long)]
        included: bool,
        /// Minimum age for the age threshold circuit.
        #[arg(long)]
        min_age: Option<u64>,
        /// Year the age is evaluated in for the age threshold circuit.
        #[arg(long)]
        reference_year: Option<u64>,
        #[arg(long)]
        dapp_name: Option<String>,
        #[arg(long)]
        message: Option<String>,
        /// Lifetime of the request in seconds.
        #[arg(long)]
        ttl_secs: Option<u64>,
        #[arg(long, value_enum, default_value_t = Encoding::Data)]
        encoding: Encoding,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Encoding {
    Data,
    Params,
}

impl From<Encoding> for RequestEncoding {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Data => Self::Data,
            Encoding::Params => Self::Params,
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .wrap_err_with(|| format!("failed to load config from {}", path.display()))?,
        None => Config::for_environment(args.environment),
    };
    if args.rpc_urls.is_empty() {
        Ok(config)
    } else {
        Ok(config.with_rpc_urls(args.rpc_urls.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    config.validate()?;
    let gateway = RequestGateway::from_config(&config);

    match args.command {
        Command::Parse { url } => {
            let Some(request) = gateway.parse(&url) else {
                eyre::bail!("not a valid proof request URL");
            };
            let outcome = gateway.validation_outcome(&request, now_millis());
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "request": request,
                    "validation": outcome,
                }))?
            );
        }
        Command::Nullifier {
            wallet,
            scope,
            circuit,
            signal_hash,
        } => {
            let binding = IdentityBinding::derive(wallet, &scope, circuit, signal_hash);
            println!("{}", serde_json::to_string_pretty(&binding)?);
        }
        Command::Resolve { wallet, circuit } => {
            let resolver = AttestationResolver::from_config(&config, &reqwest::Client::new())?;
            match resolver.find(wallet, circuit).await? {
                Some(resolved) => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "attestationId": resolved.record.id,
                        "txHash": resolved.record.tx_hash,
                        "signer": resolved.signer,
                        "signerIndex": resolved.signer_index,
                        "rawTransaction": resolved.transaction.raw,
                    }))?
                ),
                None => eyre::bail!("no valid {circuit} attestation found for {wallet}"),
            }
        }
        Command::Request {
            circuit,
            scope,
            callback_url,
            countries,
            included,
            min_age,
            reference_year,
            dapp_name,
            message,
            ttl_secs,
            encoding,
        } => {
            let created_at = now_millis();
            let is_country = circuit == CircuitKind::CoinbaseCountry;
            let is_age = circuit == CircuitKind::AgeThreshold;
            let request = ProofRequest {
                request_id: uuid::Uuid::new_v4().to_string(),
                circuit: circuit.to_string(),
                inputs: CircuitInputs {
                    scope,
                    country_list: is_country.then_some(countries),
                    is_included: is_country.then_some(included),
                    min_age: min_age.filter(|_| is_age),
                    reference_year: reference_year.filter(|_| is_age),
                    ..Default::default()
                },
                callback_url,
                message,
                dapp_name,
                dapp_icon: None,
                created_at,
                expires_at: ttl_secs.map(|secs| created_at + secs * 1_000),
            };
            request
                .validate(created_at)
                .wrap_err("request would be rejected")?;
            println!("{}", gateway.build_url(&request, encoding.into())?);
        }
    }

    Ok(())
}
