//! Rust replacement for the operator scripts a Saturn deployment needs
//! outside the HTTP surface: seeding a demo account, printing the
//! service/capability registry, and issuing a manual ledger credit.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use saturn_capabilities::{CapabilityRegistry, CapabilityState, ProviderEntry};
use saturn_core::{AgentRole, Currency, generate_api_key};
use saturn_gateway::config::Config;
use saturn_gateway::domain::{DomainState, DomainStore};
use saturn_ledger::{Ledger, LedgerState};
use saturn_store::SnapshotStore;
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "saturn-gatewayctl")]
#[command(about = "Operator commands for a Saturn gateway deployment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "seed-demo")]
    SeedDemo(SeedDemoArgs),
    #[command(name = "registry")]
    Registry,
    #[command(name = "credit")]
    Credit(CreditArgs),
}

#[derive(Args)]
struct SeedDemoArgs {
    #[arg(long, default_value = "demo@saturn.local")]
    email: String,
    #[arg(long, default_value = "saturn-demo-password")]
    password: String,
    #[arg(long, default_value_t = 100_000)]
    initial_credit_sats: u64,
}

#[derive(Args)]
struct CreditArgs {
    /// Wallet id to credit, e.g. wal_xxx.
    wallet_id: String,
    #[arg(long)]
    amount_sats: Option<u64>,
    #[arg(long)]
    amount_usd_cents: Option<u64>,
    #[arg(long, default_value = "manual_credit")]
    reference_type: String,
    #[arg(long)]
    reference_id: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        tracing::error!(target: "saturn.gatewayctl", %error, "command failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::SeedDemo(args) => run_seed_demo(&config, args).await,
        Commands::Registry => run_registry(&config).await,
        Commands::Credit(args) => run_credit(&config, args).await,
    }
}

fn domain_store(config: &Config) -> DomainStore {
    let store: SnapshotStore<DomainState> = SnapshotStore::new(config.domain_store_path());
    DomainStore::new(store)
}

fn ledger(config: &Config) -> Ledger {
    let store: SnapshotStore<LedgerState> = SnapshotStore::new(config.ledger_store_path());
    Ledger::new(store)
}

async fn run_seed_demo(config: &Config, args: SeedDemoArgs) -> Result<()> {
    let domain = domain_store(config);
    let ledger = ledger(config);

    let account_id = saturn_core::AccountId::generate();
    let wallet = ledger
        .create_wallet(account_id.clone())
        .await
        .context("failed to create demo wallet")?;

    let account = domain
        .create_account(
            account_id,
            args.email.clone(),
            args.password,
            Currency::Sats,
            wallet.id.clone(),
        )
        .await
        .context("failed to create demo account")?;

    let raw_key = generate_api_key();
    let api_key_hash = saturn_auth::hash_api_key(&raw_key).context("failed to hash demo api key")?;
    let api_key_prefix = saturn_auth::api_key_prefix_bucket(&raw_key);

    let agent = domain
        .create_agent(
            account.account.id.clone(),
            "primary".to_string(),
            AgentRole::Primary,
            api_key_hash,
            api_key_prefix,
        )
        .await
        .context("failed to create demo primary agent")?;

    if args.initial_credit_sats > 0 {
        ledger
            .credit(
                &wallet.id,
                Currency::Sats,
                args.initial_credit_sats,
                "manual_credit",
                "seed-demo",
                None,
                None,
            )
            .await
            .context("failed to apply demo initial credit")?;
    }

    print_json(&json!({
        "account_id": account.account.id.to_string(),
        "agent_id": agent.id.to_string(),
        "wallet_id": wallet.id.to_string(),
        "api_key": raw_key,
        "email": args.email,
    }))
}

async fn run_registry(config: &Config) -> Result<()> {
    let domain = domain_store(config);
    let capability_store: SnapshotStore<CapabilityState> =
        SnapshotStore::new(config.capability_store_path());
    let capabilities = CapabilityRegistry::new(capability_store);

    let services = domain.services().await;
    let mut capability_rows = Vec::new();
    for capability in capabilities.capabilities().await {
        let providers: Vec<Value> = capabilities
            .providers_for(&capability)
            .await
            .into_iter()
            .map(|entry: ProviderEntry| {
                json!({
                    "service_slug": entry.service_slug,
                    "priority": entry.priority,
                    "active": entry.active,
                })
            })
            .collect();
        capability_rows.push(json!({ "capability": capability, "providers": providers }));
    }

    print_json(&json!({
        "services": services.iter().map(|service| json!({
            "slug": service.slug,
            "name": service.name,
            "base_url": service.base_url,
        })).collect::<Vec<_>>(),
        "capabilities": capability_rows,
    }))
}

async fn run_credit(config: &Config, args: CreditArgs) -> Result<()> {
    let wallet_id = saturn_core::WalletId::from(args.wallet_id.as_str());
    let ledger = ledger(config);

    let (currency, amount) = match (args.amount_sats, args.amount_usd_cents) {
        (Some(sats), None) => (Currency::Sats, sats),
        (None, Some(cents)) => (Currency::UsdCents, cents),
        _ => bail!("pass exactly one of --amount-sats or --amount-usd-cents"),
    };

    let reference_id = args
        .reference_id
        .unwrap_or_else(|| saturn_core::generate_id("opscredit"));

    let transaction = ledger
        .credit(
            &wallet_id,
            currency,
            amount,
            &args.reference_type,
            &reference_id,
            None,
            None,
        )
        .await
        .context("failed to apply manual credit")?;

    print_json(&json!({
        "transaction_id": transaction.id.to_string(),
        "wallet_id": wallet_id.to_string(),
        "balance_after_sats": transaction.balance_after_sats,
        "balance_after_usd_cents": transaction.balance_after_usd_cents,
    }))
}

#[allow(clippy::print_stdout)]
fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
