use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rec_order::config::{ClientConfig, LedgerConfig};
use rec_order::repository::SledStore;
use rec_order::{Contract, Invocation, LedgerError, Response};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rec-order")]
#[command(about = "Drive the receivable factoring contract against a local ledger")]
struct Cli {
    /// Configuration file (defaults to ./rec-order.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the configured accounts
    Init,
    /// Submit one transaction as the given identity
    Invoke {
        /// Authenticated identity submitting the transaction
        #[arg(long = "as")]
        actor: String,
        /// Transaction name, e.g. CreateRecOrder
        name: String,
        /// Positional transaction arguments
        args: Vec<String>,
    },
    /// Run the full factoring workflow with the seeded accounts
    Demo,
}

/// Resubmits on version conflicts with exponential backoff; other failures surface at once.
fn submit(
    contract: &Contract,
    policy: &ClientConfig,
    actor: &str,
    invocation: Invocation,
) -> Result<Response, LedgerError> {
    let mut delay = Duration::from_millis(policy.backoff_ms);
    let mut attempt = 1;
    loop {
        match contract.invoke(actor, invocation.clone()) {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                warn!(attempt, error = %e, "retrying after conflict");
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

fn print(label: &str, response: &Response) -> Result<()> {
    println!("{label}");
    println!("{}", response.to_json()?);
    println!("{}", "=".repeat(72));
    Ok(())
}

fn run_demo(contract: &Contract, policy: &ClientConfig) -> Result<()> {
    let company = "user1";
    let first_supplier = "user2";
    let second_supplier = "user3";
    let financial = "user4";

    submit(contract, policy, company, Invocation::InitLedger)?;
    for query in [
        Invocation::QueryAllUsers,
        Invocation::QueryUser(company.into()),
        Invocation::QueryAllRecOrders,
        Invocation::QueryAllReceivables,
    ] {
        let label = query.name();
        let response = submit(contract, policy, company, query)?;
        print(label, &response)?;
    }

    let order = submit(
        contract,
        policy,
        company,
        Invocation::CreateRecOrder {
            company: company.into(),
            supplier: first_supplier.into(),
            amount: 500_000,
        },
    )?;
    print("The company is creating a receivable order...", &order)?;
    let order = order
        .into_order()
        .context("CreateRecOrder did not return an order")?;

    // signing yields the receivable number every later step needs
    let rec = submit(
        contract,
        policy,
        first_supplier,
        Invocation::SignReceivable {
            supplier: first_supplier.into(),
            order_no: order.order_no.clone(),
            amount: 499_999,
        },
    )?;
    print("The first supplier is signing the receivable order...", &rec)?;
    let rec = rec
        .into_receivable()
        .context("SignReceivable did not return a receivable")?;

    let workflow = [
        (
            "The company is accepting the receivable...",
            company,
            Invocation::AcceptReceivable {
                company: company.into(),
                receivable_no: rec.receivable_no.clone(),
            },
        ),
        (
            "The first supplier is transferring the receivable...",
            first_supplier,
            Invocation::TransferReceivable {
                from: first_supplier.into(),
                to: second_supplier.into(),
                receivable_no: rec.receivable_no.clone(),
            },
        ),
        (
            "The second supplier is applying for a discount from the financial...",
            second_supplier,
            Invocation::ApplyDiscount {
                holder: second_supplier.into(),
                financial: financial.into(),
                receivable_no: rec.receivable_no.clone(),
            },
        ),
        (
            "The financial is confirming the discount application...",
            financial,
            Invocation::DiscountConfirm {
                financial: financial.into(),
                order_no: order.order_no.clone(),
            },
        ),
        (
            "The company is paying the receivable...",
            company,
            Invocation::Redeemed {
                company: company.into(),
                order_no: order.order_no.clone(),
            },
        ),
    ];

    for (label, actor, invocation) in workflow {
        let response = submit(contract, policy, actor, invocation)?;
        print(label, &response)?;
    }

    let settled = contract.query().receivable(&rec.receivable_no)?;
    info!(
        receivable = %settled.receivable_no,
        status = %settled.status(),
        verified = settled.verify_history()?,
        "workflow finished"
    );
    for line in settled.view_history() {
        println!("{line}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LedgerConfig::load(cli.config.as_deref())?;
    rec_order::telemetry::init(&config.observability)?;

    let path = &config.storage.path;
    let store = SledStore::open(path).with_context(|| format!("failed to open ledger at {path}"))?;
    let contract = Contract::new(Arc::new(store), config.contract.clone());

    match cli.command {
        Commands::Init => {
            submit(&contract, &config.client, "", Invocation::InitLedger)?;
            info!(path = %path, "ledger initialized");
        }
        Commands::Invoke { actor, name, args } => {
            let invocation = Invocation::parse(&name, &args)?;
            let response = submit(&contract, &config.client, &actor, invocation)?;
            println!("{}", response.to_json()?);
        }
        Commands::Demo => run_demo(&contract, &config.client)?,
    }

    Ok(())
}
