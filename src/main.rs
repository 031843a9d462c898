use clap::Parser;
use gateway_orchestrator::application::binder::GatewayCatalog;
use gateway_orchestrator::application::engine::PaymentOrchestrator;
use gateway_orchestrator::domain::context::Context;
use gateway_orchestrator::domain::gateway::{CallbackParams, GatewayKind, GatewayRecord};
use gateway_orchestrator::domain::ports::TransactionLedgerBox;
use gateway_orchestrator::infrastructure::currency::IsoCurrencyFormatter;
use gateway_orchestrator::infrastructure::in_memory::{
    InMemoryAccountStore, InMemoryGatewayRegistry, InMemoryLedger, InMemoryOutbox,
};
use gateway_orchestrator::infrastructure::postback::{self, PostbackGateway};
use gateway_orchestrator::interfaces::csv::ledger_writer::LedgerWriter;
use gateway_orchestrator::interfaces::csv::notification_reader::NotificationReader;
use miette::{IntoDiagnostic, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Replays recorded gateway notifications into a ledger and prints it as CSV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input notifications CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Company the notifications belong to.
    #[arg(long, default_value_t = 1)]
    company_id: u32,

    /// Gateway name used for rows that leave the gateway column empty.
    #[arg(long, default_value = postback::CLASS)]
    gateway: String,
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<TransactionLedgerBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            use gateway_orchestrator::infrastructure::rocksdb::RocksDBLedger;
            let ledger = RocksDBLedger::open(path).into_diagnostic()?;
            Ok(Box::new(ledger))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory ledger."
            );
            Ok(Box::new(InMemoryLedger::new()))
        }
        None => Ok(Box::new(InMemoryLedger::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::new(cli.company_id);

    let registry = InMemoryGatewayRegistry::new();
    registry
        .install(GatewayRecord {
            id: 1,
            company_id: cli.company_id,
            class: postback::CLASS.to_string(),
            name: cli.gateway.clone(),
            kind: GatewayKind::Nonmerchant,
            currencies: Vec::new(),
            enabled: true,
            meta: BTreeMap::new(),
        })
        .await;
    let catalog = GatewayCatalog::new()
        .with(postback::CLASS, |setup| Box::new(PostbackGateway::new(setup)));

    let orchestrator = PaymentOrchestrator::new(
        Box::new(registry),
        catalog,
        open_ledger(cli.db_path)?,
        Box::new(InMemoryAccountStore::new()),
        Box::new(InMemoryOutbox::new()),
        Box::new(IsoCurrencyFormatter),
    );

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = NotificationReader::new(file);
    let no_query = CallbackParams::new();
    for (row, notification) in reader.notifications().into_diagnostic()?.enumerate() {
        let line = row + 2;
        match notification {
            Ok(notification) => {
                let gateway = notification.gateway.as_deref().unwrap_or(&cli.gateway);
                match orchestrator
                    .process_notification(&ctx, gateway, &no_query, &notification.fields)
                    .await
                {
                    Ok(Some(result)) if !result.gateway_errors.is_empty() => {
                        eprintln!(
                            "Notification on line {line} recorded with errors: {}",
                            result.gateway_errors
                        );
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("Error processing notification on line {line}: {e}"),
                }
            }
            Err(e) => eprintln!("Error reading notification on line {line}: {e}"),
        }
    }

    let transactions = orchestrator.into_results().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = LedgerWriter::new(stdout.lock());
    writer.write_transactions(transactions).into_diagnostic()?;

    Ok(())
}
