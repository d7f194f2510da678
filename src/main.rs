use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use umoja_loans::application::lifecycle::LoanLifecycle;
use umoja_loans::application::workflow::{RetryPolicy, WorkflowOrchestrator};
use umoja_loans::config::AppConfig;
use umoja_loans::domain::ports::{LedgerStoreRef, PaymentGatewayRef, SmsNotifierRef};
use umoja_loans::infrastructure::daraja::DarajaGateway;
use umoja_loans::infrastructure::in_memory::InMemoryLedgerStore;
use umoja_loans::infrastructure::sms::TracingSmsNotifier;
use umoja_loans::interfaces::ussd::{UssdMenu, UssdRequest};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a config file (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subscriber phone number driving the interactive session.
    #[arg(long, default_value = "254700000001")]
    phone: String,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn build_store(cli: &Cli) -> Result<LedgerStoreRef> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &cli.db_path {
        let store =
            umoja_loans::infrastructure::rocksdb::RocksDbLedgerStore::open(db_path)
                .into_diagnostic()?;
        return Ok(Arc::new(store));
    }
    let _ = cli;
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

/// Interactive session driver: plays the role of the telephony gateway,
/// round-tripping the `*`-delimited path and printing CON/END replies.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref().and_then(|p| p.to_str()))
        .into_diagnostic()?;

    let store = build_store(&cli)?;
    let lifecycle = Arc::new(LoanLifecycle::new(
        store.clone(),
        config.interest_rate,
        config.gateway.country_prefix.clone(),
    ));
    let gateway: PaymentGatewayRef =
        Arc::new(DarajaGateway::new(config.gateway.clone()).into_diagnostic()?);
    let notifier: SmsNotifierRef = Arc::new(TracingSmsNotifier::new());
    let workflow = Arc::new(WorkflowOrchestrator::new(
        store,
        lifecycle.clone(),
        gateway,
        notifier,
        RetryPolicy::default(),
    ));
    let menu = UssdMenu::new(lifecycle, workflow);

    let mut session = 1u64;
    let mut text = String::new();
    let request = |session: u64, text: &str| UssdRequest {
        session_id: format!("local-{session}"),
        service_code: "*384#".to_string(),
        phone_number: cli.phone.clone(),
        text: text.to_string(),
    };

    println!("{}", menu.respond(&request(session, "")).await.render());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.into_diagnostic()?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" {
            break;
        }

        text = if text.is_empty() {
            input.to_string()
        } else {
            format!("{text}*{input}")
        };
        let response = menu.respond(&request(session, &text)).await;
        println!("{}", response.render());

        if response.terminal {
            // Fresh session, like a redial.
            session += 1;
            text.clear();
            println!("{}", menu.respond(&request(session, "")).await.render());
        }
    }

    Ok(())
}
