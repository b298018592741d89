use alloy_primitives::utils::format_units;
use carbon_forest_client::{
    ChainProvider, Config, ConnectionManager, ConnectionSnapshot, EventManager, HistoryOptions,
    LedgerEntry, ProviderSource, RpcWalletProvider, TransactionHistory, WalletEventHandler,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check node connectivity and configuration
    Check,
    /// Print token balances for the restored session account
    Balances,
    /// Print the reconciled transaction history
    History,
    /// Follow live transfers and reprint the ledger as it changes
    Watch,
}

struct PrintHandler;

impl WalletEventHandler for PrintHandler {
    fn on_connection_changed(&self, snapshot: &ConnectionSnapshot) {
        match snapshot.account {
            Some(account) => info!("session: connected as {account}"),
            None => info!("session: disconnected"),
        }
    }

    fn on_ledger_rebuilt(&self, ledger: &[LedgerEntry]) {
        info!("ledger rebuilt ({} entries)", ledger.len());
        for entry in ledger {
            print_entry(entry);
        }
    }

    fn on_action_rejected(&self, message: &str) {
        warn!("wallet action rejected: {message}");
    }
}

fn print_entry(entry: &LedgerEntry) {
    info!(
        "{} {:?} {} {} [{:?}] {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.kind,
        entry.amount,
        entry.token,
        entry.status,
        entry.description
    );
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::from_env()?;
    config.validate()?;
    info!("🌲 Carbon Forest wallet service");
    info!(
        "network: {} (chain {})",
        config.network.name, config.network.chain_id
    );

    let provider = RpcWalletProvider::connect_http(config.network.rpc_url.clone(), &config.history);
    let connection = Arc::new(ConnectionManager::new(
        ProviderSource::injected(provider.clone()),
        config.contracts.clone(),
    ));

    match args.command {
        Commands::Check => {
            let head = provider.block_number().await?;
            info!("✅ node reachable, head at block {head}");
            info!("forest token:  {}", config.contracts.forest_token);
            info!("carbon credit: {}", config.contracts.carbon_credit);
            info!("stablecoin:    {}", config.contracts.stablecoin);
            info!("marketplace:   {}", config.contracts.marketplace);
        }
        Commands::Balances => {
            let account = restore_session(&connection).await?;
            let (_, bindings) = connection
                .session()
                .ok_or_else(|| eyre::eyre!("no usable session"))?;
            let stable = bindings.stablecoin.balance_of(account).await?;
            let credits = bindings.carbon_credit.balance_of(account).await?;
            let parcels = bindings.forest_token.balance_of(account).await?;
            info!("account {account}");
            info!("  CFRST: {}", format_units(stable, 18)?);
            info!("  CC:    {}", format_units(credits, 18)?);
            info!("  parcels: {parcels}");
        }
        Commands::History => {
            restore_session(&connection).await?;
            let history =
                TransactionHistory::new(connection.clone(), HistoryOptions::from_config(&config.history));
            let ledger = history.refresh().await?;
            info!("{} ledger entries", ledger.len());
            for entry in &ledger {
                print_entry(entry);
            }
        }
        Commands::Watch => {
            restore_session(&connection).await?;
            let history = Arc::new(TransactionHistory::new(
                connection.clone(),
                HistoryOptions::from_config(&config.history),
            ));
            let manager = EventManager::new(connection.clone(), history, PrintHandler);
            tokio::select! {
                () = manager.run() => {}
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
    }

    Ok(())
}

async fn restore_session(
    connection: &Arc<ConnectionManager<RpcWalletProvider>>,
) -> eyre::Result<alloy_primitives::Address> {
    match connection.restore().await? {
        Some(account) => {
            info!("✅ restored session for {account}");
            Ok(account)
        }
        None => match connection.connect().await {
            Ok(account) => {
                info!("✅ connected as {account}");
                Ok(account)
            }
            Err(err) => Err(eyre::eyre!("no wallet session available: {err}")),
        },
    }
}
