//! Hedge Desk - Main Entry Point
//!
//! Operator CLI for multi-account delta-neutral hedge trades: draft orders,
//! open/close them across accounts, inspect reconciled state, and plan
//! rotation groups.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hedge_desk::account::{Account, AccountRegistry};
use hedge_desk::config::Config;
use hedge_desk::exchange::{BinanceGateway, ExchangeGateway, MockGateway};
use hedge_desk::hedge::{
    HedgeOrchestrator, HedgeOrder, HedgeOrderStore, HedgeStatus, RotationEngine,
};
use hedge_desk::market::{PrecisionTable, PriceBook, PriceFeed};
use hedge_desk::persistence::SqliteStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Hedge Desk CLI
#[derive(Parser)]
#[command(name = "hedge-desk")]
#[command(version, about = "Multi-account delta-neutral hedge trading on Binance Futures")]
struct Cli {
    /// Use the simulated gateway instead of the live venue
    #[arg(long, global = true)]
    paper: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a draft hedge order
    Draft {
        /// Futures symbol (e.g. BTCUSDT)
        #[arg(short, long)]
        symbol: String,

        /// Primary account name
        #[arg(short, long)]
        primary: String,

        /// Hedge account name (repeat for a second hedge)
        #[arg(short = 'H', long = "hedge")]
        hedges: Vec<String>,

        /// Base-asset size of the primary leg
        #[arg(short, long)]
        amount: Decimal,

        /// Take-profit percentage (must exceed 20)
        #[arg(long, default_value = "60")]
        tp: Decimal,

        /// Stop-loss percentage (must exceed 20)
        #[arg(long, default_value = "60")]
        sl: Decimal,
    },

    /// List all orders with their stored status
    List,

    /// Show one order's reconciled live state and resting triggers
    Status {
        #[arg(short, long)]
        id: u64,
    },

    /// Edit a draft while no live position exists
    Edit {
        #[arg(short, long)]
        id: u64,
        #[arg(short, long)]
        amount: Option<Decimal>,
        #[arg(long)]
        tp: Option<Decimal>,
        #[arg(long)]
        sl: Option<Decimal>,
    },

    /// Execute an opening attempt for a draft order
    Open {
        #[arg(short, long)]
        id: u64,
    },

    /// Execute a closing attempt for an order
    Close {
        #[arg(short, long)]
        id: u64,
    },

    /// Delete an order (open orders must be closed first)
    Delete {
        #[arg(short, long)]
        id: u64,
    },

    /// Plan rotation groups over the configured accounts
    Groups {
        /// Seed for reproducible grouping
        #[arg(long)]
        seed: Option<u64>,

        /// Also create one draft order per group for this symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Primary-leg size for the created drafts
        #[arg(short, long, default_value = "0.01")]
        amount: Decimal,

        /// Take-profit percentage for the created drafts
        #[arg(long, default_value = "60")]
        tp: Decimal,

        /// Stop-loss percentage for the created drafts
        #[arg(long, default_value = "60")]
        sl: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load()?;
    config.validate()?;

    let store = SqliteStore::open(&config.storage.db_path)?;

    match cli.command {
        Commands::Draft {
            symbol,
            primary,
            hedges,
            amount,
            tp,
            sl,
        } => {
            let mut order = HedgeOrder::draft(&symbol, &primary, hedges, amount, tp, sl)?;
            let id = store.insert(&mut order)?;
            println!("Created draft order {id} ({symbol}, primary {primary})");
        }

        Commands::List => {
            for order in store.list()? {
                println!(
                    "#{} {} {} primary={} hedges={} amount={} tp={}% sl={}%",
                    order.id,
                    order.status,
                    order.symbol,
                    order.primary_account,
                    order.hedge_accounts.join(","),
                    order.amount,
                    order.take_profit_pct,
                    order.stop_loss_pct,
                );
            }
        }

        Commands::Status { id } => {
            let order = load_order(&store, id)?;
            let runtime = Runtime::start(&config, &store, cli.paper).await?;

            let derived = runtime.orchestrator.derived_state(&order).await?;
            println!("#{} stored status: {}", order.id, order.status);
            println!(
                "  fully open: {}  fully flat: {}  any leg open: {}",
                derived.is_fully_open, derived.is_fully_flat, derived.any_leg_open
            );

            // Resting TP/SL triggers, read back for display only
            for name in order.participants() {
                let creds = runtime.registry.credentials(name).await?;
                match runtime
                    .gateway
                    .list_open_orders(&creds, &order.symbol)
                    .await
                {
                    Ok(open_orders) => {
                        for resting in open_orders {
                            println!(
                                "  {} resting {:?} {:?} stop={}",
                                name,
                                resting.order_type,
                                resting.side,
                                resting
                                    .stop_price
                                    .map(|p| p.to_string())
                                    .unwrap_or_else(|| "-".to_string()),
                            );
                        }
                    }
                    Err(e) => warn!(account = %name, "Could not read open orders: {e}"),
                }
            }
        }

        Commands::Edit { id, amount, tp, sl } => {
            let mut order = load_order(&store, id)?;
            let runtime = Runtime::start(&config, &store, cli.paper).await?;
            let derived = runtime.orchestrator.derived_state(&order).await?;
            if !order.is_editable(derived.any_leg_open) {
                bail!("order {id} has live exposure or is open; close it before editing");
            }

            if let Some(amount) = amount {
                order.amount = amount;
            }
            if let Some(tp) = tp {
                order.take_profit_pct = tp;
            }
            if let Some(sl) = sl {
                order.stop_loss_pct = sl;
            }
            order.validate()?;
            store.update(&order)?;
            println!("Updated order {id}");
        }

        Commands::Open { id } => {
            let mut order = load_order(&store, id)?;
            let runtime = Runtime::start(&config, &store, cli.paper).await?;
            runtime.await_price(&order.symbol).await?;

            let result = runtime.orchestrator.open(&mut order).await;
            store.update(&order)?;
            store.save_account_stats(&runtime.registry.snapshot().await)?;

            match result {
                Ok(()) => println!("Order {id} open"),
                Err(e) => bail!("opening attempt failed: {e}"),
            }
        }

        Commands::Close { id } => {
            let mut order = load_order(&store, id)?;
            let runtime = Runtime::start(&config, &store, cli.paper).await?;
            runtime.await_price(&order.symbol).await?;

            let result = runtime.orchestrator.close(&mut order).await;
            store.update(&order)?;
            store.save_account_stats(&runtime.registry.snapshot().await)?;

            match result {
                Ok(()) => println!("Order {id} closed"),
                Err(e) => bail!("closing attempt failed: {e}"),
            }
        }

        Commands::Delete { id } => {
            let order = load_order(&store, id)?;
            if order.status == HedgeStatus::Open {
                bail!("order {id} is open; close it before deleting");
            }
            store.delete(id)?;
            println!("Deleted order {id}");
        }

        Commands::Groups {
            seed,
            symbol,
            amount,
            tp,
            sl,
        } => {
            let names: Vec<String> = config.accounts.iter().map(|a| a.name.clone()).collect();
            if names.len() < 3 {
                bail!("rotation grouping needs at least 3 configured accounts");
            }

            let engine = RotationEngine::new(config.rotation.clone());
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let plan = engine.plan(&names, &mut rng);

            // Emission order matters: downstream labeling is ordinal
            for (ordinal, group) in plan.groups.iter().enumerate() {
                println!(
                    "group {}: primary={} hedges={},{}",
                    ordinal + 1,
                    group.primary,
                    group.hedges[0],
                    group.hedges[1],
                );

                if let Some(symbol) = &symbol {
                    let mut order = HedgeOrder::draft(
                        symbol,
                        &group.primary,
                        group.hedges.to_vec(),
                        amount,
                        tp,
                        sl,
                    )?;
                    let id = store.insert(&mut order)?;
                    println!("  -> draft order {id}");
                }
            }
            println!(
                "{} groups; weight spread {} .. {}",
                plan.groups.len(),
                plan.state.min_weight(),
                plan.state.max_weight(),
            );
        }
    }

    Ok(())
}

fn load_order(store: &SqliteStore, id: u64) -> Result<HedgeOrder> {
    store
        .get(id)?
        .with_context(|| format!("no order with id {id}"))
}

/// Live wiring: registry with restored stats, gateway, price feed, orchestrator.
struct Runtime {
    registry: Arc<AccountRegistry>,
    gateway: Arc<dyn ExchangeGateway>,
    mock: Option<Arc<MockGateway>>,
    book: PriceBook,
    orchestrator: HedgeOrchestrator,
}

impl Runtime {
    async fn start(config: &Config, store: &SqliteStore, paper: bool) -> Result<Self> {
        let accounts: Vec<Account> = config
            .accounts
            .iter()
            .map(|a| Account::new(&a.name, &a.api_key, &a.api_secret))
            .collect();
        let registry = Arc::new(AccountRegistry::new(accounts));

        // Stats survive restarts; credentials never leave the config
        for (name, trade_count, cumulative_volume) in store.load_account_stats()? {
            registry
                .restore_stats(&name, trade_count, cumulative_volume)
                .await;
        }

        let mut mock = None;
        let gateway: Arc<dyn ExchangeGateway> = if paper {
            info!("Paper mode: using simulated gateway");
            let simulated = Arc::new(MockGateway::new());
            for account in config.accounts.iter() {
                let creds = hedge_desk::account::Credentials {
                    api_key: account.api_key.clone(),
                    api_secret: account.api_secret.clone(),
                };
                simulated
                    .register_account(
                        &creds,
                        Decimal::from(10_000),
                        config.execution.default_leverage,
                    )
                    .await;
            }
            mock = Some(Arc::clone(&simulated));
            simulated
        } else {
            Arc::new(BinanceGateway::new(config.binance.testnet)?)
        };

        let book = PriceBook::new();
        let feed = PriceFeed::new(config.binance.testnet);
        tokio::spawn(feed.run_forever(book.clone()));

        let orchestrator = HedgeOrchestrator::new(
            Arc::clone(&gateway),
            Arc::clone(&registry),
            book.clone(),
            PrecisionTable::new(config.symbols.clone()),
            config.execution.clone(),
            config.reconcile.clone(),
        );

        Ok(Self {
            registry,
            gateway,
            mock,
            book,
            orchestrator,
        })
    }

    /// Wait for the feed to deliver a price, mirroring it into the mock in
    /// paper mode so simulated fills use the live mark.
    async fn await_price(&self, symbol: &str) -> Result<Decimal> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            if let Some(price) = self.book.get(symbol).await {
                if let Some(mock) = &self.mock {
                    mock.set_price(symbol, price).await;
                }
                return Ok(price);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("no price for {symbol} arrived within 15s");
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "hedge-desk.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hedge_desk=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    Ok(())
}
