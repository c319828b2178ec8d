use clap::Parser;
use ratiobot::api::BitgetClient;
use ratiobot::execution::{BitgetExecutor, OrderExecutor, PaperExecutor};
use ratiobot::market::MarketObserver;
use ratiobot::persistence::{MemoryStorage, RedisStorage, Storage};
use ratiobot::{Pipeline, Settings};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "ratiobot=info";

/// Long/short ratio and open interest trend bot for Bitget USDT futures.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML). Missing files are ignored.
    #[arg(long)]
    config: Option<String>,

    /// Simulate orders in-process instead of sending them to the exchange.
    #[arg(long)]
    paper: bool,

    /// Starting balance for paper trading.
    #[arg(long, default_value_t = 1_000.0)]
    paper_balance: f64,

    /// Tracing filter, e.g. "ratiobot=debug". Overrides RUST_LOG.
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.log_filter.as_deref());

    tracing::info!("ratiobot starting");

    let settings = Settings::load(cli.config.as_deref())?;
    let exchange = &settings.exchange;
    tracing::info!(
        symbol = %exchange.symbol,
        product_type = %exchange.product_type,
        paper = cli.paper,
        "Configuration loaded"
    );

    let storage = connect_storage(&settings).await;
    let client = Arc::new(BitgetClient::new(exchange));

    let mut paper_observer: Option<Arc<dyn MarketObserver>> = None;
    let executor: Arc<dyn OrderExecutor> = if cli.paper {
        let paper = Arc::new(PaperExecutor::new(cli.paper_balance));
        paper_observer = Some(paper.clone());
        paper
    } else {
        Arc::new(BitgetExecutor::new(client.clone(), exchange))
    };

    let mut pipeline = Pipeline::new(settings, client, storage, executor);
    if let Some(observer) = paper_observer {
        pipeline.register_observer(observer);
    }

    pipeline.start().await?;
    tracing::info!("Press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Received Ctrl+C, shutting down");

    pipeline.stop().await;

    let metrics = pipeline.engine().metrics().await;
    tracing::info!(
        trades = metrics.total_trades,
        wins = metrics.winning_trades,
        losses = metrics.losing_trades,
        total_pnl = metrics.total_pnl,
        win_rate = metrics.win_rate(),
        "ratiobot stopped"
    );
    Ok(())
}

fn setup_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Redis when configured and reachable, otherwise in-memory history.
async fn connect_storage(settings: &Settings) -> Arc<dyn Storage> {
    let Some(url) = settings.storage.redis_url.as_deref() else {
        tracing::info!("No Redis URL configured, keeping history in memory");
        return Arc::new(MemoryStorage::default());
    };

    match RedisStorage::connect(url, &settings.exchange.symbol).await {
        Ok(redis) => {
            tracing::info!("Redis storage enabled");
            Arc::new(redis)
        }
        Err(e) => {
            tracing::warn!("Failed to connect to Redis ({}), keeping history in memory", e);
            Arc::new(MemoryStorage::default())
        }
    }
}
