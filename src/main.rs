use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use uatu_monitor::config::{AppConfig, LoggingConfig};
use uatu_monitor::connectivity::ConnectivityMonitor;
use uatu_monitor::extractor::PriceExtractor;
use uatu_monitor::loader::{ChromeLoader, DocumentLoader, HttpLoader};
use uatu_monitor::models::{NewProduct, ProductId};
use uatu_monitor::notifier::{LogSink, NotificationDispatcher, WebhookSink};
use uatu_monitor::product_manager::ProductManager;
use uatu_monitor::store::ProductStore;
use uatu_monitor::ProductScheduler;

#[derive(Parser)]
#[command(name = "uatu-monitor", version, about = "Watch product pages for price changes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor every stored product until Ctrl-C
    Run,
    /// Seed and start tracking a product page
    Add {
        url: String,
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Stop tracking a product
    Remove { id: String },
    /// Show tracked products
    List {
        #[arg(long)]
        json: bool,
    },
    /// Run one extraction against a URL and print the result
    Probe { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("Failed to install metrics exporter")?;
        info!("Metrics exporter listening on port {}", config.metrics.port);
    }

    match cli.command {
        Command::Run => run(config).await,
        Command::Add { url, interval } => add(config, url, interval).await,
        Command::Remove { id } => remove(config, id).await,
        Command::List { json } => list(config, json).await,
        Command::Probe { url } => probe(config, url).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive("uatu_monitor=debug".parse()?);

    match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "uatu-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

fn build_manager(config: &AppConfig) -> Result<ProductManager> {
    let loader: Arc<dyn DocumentLoader> = if config.scraper.use_browser {
        Arc::new(ChromeLoader::new(config.scraper.clone())?)
    } else {
        Arc::new(HttpLoader::new(config.scraper.clone())?)
    };
    let extractor = PriceExtractor::from_settings(&config.extraction)?;

    Ok(ProductManager::new(
        loader,
        Arc::new(extractor),
        config.scheduler.check_timeout(),
    ))
}

async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Uatu Monitor...");

    let store = ProductStore::connect(&config.storage.database_url).await?;
    let shutdown = CancellationToken::new();

    // Connectivity
    let (online, monitor_task, _always_online) = if config.connectivity.enabled {
        let monitor = Arc::new(ConnectivityMonitor::from_config(&config.connectivity)?);
        monitor.on_change(|online| info!(online, "Connectivity changed"));
        let online = monitor.subscribe();
        let task = monitor.spawn(shutdown.clone());
        (online, Some(task), None)
    } else {
        let (sender, online) = watch::channel(true);
        (online, None, Some(sender))
    };

    // Notifications
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut dispatcher = NotificationDispatcher::new().with_sink(Arc::new(LogSink));
    if let Some(webhook) = &config.notifications.webhook_url {
        dispatcher.add_sink(Arc::new(WebhookSink::new(webhook.clone())));
    }
    let dispatcher_task = tokio::spawn(dispatcher.run(events_rx, shutdown.clone()));

    // Scheduler
    let scheduler = ProductScheduler::new(
        build_manager(&config)?,
        config.scheduler.clone(),
        online,
        events_tx,
        Some(store.clone()),
    );
    let restored = scheduler.restore(store.load_all().await?).await;
    info!("Monitoring {} products", restored);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let products = scheduler.shutdown().await;
    store.save_all(&products).await?;

    shutdown.cancel();
    if let Some(task) = monitor_task {
        let _ = task.await;
    }
    let _ = dispatcher_task.await;

    info!("Saved {} products", products.len());
    Ok(())
}

async fn add(config: AppConfig, url: String, interval: Option<u64>) -> Result<()> {
    let store = ProductStore::connect(&config.storage.database_url).await?;
    let (_online_tx, online) = watch::channel(true);
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let scheduler = ProductScheduler::new(
        build_manager(&config)?,
        config.scheduler.clone(),
        online,
        events_tx,
        Some(store.clone()),
    );
    scheduler.restore(store.load_all().await?).await;

    let product = scheduler
        .add_product(NewProduct {
            url,
            poll_interval_secs: interval,
        })
        .await?;
    scheduler.shutdown().await;

    let price = product
        .snapshot
        .as_ref()
        .map(|s| s.price.to_string())
        .unwrap_or_default();
    println!("Added {} ({}) at {}", product.id, product.display_name(), price);
    Ok(())
}

async fn remove(config: AppConfig, id: String) -> Result<()> {
    let store = ProductStore::connect(&config.storage.database_url).await?;
    let id = ProductId::from(id);

    if !store.delete(&id).await? {
        anyhow::bail!("No product with id {}", id);
    }
    println!("Removed {}", id);
    Ok(())
}

async fn list(config: AppConfig, json: bool) -> Result<()> {
    let store = ProductStore::connect(&config.storage.database_url).await?;
    let products = store.load_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&products)?);
        return Ok(());
    }

    for product in &products {
        let price = product
            .snapshot
            .as_ref()
            .map(|s| s.price.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9}  {:>14}  {}  {}",
            product.id,
            product.status.as_str(),
            price,
            product.display_name(),
            product.url
        );
    }
    Ok(())
}

async fn probe(config: AppConfig, url: String) -> Result<()> {
    let manager = build_manager(&config)?;

    match manager.check_url(&url).await {
        Ok(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        Err(failure) => anyhow::bail!("Check failed: {}", failure),
    }
    Ok(())
}
