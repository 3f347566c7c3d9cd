//! DeskHub - Entry Point
//!
//! Loads configuration, probes department credentials, wires the router
//! stack, and runs the Telegram adapter with long polling.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use deskhub::{
    telegram, Config, DepartmentRegistry, MatrixApi, MatrixClient, MessageRelay, RoomProvisioner,
    SessionRouter, SpaceDirectory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("DeskHub v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: deskhub [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN   Telegram bot token (required)");
        println!("  DESKHUB_CONFIG       Config file path (default: deskhub.toml)");
        println!("  RUST_LOG             Log level (trace/debug/info/warn/error)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("DeskHub v{}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var("DESKHUB_CONFIG").unwrap_or_else(|_| "deskhub.toml".to_string());
    let config = Config::load(Path::new(&config_path))
        .with_context(|| format!("loading config from {config_path}"))?;
    info!(
        "Loaded {} department(s), {} channel space(s)",
        config.departments.len(),
        config.spaces.channels.len()
    );

    let token = std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

    let channel = config
        .spaces
        .channel(telegram::CHANNEL_KEY)
        .with_context(|| format!("no [[spaces.channels]] entry with key {:?}", telegram::CHANNEL_KEY))?
        .clone();

    let client =
        MatrixClient::new(Duration::from_secs(config.router.request_timeout_secs))?;
    let api: Arc<dyn MatrixApi> = Arc::new(client);

    // Credential probe per department. Non-fatal: a department with a bad
    // token still fails loudly at first provisioning.
    for department in &config.departments {
        match api.whoami(&department.target()).await {
            Ok(user_id) => info!("Department {}: authenticated as {}", department.id, user_id),
            Err(e) => warn!("Department {}: credential check failed: {}", department.id, e),
        }
    }

    let directory = Arc::new(SpaceDirectory::new(
        Arc::clone(&api),
        config.space_target(),
        config.spaces.clone(),
    ));
    let registry = Arc::new(DepartmentRegistry::new(config.departments.clone()));
    let provisioner = RoomProvisioner::new(
        Arc::clone(&api),
        directory,
        channel.key.clone(),
        channel.name.clone(),
    );
    let relay = MessageRelay::new(Arc::clone(&api));
    let router = Arc::new(SessionRouter::new(registry, provisioner, relay));

    // Session TTL sweeper
    let sweeper = Arc::clone(&router);
    let ttl = Duration::from_secs(config.router.session_ttl_secs);
    let sweep_interval = Duration::from_secs(config.router.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            let evicted = sweeper.sessions().evict_idle(ttl).await;
            if evicted > 0 {
                debug!("Evicted {} idle session(s)", evicted);
            }
        }
    });

    telegram::run_telegram_bot(token, router).await
}
