mod backup_commands;
mod config_commands;
mod db_commands;
mod rules_commands;
mod store;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Result, bail},
    clap::{Parser, Subcommand},
    courier_config::{CourierConfig, Severity, validate_config},
    courier_forward::{engine::ForwardEngine, stats::StatsRecorder},
    courier_telegram::{
        TelegramClient,
        bot::{build_bot, start_polling},
    },
    tokio::sync::mpsc,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: rule-based Telegram message forwarder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (skips discovery in ./ and ~/.config/courier/).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides config and platform default).
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll Telegram and relay by rule (default when no subcommand is provided).
    Run,
    /// Forwarding rule management.
    Rules {
        #[command(subcommand)]
        action: rules_commands::RulesAction,
    },
    /// Bulk history copy between chats.
    Backup {
        #[command(subcommand)]
        action: backup_commands::BackupAction,
    },
    /// Relay counts per day and source.
    Stats {
        /// Only this day (`YYYY-MM-DD`).
        #[arg(long)]
        date: Option<String>,
        /// Print the raw JSON export.
        #[arg(long)]
        json: bool,
    },
    /// Storage backend management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration checks.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<CourierConfig> {
    let mut config = match &cli.config {
        Some(path) => courier_config::load_config(path)?,
        None => courier_config::discover_and_load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Run) => run(config).await,
        Some(Commands::Rules { action }) => rules_commands::handle_rules(&config, action).await,
        Some(Commands::Backup { action }) => {
            backup_commands::handle_backup(&config, action).await
        },
        Some(Commands::Stats { date, json }) => show_stats(&config, date, json).await,
        Some(Commands::Db { action }) => db_commands::handle_db(&config, action).await,
        Some(Commands::Config { action }) => config_commands::handle_config(&config, action),
    }
}

/// Start the engine and the Telegram poller, and run until Ctrl-C.
async fn run(config: CourierConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    let validation = validate_config(&config);
    for d in &validation.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
        }
    }
    if validation.has_errors() {
        bail!("invalid configuration, see `courier config check`");
    }

    let forward_store = store::open_configured(&config).await?;
    let archive = store::open_archive(&config).await?;
    let bot = build_bot(&config.telegram)?;
    let client = Arc::new(TelegramClient::new(bot.clone(), Arc::clone(&archive)));

    let engine = ForwardEngine::new(forward_store, client, &config);
    let (inbound_tx, inbound_rx) = mpsc::channel(config.telegram.inbound_buffer);
    engine.start(inbound_rx).await?;

    let polling = match start_polling(bot, &config.telegram, archive, inbound_tx).await {
        Ok(cancel) => cancel,
        Err(e) => {
            engine.stop().await;
            return Err(e.into());
        },
    };

    info!(
        backend = %config.storage.backend,
        rules = engine.rules().list().await?.len(),
        "courier running, press Ctrl-C to stop"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        () = polling.cancelled() => warn!("telegram polling ended"),
    }

    polling.cancel();
    engine.stop().await;
    info!("courier stopped");
    Ok(())
}

async fn show_stats(config: &CourierConfig, date: Option<String>, json: bool) -> Result<()> {
    let stats = StatsRecorder::new(store::open_configured(config).await?);
    let mut export = stats.export().await?;
    if let Some(date) = &date {
        export.retain(|day, _| day == date);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&export)?);
        return Ok(());
    }
    if export.is_empty() {
        println!("No relays recorded.");
    }
    for (day, sources) in &export {
        println!("{day}");
        for (source, counts) in sources {
            let total: u64 = counts.values().sum();
            let breakdown: Vec<String> = counts
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect();
            println!("  {source}: {total} ({})", breakdown.join(", "));
        }
    }
    Ok(())
}
