mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use overseer::{App, Backends, logging};
use overseer_core::config::{ConfigLoader, DiscordSettings, NotificationConfig};
use overseer_core::{Config, EventBus, Server, ServerStore, SharedConfig, Watchlist};
use overseer_storage::{JsonServerStore, JsonWatchlist};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::{Cli, Commands, NotifyCommands, ServerCommands, WatchlistCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json);

    match &cli.command {
        Some(Commands::Init { output, force }) => handle_init(output.clone(), *force),
        Some(Commands::Servers { command }) => {
            let (_, config) = load_config(&cli)?;
            handle_servers(&config, command).await
        }
        Some(Commands::Watchlist { command }) => {
            let (_, config) = load_config(&cli)?;
            handle_watchlist(&config, command).await
        }
        Some(Commands::Notify { command }) => handle_notify(&cli, command).await,
        Some(Commands::Run) | None => {
            let (path, config) = load_config(&cli)?;
            run(path, config).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<(PathBuf, Config)> {
    let (path, mut config) =
        ConfigLoader::load_with_path(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok((path, config))
}

async fn run(config_path: PathBuf, config: Config) -> Result<()> {
    info!("overseer {} starting, config {:?}", env!("CARGO_PKG_VERSION"), config_path);
    let backends = Backends::from_config(&config);
    let app = App::start(config, config_path, backends).await?;
    info!("watching {} server(s)", app.observer.len().await);

    wait_for_shutdown(&app).await?;
    app.shutdown().await
}

/// Block until SIGINT/SIGTERM, reloading the notification config on SIGHUP.
async fn wait_for_shutdown(app: &App) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading notification config");
                    match app.config.reload().await {
                        Ok(true) => info!("notification config changed"),
                        Ok(false) => info!("notification config unchanged"),
                        Err(e) => warn!("config reload failed: {}", e),
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = app;
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

fn handle_init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let path = output.unwrap_or_else(ConfigLoader::default_path);
    if path.exists() && !force {
        bail!("{:?} already exists, pass --force to overwrite", path);
    }
    Config::sample()
        .save(&path)
        .with_context(|| format!("failed to write {:?}", path))?;
    println!("Sample config written to {:?}", path);
    Ok(())
}

async fn handle_servers(config: &Config, command: &ServerCommands) -> Result<()> {
    let store = JsonServerStore::open(config.storage.servers_path())?;
    match command {
        ServerCommands::Add { name, addr } => {
            let server = store.create(Server::new(name.as_str(), addr.as_str())).await?;
            println!("Added {}", server);
        }
        ServerCommands::List => {
            let servers = store.list().await?;
            if servers.is_empty() {
                println!("No servers registered");
            }
            for server in servers {
                let players = server.player_names().join(", ");
                let seen = server
                    .last_seen
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{}  players: [{}]  last seen: {}", server, players, seen);
            }
        }
        ServerCommands::Remove { server } => {
            let id = match Uuid::parse_str(server) {
                Ok(id) => id,
                Err(_) => store.get_by_name(server).await?.id,
            };
            store.delete(id).await?;
            println!("Removed {}", id);
        }
    }
    Ok(())
}

async fn handle_watchlist(config: &Config, command: &WatchlistCommands) -> Result<()> {
    let watchlist = JsonWatchlist::open(config.storage.watchlist_path())?;
    match command {
        WatchlistCommands::Add { name } => {
            let entry = watchlist.create(name).await?;
            println!("Watching {} ({})", entry.name, entry.id);
        }
        WatchlistCommands::List => {
            let entries = watchlist.list().await;
            if entries.is_empty() {
                println!("Watchlist is empty");
            }
            for entry in entries {
                println!("{}  {}", entry.id, entry.name);
            }
        }
        WatchlistCommands::Remove { id } => {
            watchlist.delete(*id).await?;
            println!("Removed {}", id);
        }
    }
    Ok(())
}

async fn handle_notify(cli: &Cli, command: &NotifyCommands) -> Result<()> {
    let (path, config) =
        ConfigLoader::load_with_path(cli.config.as_deref()).context("failed to load config")?;
    let section = match command {
        NotifyCommands::Show => {
            match &config.notification.discord {
                Some(discord) => println!("discord: channel {}", discord.channel_id),
                None => println!("No notification services configured"),
            }
            return Ok(());
        }
        NotifyCommands::Discord { token, channel_id } => NotificationConfig {
            discord: Some(DiscordSettings {
                token: token.clone(),
                channel_id: channel_id.clone(),
            }),
        },
        NotifyCommands::Off => NotificationConfig::default(),
    };

    let shared = SharedConfig::new(path.clone(), config, EventBus::default());
    shared.update_notification(section).await?;
    println!("Saved to {:?}; send SIGHUP to a running daemon to apply", path);
    Ok(())
}
