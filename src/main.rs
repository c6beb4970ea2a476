//! Simulator entry point
//!
//! Drives the full engine against the in-memory store: registration,
//! queueing, ready checks, balanced team formation, result votes and
//! rating updates. Useful for demos and for eyeballing the announce
//! stream without a chat binding.

use anyhow::Result;
use clap::Parser;
use pug_engine::config::AppConfig;
use pug_engine::rating::RankTier;
use pug_engine::surface::ConsoleSink;
use pug_engine::types::{ChannelId, GameMode, Team, UserId};
use pug_engine::vote::{ResultCoordinator, VoteKind};
use pug_engine::{MemoryStore, QueueRegistry, Store, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const SCOPE: &str = "simulator";
const CHANNEL: ChannelId = 1;

/// PUG Engine Simulator - queue, balance and rate a full season locally
#[derive(Parser)]
#[command(
    name = "pug-engine",
    version,
    about = "Pick up game queue engine with ELO ratings and result voting"
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Number of players in the simulated queue (even, at least 2)
    #[arg(short, long, default_value_t = 8)]
    players: usize,

    /// Number of matches to simulate
    #[arg(short, long, default_value_t = 3)]
    rounds: usize,

    /// Dry run mode (validate config and exit)
    #[arg(long, help = "Validate configuration and exit without simulating")]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

async fn run_simulation(config: AppConfig, players: usize, rounds: usize) -> Result<()> {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(ConsoleSink::new());
    let registry = QueueRegistry::new(
        SCOPE.to_string(),
        config.queue.clone(),
        store.clone(),
        sink.clone(),
    );
    let coordinator = ResultCoordinator::new(
        SCOPE.to_string(),
        config.queue.clone(),
        &config.rating,
        store.clone(),
        sink,
    );

    store.add_mode(
        SCOPE,
        GameMode {
            name: "sim".to_string(),
            display_name: format!("{}v{}", players / 2, players / 2),
            team_size: players,
            description: "Simulated pick up game".to_string(),
        },
    )?;
    for map in ["Fort", "Canyon", "Harbor", "Spire"] {
        store.add_map(SCOPE, map)?;
    }

    // A spread of skill levels so the balancer has real work to do
    for i in 0..players {
        let user = i as UserId + 1;
        let rating = config.rating.starting_rating + (i as f64 - players as f64 / 2.0) * 45.0;
        store.register_player(SCOPE, user, &format!("Player_{user}"), rating)?;
    }

    let engine = registry
        .get_or_create(CHANNEL, "sim")?
        .expect("sim mode was just created");

    for round in 0..rounds {
        info!("--- Round {} ---", round + 1);
        for i in 0..players {
            engine.join(i as UserId + 1).await?;
        }
        for i in 0..players {
            // Rejections are fine here: sticky ready answers from the
            // previous round can complete the check early
            let _ = engine.mark_ready(i as UserId + 1).await?;
        }

        let Some(record) = store.recent_matches(SCOPE, 1)?.into_iter().next() else {
            warn!("Round {} did not produce a match", round + 1);
            continue;
        };
        let winner = if round % 2 == 0 { Team::Red } else { Team::Blue };
        let voters: Vec<UserId> = record.participants();
        for voter in voters.iter().take(voters.len() / 2 + 1) {
            coordinator
                .report(CHANNEL, *voter, Some(record.id), VoteKind::Winner(winner))
                .await?;
        }
    }

    info!("--- Final standings ---");
    for player in store.all_players(SCOPE)? {
        info!(
            "{:<12} {:7.1} elo  [{}]  {}W/{}L  streak {:+}",
            player.display_name,
            player.rating,
            RankTier::from_rating(player.rating),
            player.wins,
            player.losses,
            player.streak
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration from file or environment
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    if let Some(level) = &args.log_level {
        config.service.log_level = level.clone();
    }

    init_logging(&config.service.log_level)?;
    info!("Starting {} v{}", config.service.name, VERSION);

    if args.players < 2 || args.players % 2 != 0 {
        anyhow::bail!("--players must be even and at least 2");
    }

    if args.dry_run {
        info!("Configuration is valid, exiting (dry run)");
        return Ok(());
    }

    run_simulation(config, args.players, args.rounds).await
}
