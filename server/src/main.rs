use anyhow::Context;
use backgammon_execution::dice;
use backgammon_server::{
    spawn_sweeper, Api, Config, Hub, LogArchive, Metrics, RateLimit, SystemClock,
};
use backgammon_types::Seed;
use clap::{Parser, Subcommand};
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the match server.
    Serve {
        #[arg(short, long)]
        config: PathBuf,

        /// Overrides the configured port.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check a published roll against a revealed seed.
    Verify {
        #[arg(long)]
        seed: String,
        #[arg(long)]
        roll_index: u64,
        #[arg(long)]
        die1: u8,
        #[arg(long)]
        die2: u8,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();
    match args.command {
        Command::Serve { config, port } => serve(config, port).await,
        Command::Verify {
            seed,
            roll_index,
            die1,
            die2,
        } => {
            let bytes = commonware_utils::from_hex(&seed).context("invalid seed hex format")?;
            let seed = Seed::try_from(bytes.as_slice()).context("seed must be 32 bytes")?;
            let (expected1, expected2) = dice::derive(&seed, roll_index);
            anyhow::ensure!(
                (expected1, expected2) == (die1, die2),
                "roll {roll_index} does not match seed: expected ({expected1}, {expected2}), got ({die1}, {die2})"
            );
            println!("roll {roll_index} verified: ({die1}, {die2})");
            Ok(())
        }
    }
}

async fn serve(path: PathBuf, port: Option<u16>) -> anyhow::Result<()> {
    // Load config
    let config = Config::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?
        .validate()
        .context("invalid config")?;

    // Create logger
    let subscriber = tracing_subscriber::fmt().with_max_level(config.log_level);
    if config.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Create hub
    let metrics = Metrics::default();
    let mut registry = Registry::default();
    metrics.register(&mut registry);
    let hub = Arc::new(Hub::new(
        SystemClock,
        LogArchive,
        config.turn,
        config.broadcast_capacity,
        metrics,
    ));
    let _sweeper = spawn_sweeper(hub.clone(), config.sweep_interval);

    let api = Api::new(hub, Arc::new(registry)).with_rate_limit(RateLimit {
        per_second: config.requests_per_second,
        burst: config.request_burst,
    });
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", port.unwrap_or(config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
