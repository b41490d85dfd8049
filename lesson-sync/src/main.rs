use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lesson_sync::{EngineConfig, NetworkState, SyncEngine};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Lesson sync operator tool
#[derive(Parser, Debug)]
#[command(name = "lesson-sync", version)]
#[command(about = "Inspect and drive the offline lesson cache and sync queue")]
struct Args {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, env = "LESSON_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print scheduler state and pending counts
    Status,
    /// Run one sync pass now
    Sync {
        /// Ignore the minimum interval since the last pass
        #[arg(short, long)]
        force: bool,
    },
    /// Follow network states, one JSON object per line on stdin
    Monitor,
    /// Cache a chapter, defaulting to the subject's first chapter
    Download {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        chapter: Option<String>,
    },
    /// Print the stages of a cached chapter with their progress
    Stages {
        #[arg(long)]
        chapter: String,
    },
    /// Print the course structure and where it came from
    Course,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(args.verbose)?;

    let config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;
    info!(
        db_path = %config.database.db_path,
        base_url = %config.gateway.base_url,
        "Starting lesson-sync {}",
        env!("CARGO_PKG_VERSION")
    );

    let engine = SyncEngine::new(config).context("building sync engine")?;
    engine.init().await.context("opening local database")?;

    let outcome = run(&engine, args.command).await;
    engine.shutdown().await;
    outcome
}

async fn run(engine: &SyncEngine, command: Command) -> Result<()> {
    match command {
        Command::Status => print_json(&engine.scheduler().status().await?),
        Command::Sync { force } => print_json(&engine.scheduler().perform_sync(force).await?),
        Command::Monitor => monitor(engine).await,
        Command::Download { subject, chapter } => {
            let chapter_id = match chapter {
                Some(chapter_id) => chapter_id,
                None => engine
                    .course()
                    .first_chapter(&subject)
                    .await?
                    .with_context(|| format!("subject {} has no chapters", subject))?,
            };
            let row = engine.content().download_first_chapter(&subject, &chapter_id).await?;
            info!(
                chapter_id = %row.chapter_id,
                total_topics = row.total_topics,
                "Chapter cached"
            );
            Ok(())
        }
        Command::Stages { chapter } => print_json(&engine.progress().stage_view(&chapter).await?),
        Command::Course => print_json(&engine.course().load().await?),
    }
}

async fn monitor(engine: &SyncEngine) -> Result<()> {
    let (tx, rx) = watch::channel(NetworkState::offline());
    engine.scheduler().start_monitoring(rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<NetworkState>(&line) {
                    Ok(state) => {
                        tx.send_replace(state);
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed network state"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    print_json(&engine.scheduler().status().await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let is_development =
        env::var("LESSON_SYNC_ENV").unwrap_or_else(|_| "development".to_string()) == "development";

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lesson_sync={},sqlx=warn,reqwest=info", level).into());

    // Logs go to stderr so command output on stdout stays machine readable
    if is_development {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()?;
    }

    Ok(())
}
