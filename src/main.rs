mod config;
mod error;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::Repository;
use crate::utils::{fmt_count, or_dash};

#[derive(Parser)]
#[command(name = "showtime-ingest", about = "Cinema showtime scraper and catalog", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Catalog database file (overrides storage.db_path)
    #[arg(long, global = true, env = "SHOWTIMES_DB_PATH")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every registered cinema and upsert its listing
    Ingest {
        /// Only this cinema id (e.g. "lux")
        #[arg(short, long)]
        cinema: Option<String>,
    },

    /// List stored cinemas
    Cinemas {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List stored movies with their showtime counts
    Movies {
        /// Only movies scheduled at this cinema id
        #[arg(short, long)]
        cinema: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics
    Stats,

    /// Delete showtimes not seen by an ingest for N days
    Prune {
        /// Age in days (default: pipeline.retention_days)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Apply schema migrations without ingesting
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "showtime_ingest=info,warn",
        1 => "showtime_ingest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    match cli.command {
        Command::Ingest { cinema } => {
            let _t = utils::Timer::start("Ingest");
            let summary = Pipeline::new(config).run(cinema.as_deref()).await?;
            print!("{}", summary);
            if !summary.is_complete_success() {
                warn!("Run started at {} finished with failures", summary.started_at);
            }
        }

        Command::Cinemas { json } => {
            let repo = open_repo(&config)?;
            let rows = repo.list_cinemas()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No cinemas — run `showtime-ingest ingest` first.");
            }
            for row in &rows {
                let c = &row.cinema;
                println!(
                    "  {:<14} {:<22} {:>9} {:>9}  {}",
                    c.id,
                    c.name,
                    or_dash(c.latitude),
                    or_dash(c.longitude),
                    c.website
                );
            }
        }

        Command::Movies { cinema, json } => {
            let repo = open_repo(&config)?;
            let movies = repo.list_movies(cinema.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&movies)?);
                return Ok(());
            }
            println!("{} movies:", movies.len());
            for m in &movies {
                println!(
                    "  {:<40} {:<14} {:>4} min  {:>3} showtimes",
                    m.title, m.genre, m.duration, m.showtimes
                );
            }
        }

        Command::Stats => {
            let repo = open_repo(&config)?;
            let last = repo.last_ingest_run()?;
            println!("─────────────────────────────────");
            println!("  Showtime catalog — {}", config.chain.name);
            println!("─────────────────────────────────");
            println!("  Cinemas   : {}", fmt_count(repo.cinema_count()?));
            println!("  Movies    : {}", fmt_count(repo.movie_count()?));
            println!("  Showtimes : {}", fmt_count(repo.showtime_count()?));
            match last {
                Some(run) => {
                    println!("  Last run  : #{} {} ({})", run.id, run.started_at, run.status);
                    println!(
                        "              {} ok, {} failed, {} showtimes",
                        run.cinemas_ok, run.cinemas_failed, run.showtimes_upserted
                    );
                    if let Some(msg) = run.error_msg {
                        println!("              {}", msg);
                    }
                }
                None => println!("  Last run  : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Prune { days } => {
            let days = days.unwrap_or(config.pipeline.retention_days);
            let cutoff = Utc::now().naive_utc() - Duration::days(i64::from(days));
            let repo = open_repo(&config)?;
            let n = repo.prune_showtimes_before(cutoff)?;
            println!("Pruned {} showtimes older than {} days.", fmt_count(n as i64), days);
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    info!("Using catalog at {:?}", config.storage.db_path);
    Ok(repo)
}
