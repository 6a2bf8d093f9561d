//! Ingestion orchestrator: ties fetcher → extractor → store together.
//!
//! ## Run
//!
//! `run()` walks the cinema registry sequentially:
//!   1. Upsert the registry into `cinemas`.
//!   2. For each cinema: fetch its listing page, extract movies, upsert them.
//!   A failure at any step is recorded for that cinema and the run moves on.
//!   Idempotent: re-running against unchanged pages only refreshes timestamps.
//!
//! Each cinema moves through `Pending → Fetching → Extracting → Upserting →
//! Done`, or stops in `Failed`. A fixed pause separates cinemas, and a run
//! deadline is checked between steps so the in-flight step always finishes.

use crate::config::AppConfig;
use crate::error::IngestError;
use crate::models::Cinema;
use crate::scraper::{HttpClient, ListingExtractor, ListingSource};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CinemaStage {
    Pending,
    Fetching,
    Extracting,
    Upserting,
    Done,
    Failed,
}

impl fmt::Display for CinemaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CinemaStage::Pending => "pending",
            CinemaStage::Fetching => "fetching",
            CinemaStage::Extracting => "extracting",
            CinemaStage::Upserting => "upserting",
            CinemaStage::Done => "done",
            CinemaStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CinemaOutcome {
    pub cinema_id: String,
    pub cinema_name: String,
    pub stage: CinemaStage,
    /// Step that was running when the cinema failed.
    pub failed_at: Option<CinemaStage>,
    pub movies: usize,
    pub showtimes: usize,
    /// Degraded fields reported by the extractor.
    pub anomalies: usize,
    pub error: Option<String>,
}

impl CinemaOutcome {
    fn pending(cinema: &Cinema) -> Self {
        Self {
            cinema_id: cinema.id.clone(),
            cinema_name: cinema.name.clone(),
            stage: CinemaStage::Pending,
            failed_at: None,
            movies: 0,
            showtimes: 0,
            anomalies: 0,
            error: None,
        }
    }

    fn fail(&mut self, err: &IngestError) {
        self.failed_at = Some(self.stage);
        self.stage = CinemaStage::Failed;
        self.error = Some(err.to_string());
    }

    pub fn is_done(&self) -> bool {
        self.stage == CinemaStage::Done
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub started_at: NaiveDateTime,
    pub elapsed: Duration,
    pub outcomes: Vec<CinemaOutcome>,
    /// Set when the registry itself could not be written.
    pub registry_error: Option<String>,
}

impl RunSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &CinemaOutcome> {
        self.outcomes.iter().filter(|o| o.is_done())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CinemaOutcome> {
        self.outcomes.iter().filter(|o| !o.is_done())
    }

    pub fn showtimes_upserted(&self) -> usize {
        self.succeeded().map(|o| o.showtimes).sum()
    }

    pub fn is_complete_success(&self) -> bool {
        self.registry_error.is_none() && self.failed().next().is_none()
    }

    /// One line per failed cinema, for the run log.
    pub fn failure_digest(&self) -> Option<String> {
        let mut parts: Vec<String> = self
            .failed()
            .map(|o| format!("{}: {}", o.cinema_id, o.error.as_deref().unwrap_or("unknown")))
            .collect();
        if let Some(e) = &self.registry_error {
            parts.insert(0, format!("registry: {e}"));
        }
        if parts.is_empty() { None } else { Some(parts.join("; ")) }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} cinemas: {} ok, {} failed ({:.1?})",
            self.outcomes.len(),
            self.succeeded().count(),
            self.failed().count(),
            self.elapsed,
        )?;
        if let Some(e) = &self.registry_error {
            writeln!(f, "  registry not saved: {e}")?;
        }
        for o in &self.outcomes {
            match (&o.error, o.failed_at) {
                (Some(e), Some(step)) => {
                    writeln!(f, "  FAILED {:<14} during {}: {}", o.cinema_id, step, e)?
                }
                _ => writeln!(
                    f,
                    "  ok     {:<14} {} movies, {} showtimes, {} warnings ({})",
                    o.cinema_id, o.movies, o.showtimes, o.anomalies, o.cinema_name
                )?,
            }
        }
        Ok(())
    }
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Full run against the live site. `only` restricts it to one cinema id.
    pub async fn run(&self, only: Option<&str>) -> Result<RunSummary> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let mut cinemas = self.config.chain.registry();
        if let Some(id) = only {
            cinemas.retain(|c| c.id == id);
            if cinemas.is_empty() {
                return Err(IngestError::UnknownCinema(id.to_string()).into());
            }
        }

        let extractor = ListingExtractor::new(&self.config.chain.base_url)?;
        let client = HttpClient::new(&self.config.fetcher).context("Failed to build HTTP client")?;
        let run_id = match repo.begin_ingest_run() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not record ingest run start: {}", e);
                None
            }
        };

        let summary = self.ingest(&client, &extractor, &repo, &cinemas).await;
        // Releases the connection pool before the run log is closed.
        drop(client);

        if let Some(id) = run_id {
            if let Err(e) = repo.finish_ingest_run(
                id,
                summary.succeeded().count(),
                summary.failed().count(),
                summary.showtimes_upserted(),
                summary.failure_digest().as_deref(),
            ) {
                warn!("Could not record ingest run end: {}", e);
            }
        }

        Ok(summary)
    }

    /// Drive every cinema through fetch → extract → upsert. Never fails:
    /// problems end up in the returned summary.
    pub async fn ingest(
        &self,
        source: &dyn ListingSource,
        extractor: &ListingExtractor,
        repo: &Repository,
        cinemas: &[Cinema],
    ) -> RunSummary {
        let started = Instant::now();
        let started_at = Utc::now().naive_utc();
        let deadline = started + self.config.pipeline.run_timeout();
        let pacing = self.config.pipeline.pacing_delay();

        info!("=== Refreshing {} cinemas ===", cinemas.len());
        let registry_error = match repo.upsert_cinemas(cinemas) {
            Ok(n) => {
                info!("{} cinemas in registry", n);
                None
            }
            Err(e) => {
                error!("Cinema registry upsert failed: {}", e);
                Some(e.to_string())
            }
        };

        let mut outcomes: Vec<CinemaOutcome> = cinemas.iter().map(CinemaOutcome::pending).collect();
        let mut stopped = false;

        for (i, (cinema, outcome)) in cinemas.iter().zip(outcomes.iter_mut()).enumerate() {
            if !stopped && i > 0 && !pacing.is_zero() {
                // Never pause past the deadline.
                sleep(pacing.min(deadline.saturating_duration_since(Instant::now()))).await;
            }

            // Re-checked after the pause so no fetch starts once time is up.
            if stopped || Instant::now() >= deadline {
                stopped = true;
                outcome.fail(&IngestError::DeadlineExceeded { stage: CinemaStage::Pending });
                warn!(cinema = %cinema.id, "skipped: run deadline exceeded");
                continue;
            }

            match self.ingest_one(source, extractor, repo, cinema, outcome, deadline).await {
                Ok(()) => info!(
                    cinema = %cinema.id,
                    "{}: {} movies, {} showtimes",
                    cinema.name, outcome.movies, outcome.showtimes
                ),
                Err(e) => {
                    if matches!(e, IngestError::DeadlineExceeded { .. }) {
                        stopped = true;
                    }
                    outcome.fail(&e);
                    warn!(cinema = %cinema.id, step = %outcome.failed_at.unwrap_or(CinemaStage::Pending), "{}", e);
                }
            }
        }

        let summary = RunSummary {
            started_at,
            elapsed: started.elapsed(),
            outcomes,
            registry_error,
        };

        info!(
            "=== Done: {} ok | {} failed | {} showtimes ===",
            summary.succeeded().count(),
            summary.failed().count(),
            summary.showtimes_upserted(),
        );
        summary
    }

    async fn ingest_one(
        &self,
        source: &dyn ListingSource,
        extractor: &ListingExtractor,
        repo: &Repository,
        cinema: &Cinema,
        outcome: &mut CinemaOutcome,
        deadline: Instant,
    ) -> Result<(), IngestError> {
        outcome.stage = CinemaStage::Fetching;
        info!(cinema = %cinema.id, url = %cinema.website, "fetching listing");
        let html = source.fetch_listing(&cinema.website).await?;
        check_deadline(deadline, CinemaStage::Fetching)?;

        outcome.stage = CinemaStage::Extracting;
        let extraction = extractor.extract_with_report(&html, &cinema.name);
        let movies = extraction.movies;
        outcome.movies = movies.len();
        outcome.anomalies = extraction.report.anomalies.len();
        if movies.is_empty() {
            warn!(cinema = %cinema.id, "no movie blocks found on listing page");
        }
        check_deadline(deadline, CinemaStage::Extracting)?;

        outcome.stage = CinemaStage::Upserting;
        let counts = repo.upsert_movies_and_showtimes(&cinema.id, &movies)?;
        outcome.showtimes = counts.showtimes;

        outcome.stage = CinemaStage::Done;
        Ok(())
    }
}

fn check_deadline(deadline: Instant, stage: CinemaStage) -> Result<(), IngestError> {
    if Instant::now() >= deadline {
        Err(IngestError::DeadlineExceeded { stage })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
