use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::models::{Cinema, CinemaEntry};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per URL, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Pause between two cinemas.
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,

    /// Cap on a whole ingest run.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Default age for `prune`.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// The theater chain being scraped and its cinema registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    #[serde(default = "default_chain_name")]
    pub name: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_cinemas")]
    pub cinemas: Vec<CinemaEntry>,
}

impl FetcherConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl ChainConfig {
    /// Registry resolved into full `Cinema` values, in configuration order.
    pub fn registry(&self) -> Vec<Cinema> {
        self.cinemas
            .iter()
            .map(|e| Cinema::from_entry(e, &self.name, &self.base_url))
            .collect()
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_user_agent() -> String {
    "showtime-ingest/0.1 (listing aggregator)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/showtimes.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_pacing_delay_ms() -> u64 {
    2000
}
fn default_run_timeout_secs() -> u64 {
    600
}
fn default_retention_days() -> u32 {
    14
}
fn default_chain_name() -> String {
    "Cinema di Roma".to_string()
}
fn default_base_url() -> String {
    "https://www.cinemadiroma.it".to_string()
}

fn default_cinemas() -> Vec<CinemaEntry> {
    let entry = |id: &str, name: &str, path: &str, lat: f64, lon: f64| CinemaEntry {
        id: id.to_string(),
        name: name.to_string(),
        path: path.to_string(),
        latitude: Some(lat),
        longitude: Some(lon),
        icon_url: String::new(),
    };
    vec![
        entry("intrastevere", "Cinema Intrastevere", "programmazione-cinema-intrastevere", 41.8891, 12.4697),
        entry("lux", "Multisala Lux", "programmazione-multisala-lux", 41.8819, 12.4987),
        entry("odeon", "Multisala Odeon", "programmazione-multisala-odeon", 41.9009, 12.4833),
        entry("tibur", "Cinema Tibur", "programmazione-cinema-tibur", 41.8937, 12.5240),
    ]
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pacing_delay_ms: default_pacing_delay_ms(),
            run_timeout_secs: default_run_timeout_secs(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: default_chain_name(),
            base_url: default_base_url(),
            cinemas: default_cinemas(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("SHOWTIMES")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_cfg = match cfg.try_deserialize::<AppConfig>() {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid configuration ({}), falling back to defaults", e);
                AppConfig::default()
            }
        };
        Ok(app_cfg)
    }
}
