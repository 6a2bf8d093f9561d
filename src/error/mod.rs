//! Error taxonomy for the ingestion pipeline.
//!
//! Extraction problems are deliberately absent: a malformed field degrades to
//! its default and is logged as a warning by the extractor.

use thiserror::Error;

use crate::pipeline::CinemaStage;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("giving up on {url} after {attempts} attempts: {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("could not create database directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration failed: {0}")]
    Migration(#[source] duckdb::Error),

    #[error("write failed ({what}): {source}")]
    Write {
        what: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("query failed: {0}")]
    Query(#[from] duckdb::Error),
}

impl StoreError {
    pub(crate) fn write(what: impl Into<String>) -> impl FnOnce(duckdb::Error) -> StoreError {
        let what = what.into();
        move |source| StoreError::Write { what, source }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run deadline exceeded after {stage} step")]
    DeadlineExceeded { stage: CinemaStage },

    #[error("unknown cinema id {0:?}")]
    UnknownCinema(String),
}
