//! Catalog store on DuckDB.
//!
//! Every write is an upsert keyed by natural identifiers; nothing here deletes
//! rows as a side effect of ingestion. A cinema's movie/showtime batch runs in
//! one transaction, so a failure part-way leaves the previous state intact.

use crate::error::StoreError;
use crate::models::{Cinema, CinemaRow, IngestRunRow, MovieRecord, MovieSummary};
use chrono::{NaiveDateTime, Utc};
use duckdb::{params, Connection, Row};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS cinemas (
    id            VARCHAR PRIMARY KEY,
    name          VARCHAR NOT NULL,
    chain         VARCHAR NOT NULL,
    latitude      DOUBLE,
    longitude     DOUBLE,
    website       VARCHAR NOT NULL,
    icon_url      VARCHAR NOT NULL DEFAULT '',
    last_updated  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS movies (
    id            VARCHAR PRIMARY KEY,
    title         VARCHAR NOT NULL,
    genre         VARCHAR NOT NULL DEFAULT '',
    -- 0 when the listing had no parseable duration
    duration      BIGINT  NOT NULL DEFAULT 0,
    language      VARCHAR NOT NULL DEFAULT '',
    poster_url    VARCHAR NOT NULL DEFAULT '',
    last_updated  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS showtimes (
    movie_id      VARCHAR NOT NULL,
    cinema_id     VARCHAR NOT NULL,
    show_date     VARCHAR NOT NULL,
    show_time     VARCHAR NOT NULL,
    booking_link  VARCHAR NOT NULL DEFAULT '',
    last_updated  TIMESTAMP NOT NULL,
    PRIMARY KEY (movie_id, cinema_id, show_date, show_time)
);

CREATE SEQUENCE IF NOT EXISTS ingest_run_ids START 1;

CREATE TABLE IF NOT EXISTS ingest_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('ingest_run_ids'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    cinemas_ok          BIGINT DEFAULT 0,
    cinemas_failed      BIGINT DEFAULT 0,
    showtimes_upserted  BIGINT DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_showtimes_cinema ON showtimes (cinema_id);
"#;

/// Rows written by one `upsert_movies_and_showtimes` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub movies: usize,
    pub showtimes: usize,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).map_err(StoreError::Migration)?;
        self.conn.execute_batch(INDEXES).map_err(StoreError::Migration)?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
                params![Utc::now().naive_utc()],
            )
            .map_err(StoreError::Migration)?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Cinemas ───────────────────────────────────────────────────────────────

    /// Insert or overwrite every given cinema. Cinemas missing from the input
    /// are left untouched.
    pub fn upsert_cinemas(&self, cinemas: &[Cinema]) -> Result<usize, StoreError> {
        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        for c in cinemas {
            tx.execute(
                r#"INSERT INTO cinemas
                       (id, name, chain, latitude, longitude, website, icon_url, last_updated)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (id) DO UPDATE SET
                       name         = excluded.name,
                       chain        = excluded.chain,
                       latitude     = excluded.latitude,
                       longitude    = excluded.longitude,
                       website      = excluded.website,
                       icon_url     = excluded.icon_url,
                       last_updated = excluded.last_updated"#,
                params![c.id, c.name, c.chain, c.latitude, c.longitude, c.website, c.icon_url, now],
            )
            .map_err(StoreError::write(format!("cinema {}", c.id)))?;
        }
        tx.commit()?;
        Ok(cinemas.len())
    }

    pub fn list_cinemas(&self) -> Result<Vec<CinemaRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, name, chain, latitude, longitude, website, icon_url, last_updated
               FROM cinemas ORDER BY name"#,
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(CinemaRow {
                    cinema: Cinema {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        chain: r.get(2)?,
                        latitude: r.get(3)?,
                        longitude: r.get(4)?,
                        website: r.get(5)?,
                        icon_url: r.get(6)?,
                    },
                    last_updated: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Movies & showtimes ────────────────────────────────────────────────────

    /// Upsert a cinema's extracted listing. Idempotent and safe to re-run on the
    /// same page. Showtimes overwrite only `booking_link` and `last_updated`.
    /// The whole batch commits or none of it does.
    pub fn upsert_movies_and_showtimes(
        &self,
        cinema_id: &str,
        movies: &[MovieRecord],
    ) -> Result<UpsertCounts, StoreError> {
        if movies.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        let mut counts = UpsertCounts::default();

        let movie_sql = r#"
            INSERT INTO movies (id, title, genre, duration, language, poster_url, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title        = excluded.title,
                genre        = excluded.genre,
                duration     = excluded.duration,
                language     = excluded.language,
                poster_url   = excluded.poster_url,
                last_updated = excluded.last_updated
        "#;

        let showtime_sql = r#"
            INSERT INTO showtimes
                (movie_id, cinema_id, show_date, show_time, booking_link, last_updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (movie_id, cinema_id, show_date, show_time) DO UPDATE SET
                booking_link = excluded.booking_link,
                last_updated = excluded.last_updated
        "#;

        for movie in movies {
            tx.execute(
                movie_sql,
                params![
                    movie.id,
                    movie.title,
                    movie.genre,
                    i64::from(movie.duration),
                    movie.language,
                    movie.poster_url,
                    now,
                ],
            )
            .map_err(StoreError::write(format!("movie {}", movie.id)))?;
            counts.movies += 1;

            for st in &movie.showtimes {
                tx.execute(
                    showtime_sql,
                    params![movie.id, cinema_id, st.date, st.time, st.booking_link, now],
                )
                .map_err(StoreError::write(format!(
                    "showtime {} @ {} {} {}",
                    movie.id, cinema_id, st.date, st.time
                )))?;
                counts.showtimes += 1;
            }
        }

        tx.commit()?;
        debug!(cinema = cinema_id, movies = counts.movies, showtimes = counts.showtimes, "batch committed");
        Ok(counts)
    }

    /// Movies with their showtime count, optionally restricted to one cinema.
    pub fn list_movies(&self, cinema_id: Option<&str>) -> Result<Vec<MovieSummary>, StoreError> {
        fn map(r: &Row<'_>) -> duckdb::Result<MovieSummary> {
            let duration: i64 = r.get(3)?;
            Ok(MovieSummary {
                id: r.get(0)?,
                title: r.get(1)?,
                genre: r.get(2)?,
                duration: u32::try_from(duration).unwrap_or(0),
                language: r.get(4)?,
                showtimes: r.get(5)?,
            })
        }

        let rows = match cinema_id {
            None => {
                let mut stmt = self.conn.prepare(
                    r#"SELECT m.id, m.title, m.genre, m.duration, m.language, COUNT(s.movie_id)
                       FROM movies m
                       LEFT JOIN showtimes s ON s.movie_id = m.id
                       GROUP BY m.id, m.title, m.genre, m.duration, m.language
                       ORDER BY m.title, m.id"#,
                )?;
                stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?
            }
            Some(cinema) => {
                let mut stmt = self.conn.prepare(
                    r#"SELECT m.id, m.title, m.genre, m.duration, m.language, COUNT(*)
                       FROM movies m
                       JOIN showtimes s ON s.movie_id = m.id
                       WHERE s.cinema_id = ?
                       GROUP BY m.id, m.title, m.genre, m.duration, m.language
                       ORDER BY m.title, m.id"#,
                )?;
                stmt.query_map(params![cinema], map)?.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Retention sweep: drop showtimes not refreshed since `cutoff`.
    pub fn prune_showtimes_before(&self, cutoff: NaiveDateTime) -> Result<usize, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM showtimes WHERE last_updated < ?", params![cutoff])
            .map_err(StoreError::write("prune showtimes"))?;
        info!("Pruned {} showtimes last seen before {}", n, cutoff);
        Ok(n)
    }

    // ── Counts ────────────────────────────────────────────────────────────────

    pub fn cinema_count(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM cinemas")
    }

    pub fn movie_count(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM movies")
    }

    pub fn showtime_count(&self) -> Result<i64, StoreError> {
        self.count("SELECT COUNT(*) FROM showtimes")
    }

    pub fn showtime_count_for_cinema(&self, cinema_id: &str) -> Result<i64, StoreError> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM showtimes WHERE cinema_id = ?")?;
        Ok(s.query_row(params![cinema_id], |r| r.get(0))?)
    }

    fn count(&self, sql: &str) -> Result<i64, StoreError> {
        let mut s = self.conn.prepare(sql)?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Ingest run log ────────────────────────────────────────────────────────

    pub fn begin_ingest_run(&self) -> Result<i64, StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO ingest_runs (started_at, status) VALUES (?, 'running') RETURNING id",
        )?;
        stmt.query_row(params![Utc::now().naive_utc()], |r| r.get(0))
            .map_err(StoreError::write("begin ingest run"))
    }

    pub fn finish_ingest_run(
        &self,
        run_id: i64,
        cinemas_ok: usize,
        cinemas_failed: usize,
        showtimes: usize,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                r#"UPDATE ingest_runs SET
                   finished_at = ?, status = ?,
                   cinemas_ok = ?, cinemas_failed = ?, showtimes_upserted = ?, error_msg = ?
                   WHERE id = ?"#,
                params![
                    Utc::now().naive_utc(),
                    if error.is_none() { "success" } else { "partial" },
                    cinemas_ok as i64,
                    cinemas_failed as i64,
                    showtimes as i64,
                    error,
                    run_id,
                ],
            )
            .map_err(StoreError::write(format!("finish ingest run {}", run_id)))?;
        Ok(())
    }

    pub fn last_ingest_run(&self) -> Result<Option<IngestRunRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, started_at, finished_at, status,
                      cinemas_ok, cinemas_failed, showtimes_upserted, error_msg
               FROM ingest_runs ORDER BY id DESC LIMIT 1"#,
        )?;
        let mut rows = stmt.query_map([], |r| {
            Ok(IngestRunRow {
                id: r.get(0)?,
                started_at: r.get(1)?,
                finished_at: r.get(2)?,
                status: r.get(3)?,
                cinemas_ok: r.get(4)?,
                cinemas_failed: r.get(5)?,
                showtimes_upserted: r.get(6)?,
                error_msg: r.get(7)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
