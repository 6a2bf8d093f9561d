use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Cinema registry ───────────────────────────────────────────────────────────

/// One row of the static cinema registry, as written in `config/*.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CinemaEntry {
    pub id: String,
    pub name: String,
    /// Listing page path relative to the chain's base URL.
    pub path: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub icon_url: String,
}

// ── Cinema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cinema {
    pub id: String,
    pub name: String,
    pub chain: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub website: String,       // listing page, also the scrape target
    pub icon_url: String,
}

impl Cinema {
    pub fn from_entry(entry: &CinemaEntry, chain: &str, base_url: &str) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            chain: chain.to_string(),
            latitude: entry.latitude,
            longitude: entry.longitude,
            website: listing_url(base_url, &entry.path),
            icon_url: entry.icon_url.clone(),
        }
    }
}

/// "https://site.it/" + "/programmazione-x" → "https://site.it/programmazione-x"
pub fn listing_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ── Movies & showtimes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Showtime {
    pub date: String,          // day label as printed on the listing, e.g. "Lunedì 13 gennaio"
    pub time: String,          // "21:00"
    pub cinema: String,        // cinema display name
    pub booking_link: String,  // absolute URL, empty when the page has none
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MovieRecord {
    pub id: String,
    pub title: String,
    pub genre: String,
    /// Minutes; 0 means the duration could not be parsed.
    pub duration: u32,
    pub language: String,
    pub poster_url: String,
    pub showtimes: Vec<Showtime>,
}

// ── Read-side rows ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CinemaRow {
    pub cinema: Cinema,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MovieSummary {
    pub id: String,
    pub title: String,
    pub genre: String,
    pub duration: u32,
    pub language: String,
    pub showtimes: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestRunRow {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub cinemas_ok: i64,
    pub cinemas_failed: i64,
    pub showtimes_upserted: i64,
    pub error_msg: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url_joins_without_double_slash() {
        assert_eq!(
            listing_url("https://www.cinemadiroma.it/", "/programmazione-multisala-lux"),
            "https://www.cinemadiroma.it/programmazione-multisala-lux"
        );
        assert_eq!(
            listing_url("https://www.cinemadiroma.it", "programmazione-cinema-tibur"),
            "https://www.cinemadiroma.it/programmazione-cinema-tibur"
        );
    }

    #[test]
    fn test_cinema_from_entry() {
        let entry = CinemaEntry {
            id: "lux".into(),
            name: "Multisala Lux".into(),
            path: "programmazione-multisala-lux".into(),
            latitude: Some(41.8819),
            longitude: Some(12.4987),
            icon_url: String::new(),
        };
        let c = Cinema::from_entry(&entry, "Cinema di Roma", "https://www.cinemadiroma.it");
        assert_eq!(c.id, "lux");
        assert_eq!(c.chain, "Cinema di Roma");
        assert_eq!(c.website, "https://www.cinemadiroma.it/programmazione-multisala-lux");
        assert_eq!(c.latitude, Some(41.8819));
    }
}
