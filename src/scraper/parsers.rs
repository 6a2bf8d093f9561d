//! Listing page extractor.
//!
//! Pure function of the document: no I/O, and malformed blocks degrade to
//! defaults instead of failing the page.

use crate::models::{MovieRecord, Showtime};
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

use super::cleaner::{
    absolute_url, clean_date_label, parse_info_line, slugify, squash_whitespace,
};

/// Marker on the inline style of the per-day label spans.
const DATE_STYLE_MARKER: &str = "text-align:left; display: block;";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub blocks_seen: usize,
    pub blocks_skipped: usize,
    pub duplicate_showtimes: usize,
    pub merged_blocks: usize,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub movies: Vec<MovieRecord>,
    pub report: ExtractionReport,
}

struct Selectors {
    block: Selector,
    title: Selector,
    details: Selector,
    info: Selector,
    poster: Selector,
    date_span: Selector,
    date_label: Selector,
}

pub struct ListingExtractor {
    base_url: Url,
    sel: Selectors,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

impl ListingExtractor {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid base URL {:?}: {}", base_url, e))?;

        Ok(Self {
            base_url,
            sel: Selectors {
                block: selector("div.row-fluid")?,
                title: selector("h1.borderLine span.bg")?,
                details: selector("div.span8")?,
                info: selector("p")?,
                poster: selector("p.icon190 img[src]")?,
                date_span: selector(&format!("span[style*=\"{}\"]", DATE_STYLE_MARKER))?,
                date_label: selector("b")?,
            },
        })
    }

    /// Movies on the page, sorted by title.
    pub fn extract(&self, html: &str, cinema_name: &str) -> Vec<MovieRecord> {
        self.extract_with_report(html, cinema_name).movies
    }

    /// Showtimes are unique per movie on (date, time, cinema); two films may
    /// share a slot on the same page.
    pub fn extract_with_report(&self, html: &str, cinema_name: &str) -> Extraction {
        let doc = Html::parse_document(html);
        let mut report = ExtractionReport::default();

        let mut movies: Vec<MovieRecord> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        let mut seen: Vec<HashSet<(String, String, String)>> = Vec::new();

        for block in doc.select(&self.sel.block) {
            report.blocks_seen += 1;

            let Some(movie) = self.parse_block(block, &mut report) else {
                report.blocks_skipped += 1;
                continue;
            };

            let details = block.select(&self.sel.details).next();
            let showtimes = details
                .map(|d| self.parse_showtimes(d, cinema_name))
                .unwrap_or_default();

            let idx = match by_id.get(&movie.id) {
                Some(&idx) => {
                    debug!(movie = %movie.id, "merging repeated movie block");
                    report.merged_blocks += 1;
                    idx
                }
                None => {
                    by_id.insert(movie.id.clone(), movies.len());
                    movies.push(movie);
                    seen.push(HashSet::new());
                    movies.len() - 1
                }
            };

            for st in showtimes {
                let key = (st.date.clone(), st.time.clone(), st.cinema.clone());
                if seen[idx].insert(key) {
                    movies[idx].showtimes.push(st);
                } else {
                    report.duplicate_showtimes += 1;
                }
            }
        }

        movies.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));

        for anomaly in &report.anomalies {
            warn!(cinema = cinema_name, "{}", anomaly);
        }
        debug!(
            cinema = cinema_name,
            blocks = report.blocks_seen,
            skipped = report.blocks_skipped,
            duplicates = report.duplicate_showtimes,
            movies = movies.len(),
            "extracted listing"
        );

        Extraction { movies, report }
    }

    /// Movie metadata from one block; `None` when the block has no title.
    fn parse_block(&self, block: ElementRef<'_>, report: &mut ExtractionReport) -> Option<MovieRecord> {
        let title = block
            .select(&self.sel.title)
            .next()
            .map(|el| squash_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())?;

        let id = slugify(&title);

        let mut movie = MovieRecord {
            id,
            title,
            genre: String::new(),
            duration: 0,
            language: String::new(),
            poster_url: String::new(),
            showtimes: Vec::new(),
        };

        match block.select(&self.sel.details).next() {
            Some(details) => {
                let info_text = details
                    .select(&self.sel.info)
                    .next()
                    .map(|p| squash_whitespace(&p.text().collect::<String>()))
                    .unwrap_or_default();

                let info = parse_info_line(&info_text);
                if let Some(raw) = &info.unparsed_duration {
                    report
                        .anomalies
                        .push(format!("{}: unparsed duration {:?}, using 0", movie.title, raw));
                }
                movie.genre = info.genre;
                movie.duration = info.duration;
                movie.language = info.language;
            }
            None => report
                .anomalies
                .push(format!("{}: no details column", movie.title)),
        }

        if let Some(src) = block
            .select(&self.sel.poster)
            .next()
            .and_then(|img| img.value().attr("src"))
        {
            movie.poster_url = absolute_url(&self.base_url, src);
        }

        Some(movie)
    }

    /// (date label, following time links) pairs inside the details column.
    /// Time links belong to the nearest preceding date label.
    fn parse_showtimes(&self, details: ElementRef<'_>, cinema_name: &str) -> Vec<Showtime> {
        let mut out = Vec::new();

        for date_span in details.select(&self.sel.date_span) {
            let label = date_span
                .select(&self.sel.date_label)
                .next()
                .map(|b| b.text().collect::<String>())
                .unwrap_or_else(|| date_span.text().collect::<String>());
            let date = clean_date_label(&label);

            for sibling in date_span.next_siblings().filter_map(ElementRef::wrap) {
                if self.is_date_span(sibling) {
                    break;
                }
                if !is_time_link(sibling) {
                    continue;
                }
                let time = squash_whitespace(&sibling.text().collect::<String>());
                if time.is_empty() {
                    continue;
                }
                let booking_link = sibling
                    .value()
                    .attr("href")
                    .map(|h| absolute_url(&self.base_url, h))
                    .unwrap_or_default();

                out.push(Showtime {
                    date: date.clone(),
                    time,
                    cinema: cinema_name.to_string(),
                    booking_link,
                });
            }
        }

        out
    }

    fn is_date_span(&self, el: ElementRef<'_>) -> bool {
        el.value().name() == "span"
            && el
                .value()
                .attr("style")
                .is_some_and(|s| s.contains(DATE_STYLE_MARKER))
    }
}

fn is_time_link(el: ElementRef<'_>) -> bool {
    el.value().name() == "a" && el.value().classes().any(|c| c == "btn")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.cinemadiroma.it";
    const LISTING: &str = include_str!("../../tests/fixtures/listing.html");
    const MESSY: &str = include_str!("../../tests/fixtures/listing_messy.html");

    fn extractor() -> ListingExtractor {
        ListingExtractor::new(BASE).unwrap()
    }

    #[test]
    fn test_two_blocks_one_without_showtimes() {
        let movies = extractor().extract(LISTING, "Multisala Lux");
        assert_eq!(movies.len(), 2);

        let anora = &movies[0];
        assert_eq!(anora.id, "anora");
        assert_eq!(anora.title, "Anora");
        assert_eq!(anora.genre, "Commedia");
        assert_eq!(anora.duration, 139);
        assert_eq!(anora.language, "Inglese sottotitolato");
        assert_eq!(anora.poster_url, "https://www.cinemadiroma.it/img/anora.jpg");
        assert_eq!(anora.showtimes.len(), 3);

        let gladiatore = &movies[1];
        assert_eq!(gladiatore.id, "il-gladiatore-ii");
        assert!(gladiatore.showtimes.is_empty());
    }

    #[test]
    fn test_sorted_by_title() {
        let movies = extractor().extract(MESSY, "Cinema Tibur");
        let titles: Vec<&str> = movies.iter().map(|m| m.title.as_str()).collect();
        let mut sorted = titles.clone();
        sorted.sort();
        assert_eq!(titles, sorted);
    }

    #[test]
    fn test_times_attach_to_their_own_date() {
        let movies = extractor().extract(LISTING, "Multisala Lux");
        let pairs: Vec<(&str, &str)> = movies[0]
            .showtimes
            .iter()
            .map(|s| (s.date.as_str(), s.time.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Lunedì 13 gennaio", "18:30"),
                ("Lunedì 13 gennaio", "21:00"),
                ("Martedì 14 gennaio", "21:00"),
            ]
        );
    }

    #[test]
    fn test_booking_links_are_absolute() {
        let movies = extractor().extract(LISTING, "Multisala Lux");
        for st in &movies[0].showtimes {
            assert!(st.booking_link.starts_with("https://"), "{}", st.booking_link);
            assert_eq!(st.cinema, "Multisala Lux");
        }
        assert_eq!(
            movies[0].showtimes[0].booking_link,
            "https://www.cinemadiroma.it/acquista?show=1001"
        );
    }

    #[test]
    fn test_deterministic_re_extraction() {
        let ex = extractor();
        let first = ex.extract_with_report(MESSY, "Cinema Tibur");
        let second = ex.extract_with_report(MESSY, "Cinema Tibur");
        assert_eq!(first, second);
    }

    #[test]
    fn test_showtime_tuples_unique_per_movie() {
        let extraction = extractor().extract_with_report(MESSY, "Cinema Tibur");
        for movie in &extraction.movies {
            let mut keys = HashSet::new();
            for st in &movie.showtimes {
                assert!(keys.insert((&st.date, &st.time, &st.cinema)), "duplicate in {}", movie.id);
            }
        }
        assert!(extraction.report.duplicate_showtimes >= 1);
    }

    #[test]
    fn test_messy_page_degrades_gracefully() {
        let extraction = extractor().extract_with_report(MESSY, "Cinema Tibur");
        let movies = &extraction.movies;

        // untitled block skipped, repeated "L'Ultimo Samurai" merged
        assert_eq!(extraction.report.blocks_skipped, 1);
        assert_eq!(extraction.report.merged_blocks, 1);
        let ids: Vec<&str> = movies.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["lultimo-samurai", "senza-dettagli", "vermiglio"]);

        let samurai = &movies[0];
        assert_eq!(samurai.duration, 0);
        assert_eq!(samurai.genre, "Azione");
        assert_eq!(samurai.showtimes.len(), 3);

        let bare = &movies[1];
        assert_eq!(bare.genre, "");
        assert_eq!(bare.duration, 0);
        assert!(bare.showtimes.is_empty());

        let vermiglio = &movies[2];
        assert_eq!(vermiglio.language, "");
        assert_eq!(vermiglio.showtimes.len(), 1);
        assert_eq!(vermiglio.showtimes[0].booking_link, "");

        assert!(extraction
            .report
            .anomalies
            .iter()
            .any(|a| a.contains("unparsed duration")));
    }

    #[test]
    fn test_page_without_blocks_is_empty() {
        let ex = extractor();
        assert!(ex.extract("<html><body><p>Chiuso per lavori</p></body></html>", "X").is_empty());
        assert!(ex.extract("", "X").is_empty());
        assert!(ex.extract("<div class=\"row-fluid\"><p>banner</p></div>", "X").is_empty());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(ListingExtractor::new("not a url").is_err());
    }
}
