//! Normalisation helpers for raw listing text.

use url::Url;

pub const GENRE_LABEL: &str = "Genere:";
pub const DURATION_LABEL: &str = "Durata:";
pub const LANGUAGE_LABEL: &str = "Lingua:";
const DURATION_UNIT: &str = "min.";

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Movie identifier from its title.
/// "L'Ultimo  Samurai" → "lultimo-samurai"
pub fn slugify(title: &str) -> String {
    title
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !matches!(c, '\'' | '’' | '‘'))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Collapse runs of whitespace (including newlines from nested markup).
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "Lunedì 13 gennaio:" → "Lunedì 13 gennaio"
pub fn clean_date_label(s: &str) -> String {
    squash_whitespace(s).trim_end_matches(':').trim_end().to_string()
}

// ── Info line ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovieInfo {
    pub genre: String,
    pub duration: u32,
    pub language: String,
    /// Set when a duration label was present but its value did not parse.
    pub unparsed_duration: Option<String>,
}

/// Parse "Genere: Drammatico - Durata: 120 min. - Lingua: Italiano".
///
/// Missing labels leave the field at its default; never fails.
pub fn parse_info_line(text: &str) -> MovieInfo {
    let mut info = MovieInfo::default();

    if let Some(rest) = after_label(text, GENRE_LABEL) {
        info.genre = rest.split('-').next().unwrap_or_default().trim().to_string();
    }

    if let Some(rest) = after_label(text, DURATION_LABEL) {
        let raw = rest.split(DURATION_UNIT).next().unwrap_or_default().trim();
        match parse_duration(raw) {
            Some(minutes) => info.duration = minutes,
            None => info.unparsed_duration = Some(raw.to_string()),
        }
    }

    if let Some(rest) = after_label(text, LANGUAGE_LABEL) {
        info.language = rest.trim().to_string();
    }

    info
}

fn after_label<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.split_once(label).map(|(_, rest)| rest)
}

/// "120" → 120 | "120 min" → 120 | "1h 40" → None
pub fn parse_duration(s: &str) -> Option<u32> {
    let s = s.trim();
    let s = s.strip_suffix("min").unwrap_or(s).trim();
    s.parse().ok()
}

// ── URLs ──────────────────────────────────────────────────────────────────────

/// Resolve a possibly-relative href against the site base.
/// Returns the trimmed input unchanged when it cannot be resolved.
pub fn absolute_url(base: &Url, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Il Gladiatore II"), "il-gladiatore-ii");
        assert_eq!(slugify("L'Ultimo Samurai"), "lultimo-samurai");
        assert_eq!(slugify("  Dune:   Parte  Due \n"), "dune:-parte-due");
        assert_eq!(slugify("L’amica geniale"), "lamica-geniale");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_slug_collision_is_deterministic() {
        assert_eq!(slugify("Its Alive"), slugify("It's Alive"));
    }

    #[test]
    fn test_parse_info_line_full() {
        let info = parse_info_line("Genere: Drammatico - Durata: 120 min. - Lingua: Italiano");
        assert_eq!(info.genre, "Drammatico");
        assert_eq!(info.duration, 120);
        assert_eq!(info.language, "Italiano");
        assert_eq!(info.unparsed_duration, None);
    }

    #[test]
    fn test_parse_info_line_missing_labels() {
        let info = parse_info_line("Regia: Qualcuno");
        assert_eq!(info, MovieInfo::default());
    }

    #[test]
    fn test_unparseable_duration_defaults_to_zero() {
        let info = parse_info_line("Genere: Commedia - Durata: n.d. - Lingua: Inglese");
        assert_eq!(info.duration, 0);
        assert_eq!(info.unparsed_duration.as_deref(), Some("n.d. - Lingua: Inglese"));
        assert_eq!(info.genre, "Commedia");
        assert_eq!(info.language, "Inglese");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("95"), Some(95));
        assert_eq!(parse_duration(" 95 min"), Some(95));
        assert_eq!(parse_duration("1h 40"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_clean_date_label() {
        assert_eq!(clean_date_label(" Lunedì 13\n gennaio: "), "Lunedì 13 gennaio");
        assert_eq!(clean_date_label("Oggi:"), "Oggi");
    }

    #[test]
    fn test_absolute_url() {
        let base = Url::parse("https://www.cinemadiroma.it").unwrap();
        assert_eq!(
            absolute_url(&base, "/acquista/123"),
            "https://www.cinemadiroma.it/acquista/123"
        );
        assert_eq!(
            absolute_url(&base, "https://tickets.example.com/x?id=1"),
            "https://tickets.example.com/x?id=1"
        );
        assert_eq!(absolute_url(&base, "  "), "");
    }
}
