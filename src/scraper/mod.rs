pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::error::FetchError;
use async_trait::async_trait;

pub use self::http_client::HttpClient;
pub use self::parsers::ListingExtractor;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Where listing documents come from. The orchestrator only needs raw text.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl ListingSource for HttpClient {
    async fn fetch_listing(&self, url: &str) -> Result<String, FetchError> {
        self.get_text(url).await
    }
}
