pub mod avito;
pub mod cian;
pub mod client;
pub mod traits;
pub mod types;
pub mod yandex;

pub use avito::AvitoScraper;
pub use cian::CianScraper;
pub use client::PageClient;
pub use traits::ScraperTrait;
pub use types::{SearchQuery, SourceError};
pub use yandex::YandexScraper;

use crate::models::Source;
use std::sync::Arc;

/// Builds one scraper per supported source over a shared HTTP client.
pub fn all_scrapers(client: Arc<PageClient>) -> Vec<Arc<dyn ScraperTrait>> {
    vec![
        Arc::new(CianScraper::new(client.clone())),
        Arc::new(YandexScraper::new(client.clone())),
        Arc::new(AvitoScraper::new(client)),
    ]
}

/// Convenience lookup used by the monitor when a filter enables a subset.
pub fn scraper_for(
    scrapers: &[Arc<dyn ScraperTrait>],
    source: Source,
) -> Option<Arc<dyn ScraperTrait>> {
    scrapers.iter().find(|s| s.source() == source).cloned()
}
