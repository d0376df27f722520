use crate::models::{Listing, Source};
use crate::scrapers::types::{SearchQuery, SourceError};
use async_trait::async_trait;

/// Common trait for all listing scrapers.
/// Adding a source means adding a variant to `Source` and an implementation
/// here; the scheduler never names a concrete site.
#[async_trait]
pub trait ScraperTrait: Send + Sync {
    /// Fetch the current listing set for a query and normalize it.
    ///
    /// An empty result is `Ok(vec![])`, not an error. Individual records
    /// that cannot be normalized are dropped with a warning.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceError>;

    /// Which source this scraper covers.
    fn source(&self) -> Source;
}
