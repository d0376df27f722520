//! Periodic monitoring: poll sources per user filter, match, dedup and
//! dispatch new listings.
//!
//! One long-lived `Monitor` owns all pass state; there are no globals. The
//! driver is strictly sequential across users and across passes, so dedup
//! writes are single-writer by construction; only the outbound fetches of
//! one user run concurrently.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::extract::enrich;
use crate::matcher::matches;
use crate::models::{Listing, Source, UserFilter};
use crate::scrapers::{scraper_for, ScraperTrait, SearchQuery, SourceError};
use crate::store::{Database, MarkOutcome, StoreError};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const SEEN_RETENTION_DAYS: u32 = 30;

/// Where a user's monitoring currently stands, for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    Idle,
    Running,
    Paused,
}

/// Read-only health state exposed to the dashboard collaborator.
#[derive(Debug, Clone, Default)]
pub struct Health {
    /// Last successful fetch per source; stops advancing when a source is
    /// down, which is exactly the signal the dashboard wants.
    pub last_success: HashMap<Source, DateTime<Utc>>,
    pub user_status: HashMap<i64, PassStatus>,
}

/// Cheap cloneable read handle for collaborators outside the scheduler.
#[derive(Clone)]
pub struct HealthHandle(Arc<RwLock<Health>>);

impl HealthHandle {
    pub fn snapshot(&self) -> Health {
        self.0.read().expect("health lock poisoned").clone()
    }
}

/// Counters for one full pass, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub users_processed: usize,
    pub listings_dispatched: usize,
    pub sources_failed: usize,
}

pub struct Monitor {
    db: Database,
    scrapers: Vec<Arc<dyn ScraperTrait>>,
    dispatcher: Dispatcher,
    config: Config,
    health: Arc<RwLock<Health>>,
}

impl Monitor {
    pub fn new(
        db: Database,
        scrapers: Vec<Arc<dyn ScraperTrait>>,
        dispatcher: Dispatcher,
        config: Config,
    ) -> Self {
        Self {
            db,
            scrapers,
            dispatcher,
            config,
            health: Arc::new(RwLock::new(Health::default())),
        }
    }

    pub fn health_handle(&self) -> HealthHandle {
        HealthHandle(self.health.clone())
    }

    /// Drives passes forever at the configured interval. A pass that
    /// overruns the interval delays the next tick; passes never overlap.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_pass().await {
                Ok(stats) => {
                    info!(
                        users = stats.users_processed,
                        dispatched = stats.listings_dispatched,
                        failed_sources = stats.sources_failed,
                        "Pass complete"
                    );
                }
                Err(e) => error!("Pass aborted: {e}"),
            }

            if let Err(e) = self.db.cleanup_seen_older_than(SEEN_RETENTION_DAYS) {
                warn!("Retention sweep failed: {e}");
            }
        }
    }

    /// One full pass over all active user filters.
    ///
    /// Per-user failures (persistence included) are contained to that user;
    /// only failing to list the active filters aborts the pass itself.
    pub async fn run_pass(&mut self) -> Result<PassStats, StoreError> {
        let filters = self.db.get_filters()?;
        if filters.is_empty() {
            debug!("No active filters, skipping pass");
            return Ok(PassStats::default());
        }

        let mut stats = PassStats::default();
        for filter in filters {
            // Pause signals apply instantly between users: re-read the flag
            // rather than trusting the snapshot taken at pass start.
            match self.db.is_paused(filter.user_id) {
                Ok(true) => {
                    self.set_status(filter.user_id, PassStatus::Paused);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(user_id = filter.user_id, "Pause check failed: {e}");
                    continue;
                }
            }

            self.set_status(filter.user_id, PassStatus::Running);
            match self.process_user(&filter).await {
                Ok((dispatched, failed_sources)) => {
                    stats.users_processed += 1;
                    stats.listings_dispatched += dispatched;
                    stats.sources_failed += failed_sources;
                    if dispatched > 0 {
                        info!(
                            user_id = filter.user_id,
                            dispatched, "Sent new listings to user"
                        );
                    }
                }
                // Without the dedup ledger this user's at-most-once
                // guarantee is gone, so their pass stops here. Other
                // users are unaffected.
                Err(e) => error!(user_id = filter.user_id, "User pass aborted: {e}"),
            }
            self.set_status(filter.user_id, PassStatus::Idle);
        }

        Ok(stats)
    }

    /// Fetches, matches, dedups and dispatches for a single user.
    /// Returns (listings dispatched, sources failed).
    async fn process_user(&mut self, filter: &UserFilter) -> Result<(usize, usize), StoreError> {
        let query = SearchQuery::from_filter(filter);
        let sources = self.effective_sources(filter);

        // The per-user fetches are independent reads; run them together
        // (at most one per source, so parallelism is bounded by 3).
        let fetches = sources.iter().filter_map(|source| {
            let scraper = scraper_for(&self.scrapers, *source)?;
            let query = query.clone();
            Some(async move { (scraper.source(), scraper.search(&query).await) })
        });
        let results: Vec<(Source, Result<Vec<Listing>, SourceError>)> = join_all(fetches).await;

        // An in-flight fetch completes even if the user paused meanwhile,
        // but nothing gets marked or delivered afterwards.
        if self.db.is_paused(filter.user_id)? {
            self.set_status(filter.user_id, PassStatus::Paused);
            return Ok((0, 0));
        }

        let mut dispatched = 0;
        let mut failed_sources = 0;
        for (source, result) in results {
            let listings = match result {
                Ok(listings) => {
                    self.record_success(source);
                    listings
                }
                // One broken source degrades coverage, never availability.
                Err(e) => {
                    warn!(user_id = filter.user_id, %source, "Source skipped: {e}");
                    failed_sources += 1;
                    continue;
                }
            };

            for listing in listings {
                let listing = enrich(listing);
                if !matches(&listing, filter) {
                    continue;
                }

                // Marking before the hand-off favors no-duplicate over
                // guaranteed-delivery: a failed send is logged and lost,
                // never repeated.
                match self
                    .db
                    .mark_seen(filter.user_id, listing.source, &listing.external_id)?
                {
                    MarkOutcome::AlreadyMarked => continue,
                    MarkOutcome::Inserted => {}
                }

                if let Err(e) = self
                    .dispatcher
                    .dispatch(filter, &self.config, &listing)
                    .await
                {
                    error!(
                        user_id = filter.user_id,
                        external_id = %listing.external_id,
                        "Delivery failed, listing dropped: {e}"
                    );
                    continue;
                }
                dispatched += 1;
            }
        }

        Ok((dispatched, failed_sources))
    }

    /// Sources polled for this filter: the user's choice (or everything if
    /// they never narrowed it), limited to what the process has enabled.
    fn effective_sources(&self, filter: &UserFilter) -> Vec<Source> {
        let user_sources: &[Source] = if filter.enabled_sources.is_empty() {
            &Source::ALL
        } else {
            &filter.enabled_sources
        };
        user_sources
            .iter()
            .filter(|s| self.config.default_sources.contains(s))
            .copied()
            .collect()
    }

    fn record_success(&self, source: Source) {
        let mut health = self.health.write().expect("health lock poisoned");
        health.last_success.insert(source, Utc::now());
    }

    fn set_status(&self, user_id: i64, status: PassStatus) {
        let mut health = self.health.write().expect("health lock poisoned");
        health.user_status.insert(user_id, status);
    }
}
