//! End-to-end pipeline properties: at-most-once delivery, per-source
//! isolation and pause/resume behavior, driven through a real on-disk
//! store with scripted scrapers and a capturing sink.

use async_trait::async_trait;
use rental_scout::config::Config;
use rental_scout::dispatch::{Dispatcher, ListingSink};
use rental_scout::models::{Destination, Listing, PetPolicy, Renovation, Source, UserFilter};
use rental_scout::monitor::{Monitor, PassStatus};
use rental_scout::scrapers::{ScraperTrait, SearchQuery, SourceError};
use rental_scout::store::Database;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Scraper whose result set and availability the test scripts from outside.
struct ScriptedScraper {
    source: Source,
    listings: Arc<Mutex<Vec<Listing>>>,
    down: Arc<AtomicBool>,
}

impl ScriptedScraper {
    fn new(source: Source) -> (Arc<Self>, Arc<Mutex<Vec<Listing>>>, Arc<AtomicBool>) {
        let listings = Arc::new(Mutex::new(Vec::new()));
        let down = Arc::new(AtomicBool::new(false));
        let scraper = Arc::new(Self {
            source,
            listings: listings.clone(),
            down: down.clone(),
        });
        (scraper, listings, down)
    }
}

#[async_trait]
impl ScraperTrait for ScriptedScraper {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<Listing>, SourceError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable(self.source, "scripted outage"));
        }
        Ok(self.listings.lock().unwrap().clone())
    }

    fn source(&self) -> Source {
        self.source
    }
}

/// Sink that records every hand-off instead of sending anything.
#[derive(Clone, Default)]
struct CapturingSink {
    deliveries: Arc<Mutex<Vec<(Destination, Source, String)>>>,
}

#[async_trait]
impl ListingSink for CapturingSink {
    async fn deliver(&self, destination: Destination, listing: &Listing) -> anyhow::Result<()> {
        self.deliveries.lock().unwrap().push((
            destination,
            listing.source,
            listing.external_id.clone(),
        ));
        Ok(())
    }
}

fn test_config(db_path: &Path) -> Config {
    Config {
        bot_token: "test-token".to_string(),
        db_path: db_path.to_path_buf(),
        check_interval: Duration::from_secs(60),
        default_sources: Source::ALL.to_vec(),
        group_chat_id: None,
        group_topic_id: None,
    }
}

fn listing(source: Source, external_id: &str, price: i64, description: &str) -> Listing {
    Listing {
        source,
        external_id: external_id.to_string(),
        url: format!("https://example.com/{external_id}"),
        title: "1-комн. квартира, 35 м²".to_string(),
        price,
        rooms: 1,
        area_m2: 35.0,
        kitchen_area_m2: Some(9.0),
        city: "Москва".to_string(),
        renovation: Renovation::Unknown,
        pets: PetPolicy::Unknown,
        metro_station: None,
        metro_minutes: None,
        no_commission: false,
        photo_url: None,
        description: description.to_string(),
        posted_at: None,
    }
}

struct Harness {
    _dir: TempDir,
    monitor: Monitor,
    sink: CapturingSink,
    /// Second connection to the same database, playing the role of the bot
    /// wizard and pause/resume commands.
    control: Database,
    cian: Arc<Mutex<Vec<Listing>>>,
    cian_down: Arc<AtomicBool>,
    yandex: Arc<Mutex<Vec<Listing>>>,
    avito: Arc<Mutex<Vec<Listing>>>,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("scout.db");
    let config = test_config(&db_path);

    let (cian_scraper, cian, cian_down) = ScriptedScraper::new(Source::Cian);
    let (yandex_scraper, yandex, _) = ScriptedScraper::new(Source::Yandex);
    let (avito_scraper, avito, _) = ScriptedScraper::new(Source::Avito);
    let scrapers: Vec<Arc<dyn ScraperTrait>> = vec![cian_scraper, yandex_scraper, avito_scraper];

    let sink = CapturingSink::default();
    let dispatcher = Dispatcher::unpaced(Box::new(sink.clone()));

    let db = Database::open(&db_path).unwrap();
    let control = Database::open(&db_path).unwrap();
    let monitor = Monitor::new(db, scrapers, dispatcher, config);

    Harness {
        _dir: dir,
        monitor,
        sink,
        control,
        cian,
        cian_down,
        yandex,
        avito,
    }
}

fn delivered(sink: &CapturingSink) -> Vec<(Source, String)> {
    sink.deliveries
        .lock()
        .unwrap()
        .iter()
        .map(|(_, s, id)| (*s, id.clone()))
        .collect()
}

#[tokio::test]
async fn same_listing_is_dispatched_at_most_once_across_passes() {
    let mut h = harness();
    h.control.upsert_filter(&UserFilter::new(42, "Москва")).unwrap();
    h.cian.lock().unwrap().push(listing(Source::Cian, "123", 45_000, ""));

    let stats = h.monitor.run_pass().await.unwrap();
    assert_eq!(stats.listings_dispatched, 1);
    assert_eq!(delivered(&h.sink), vec![(Source::Cian, "123".to_string())]);

    // Second pass re-fetches and re-parses the identical record.
    let stats = h.monitor.run_pass().await.unwrap();
    assert_eq!(stats.listings_dispatched, 0);
    assert_eq!(delivered(&h.sink).len(), 1);
}

#[tokio::test]
async fn broken_source_does_not_stall_the_others() {
    let mut h = harness();
    h.control.upsert_filter(&UserFilter::new(42, "Москва")).unwrap();

    h.cian_down.store(true, Ordering::SeqCst);
    h.yandex.lock().unwrap().push(listing(Source::Yandex, "y1", 40_000, ""));
    h.avito.lock().unwrap().push(listing(Source::Avito, "a1", 38_000, ""));

    let stats = h.monitor.run_pass().await.unwrap();
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.listings_dispatched, 2);

    let ids: Vec<Source> = delivered(&h.sink).iter().map(|(s, _)| *s).collect();
    assert!(ids.contains(&Source::Yandex));
    assert!(ids.contains(&Source::Avito));

    // Health advances only for the sources that answered.
    let health = h.monitor.health_handle().snapshot();
    assert!(health.last_success.contains_key(&Source::Yandex));
    assert!(health.last_success.contains_key(&Source::Avito));
    assert!(!health.last_success.contains_key(&Source::Cian));
}

#[tokio::test]
async fn paused_user_gets_nothing_and_resume_does_not_replay() {
    let mut h = harness();
    h.control.upsert_filter(&UserFilter::new(42, "Москва")).unwrap();

    h.cian.lock().unwrap().push(listing(Source::Cian, "a", 45_000, ""));
    h.monitor.run_pass().await.unwrap();
    assert_eq!(delivered(&h.sink).len(), 1);

    // Pause, then a new listing appears.
    h.control.set_paused(42, true).unwrap();
    h.cian.lock().unwrap().push(listing(Source::Cian, "b", 46_000, ""));

    let stats = h.monitor.run_pass().await.unwrap();
    assert_eq!(stats.listings_dispatched, 0);
    assert_eq!(delivered(&h.sink).len(), 1);
    // Nothing was marked while paused either.
    assert!(!h.control.has_seen(42, Source::Cian, "b").unwrap());
    let health = h.monitor.health_handle().snapshot();
    assert_eq!(health.user_status.get(&42), Some(&PassStatus::Paused));

    // Resume: only the listing that was never marked comes through.
    h.control.set_paused(42, false).unwrap();
    let stats = h.monitor.run_pass().await.unwrap();
    assert_eq!(stats.listings_dispatched, 1);
    assert_eq!(
        delivered(&h.sink).last().unwrap(),
        &(Source::Cian, "b".to_string())
    );
    let health = h.monitor.health_handle().snapshot();
    assert_eq!(health.user_status.get(&42), Some(&PassStatus::Idle));
}

#[tokio::test]
async fn unknown_pet_policy_never_reaches_a_pets_required_user() {
    let mut h = harness();
    let mut filter = UserFilter::new(42, "Москва");
    filter.pets_required = true;
    h.control.upsert_filter(&filter).unwrap();

    h.cian.lock().unwrap().extend([
        listing(Source::Cian, "silent", 45_000, "Просторная квартира"),
        listing(Source::Cian, "friendly", 45_000, "Можно с животными"),
        listing(Source::Cian, "banned", 45_000, "Без животных и без детей"),
    ]);

    h.monitor.run_pass().await.unwrap();
    assert_eq!(delivered(&h.sink), vec![(Source::Cian, "friendly".to_string())]);
}

#[tokio::test]
async fn non_matching_listing_is_not_burned_for_later() {
    let mut h = harness();
    let mut filter = UserFilter::new(42, "Москва");
    filter.price_max = Some(40_000);
    h.control.upsert_filter(&filter).unwrap();

    h.cian.lock().unwrap().push(listing(Source::Cian, "pricey", 45_000, ""));
    h.monitor.run_pass().await.unwrap();
    assert!(delivered(&h.sink).is_empty());

    // The wizard loosens the budget; the old listing is still deliverable
    // because non-matches are never marked seen.
    filter.price_max = Some(50_000);
    h.control.upsert_filter(&filter).unwrap();

    h.monitor.run_pass().await.unwrap();
    assert_eq!(delivered(&h.sink), vec![(Source::Cian, "pricey".to_string())]);
}

#[tokio::test]
async fn filter_limited_to_one_source_only_polls_it() {
    let mut h = harness();
    let mut filter = UserFilter::new(42, "Москва");
    filter.enabled_sources = vec![Source::Yandex];
    h.control.upsert_filter(&filter).unwrap();

    h.cian.lock().unwrap().push(listing(Source::Cian, "c1", 45_000, ""));
    h.yandex.lock().unwrap().push(listing(Source::Yandex, "y1", 45_000, ""));

    h.monitor.run_pass().await.unwrap();
    assert_eq!(delivered(&h.sink), vec![(Source::Yandex, "y1".to_string())]);
}
