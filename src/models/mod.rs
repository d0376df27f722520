use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source of the rental listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cian,
    Yandex,
    Avito,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Cian, Source::Yandex, Source::Avito];

    /// Stable key used in the database and in config values.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cian => "cian",
            Source::Yandex => "yandex",
            Source::Avito => "avito",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "cian" => Some(Source::Cian),
            "yandex" => Some(Source::Yandex),
            "avito" => Some(Source::Avito),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renovation class of the flat, mapped from source-specific vocabulary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Renovation {
    Cosmetic,
    Euro,
    Designer,
    NoRenovation,
    Unknown,
}

impl Renovation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Renovation::Cosmetic => "cosmetic",
            Renovation::Euro => "euro",
            Renovation::Designer => "designer",
            Renovation::NoRenovation => "no_renovation",
            Renovation::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Renovation {
        match s {
            "cosmetic" => Renovation::Cosmetic,
            "euro" => Renovation::Euro,
            "designer" => Renovation::Designer,
            "no_renovation" => Renovation::NoRenovation,
            _ => Renovation::Unknown,
        }
    }
}

/// Whether the landlord accepts pets. Derived heuristically from the
/// description text, so Unknown is common.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PetPolicy {
    Allowed,
    Forbidden,
    Unknown,
}

/// Core listing data model, one normalized rental advertisement.
///
/// Immutable once constructed; re-fetching the same external_id yields a
/// fresh value rather than mutating a stored one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub source: Source,
    /// Listing id as assigned by the source site; unique within a source.
    pub external_id: String,
    pub url: String,
    pub title: String,
    /// Monthly rent in rubles.
    pub price: i64,
    /// 0 = studio.
    pub rooms: u32,
    pub area_m2: f64,
    pub kitchen_area_m2: Option<f64>,
    pub city: String,
    pub renovation: Renovation,
    pub pets: PetPolicy,
    pub metro_station: Option<String>,
    /// Minutes on foot to the nearest metro, normalized across sources.
    pub metro_minutes: Option<u32>,
    pub no_commission: bool,
    pub photo_url: Option<String>,
    /// Raw description text, kept for heuristics and auditing.
    pub description: String,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Per-user delivery override: route matches into a group chat topic
/// instead of the user's direct chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryOverride {
    pub chat_id: i64,
    pub topic_id: Option<i64>,
}

/// A user's standing search criteria. Built by the bot's filter wizard;
/// the monitoring core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFilter {
    pub user_id: i64,
    pub city: String,
    /// Accepted room counts; empty = any.
    pub rooms: Vec<u32>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub area_min: Option<f64>,
    pub area_max: Option<f64>,
    pub kitchen_min: Option<f64>,
    /// Accepted renovation classes; empty = any.
    pub renovation_types: Vec<Renovation>,
    pub no_commission_only: bool,
    pub pets_required: bool,
    pub enabled_sources: Vec<Source>,
    pub paused: bool,
    pub delivery_override: Option<DeliveryOverride>,
}

impl UserFilter {
    pub fn new(user_id: i64, city: impl Into<String>) -> Self {
        Self {
            user_id,
            city: city.into(),
            rooms: Vec::new(),
            price_min: None,
            price_max: None,
            area_min: None,
            area_max: None,
            kitchen_min: None,
            renovation_types: Vec::new(),
            no_commission_only: false,
            pets_required: false,
            enabled_sources: Source::ALL.to_vec(),
            paused: false,
            delivery_override: None,
        }
    }
}

/// Durable fact: this listing was already evaluated/delivered for this user.
/// The (user_id, source, external_id) triple is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenRecord {
    pub user_id: i64,
    pub source: Source,
    pub external_id: String,
    pub seen_at: DateTime<Utc>,
}

/// Where a matched listing gets delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Direct { chat_id: i64 },
    GroupTopic { chat_id: i64, topic_id: Option<i64> },
}

impl Destination {
    pub fn chat_id(&self) -> i64 {
        match self {
            Destination::Direct { chat_id } => *chat_id,
            Destination::GroupTopic { chat_id, .. } => *chat_id,
        }
    }
}
