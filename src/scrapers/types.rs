use crate::models::{Source, UserFilter};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Search constraints a source site can apply server-side.
///
/// Only the filter fields the sites accept as query parameters live here;
/// everything else is enforced locally by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub city: String,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub area_min: Option<f64>,
    pub kitchen_min: Option<f64>,
    /// Accepted room counts; empty = any.
    pub rooms: Vec<u32>,
    pub no_commission: bool,
}

impl SearchQuery {
    /// Projects the server-side-filterable slice of a user filter.
    pub fn from_filter(filter: &UserFilter) -> Self {
        Self {
            city: filter.city.clone(),
            price_min: filter.price_min,
            price_max: filter.price_max,
            area_min: filter.area_min,
            kitchen_min: filter.kitchen_min,
            rooms: filter.rooms.clone(),
            no_commission: filter.no_commission_only,
        }
    }
}

/// Fetch-level failure of one source. Record-level parse misses are not
/// errors; they are dropped inside the parser with a warning.
#[derive(Debug)]
pub enum SourceError {
    /// Network failure, non-2xx status, captcha wall or an unrecognizable
    /// page schema, after retries were exhausted. The scheduler skips the
    /// source for this pass and carries on.
    Unavailable { source: Source, reason: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable { source, reason } => {
                write!(f, "source {source} unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    pub fn unavailable(source: Source, reason: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source,
            reason: reason.into(),
        }
    }
}
