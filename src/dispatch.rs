//! Routing of matched listings to their delivery channel.
//!
//! The dispatcher decides *where* a listing goes and paces hand-offs; the
//! actual sending belongs to the messaging collaborator behind
//! `ListingSink`. Destination resolution is evaluated at dispatch time, so
//! a group topic configured mid-session takes effect on the next pass.

use crate::config::Config;
use crate::models::{Destination, Listing, UserFilter};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Delay between consecutive hand-offs to the same destination, so one
/// busy pass does not flood a single chat.
const PACING_DELAY: Duration = Duration::from_millis(1200);

/// Messaging collaborator seam. Implementations send the listing text and
/// photo and own all transport-level retry behavior.
#[async_trait]
pub trait ListingSink: Send + Sync {
    async fn deliver(&self, destination: Destination, listing: &Listing) -> Result<()>;
}

/// Resolves where a user's matches go: the user's stored override wins,
/// then the process-wide group default, then the direct chat.
pub fn resolve_destination(filter: &UserFilter, config: &Config) -> Destination {
    if let Some(over) = filter.delivery_override {
        return Destination::GroupTopic {
            chat_id: over.chat_id,
            topic_id: over.topic_id,
        };
    }
    if let Some(chat_id) = config.group_chat_id {
        return Destination::GroupTopic {
            chat_id,
            topic_id: config.group_topic_id,
        };
    }
    Destination::Direct {
        chat_id: filter.user_id,
    }
}

pub struct Dispatcher {
    sink: Box<dyn ListingSink>,
    pacing: Duration,
    last_handoff: HashMap<Destination, Instant>,
}

impl Dispatcher {
    pub fn new(sink: Box<dyn ListingSink>) -> Self {
        Self {
            sink,
            pacing: PACING_DELAY,
            last_handoff: HashMap::new(),
        }
    }

    /// Dispatcher without pacing delays, for tests.
    pub fn unpaced(sink: Box<dyn ListingSink>) -> Self {
        Self {
            sink,
            pacing: Duration::ZERO,
            last_handoff: HashMap::new(),
        }
    }

    /// Routes one matched listing and hands it to the sink, waiting out the
    /// pacing window for that destination first.
    pub async fn dispatch(
        &mut self,
        filter: &UserFilter,
        config: &Config,
        listing: &Listing,
    ) -> Result<()> {
        let destination = resolve_destination(filter, config);

        if let Some(last) = self.last_handoff.get(&destination) {
            let elapsed = last.elapsed();
            if elapsed < self.pacing {
                tokio::time::sleep(self.pacing - elapsed).await;
            }
        }

        debug!(
            user_id = filter.user_id,
            source = %listing.source,
            external_id = %listing.external_id,
            "Dispatching listing"
        );
        let result = self.sink.deliver(destination, listing).await;
        self.last_handoff.insert(destination, Instant::now());
        result
    }
}
