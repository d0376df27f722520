//! Minimal Telegram Bot API sink.
//!
//! Sends a short plain-text summary per listing (photo variant when the
//! source provided one). Rich message templating lives with the bot, not
//! here; this sink only needs to get a matched listing in front of the
//! user.

use crate::dispatch::ListingSink;
use crate::models::{Destination, Listing};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TelegramSink {
    client: Client,
    api_base: String,
}

impl TelegramSink {
    pub fn new(bot_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create Telegram HTTP client")?;
        Ok(Self {
            client,
            api_base: format!("https://api.telegram.org/bot{bot_token}"),
        })
    }

    fn payload(destination: Destination, listing: &Listing) -> (&'static str, Value) {
        let text = summary(listing);
        let mut body = json!({
            "chat_id": destination.chat_id(),
            "disable_web_page_preview": false,
        });

        if let Destination::GroupTopic { topic_id: Some(topic_id), .. } = destination {
            body["message_thread_id"] = json!(topic_id);
        }

        match &listing.photo_url {
            Some(photo) => {
                body["photo"] = json!(photo);
                body["caption"] = json!(text);
                ("sendPhoto", body)
            }
            None => {
                body["text"] = json!(text);
                ("sendMessage", body)
            }
        }
    }
}

fn summary(listing: &Listing) -> String {
    let mut lines = vec![
        listing.title.clone(),
        format!("{} ₽/мес · {} м²", listing.price, listing.area_m2),
    ];
    if let Some(station) = &listing.metro_station {
        match listing.metro_minutes {
            Some(minutes) => lines.push(format!("м. {station}, {minutes} мин пешком")),
            None => lines.push(format!("м. {station}")),
        }
    }
    lines.push(listing.url.clone());
    lines.join("\n")
}

#[async_trait]
impl ListingSink for TelegramSink {
    async fn deliver(&self, destination: Destination, listing: &Listing) -> Result<()> {
        let (method, body) = Self::payload(destination, listing);
        let url = format!("{}/{method}", self.api_base);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Telegram request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("Telegram returned {status}: {detail}");
        }
        Ok(())
    }
}
