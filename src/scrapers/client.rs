use crate::models::Source;
use crate::scrapers::types::SourceError;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:134.0) Gecko/20100101 Firefox/134.0",
];

/// Listing pages larger than this are junk or an anti-bot tarpit.
const MAX_HTML_SIZE_BYTES: usize = 5_000_000;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);

const CAPTCHA_MARKERS: &[&str] = &[
    "captcha",
    "showcaptcha",
    "challenge-platform",
    "cf-challenge",
    "please verify",
    "проверка",
];

/// Shared HTTP client for all scrapers: rotating user agents, polite
/// request jitter, response size caps and captcha detection.
pub struct PageClient {
    client: Client,
    /// Random inter-request delay bounds in milliseconds.
    delay_ms: (u64, u64),
}

impl PageClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            delay_ms: (2_000, 6_000),
        })
    }

    /// Fetch one page, retrying transient failures with exponential backoff.
    /// After `MAX_ATTEMPTS` the source is reported unavailable for this pass.
    pub async fn fetch_page(
        &self,
        source: Source,
        url: &str,
        referer: &str,
    ) -> Result<String, SourceError> {
        let mut last_reason = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt - 2);
                debug!(%source, attempt, "Backing off {:?} before retry", backoff);
                tokio::time::sleep(backoff).await;
            }

            self.polite_delay().await;

            match self.try_fetch(url, referer).await {
                Ok(body) => return Ok(body),
                Err(reason) => {
                    warn!(%source, attempt, url, "Fetch failed: {}", reason);
                    last_reason = reason;
                }
            }
        }

        Err(SourceError::unavailable(source, last_reason))
    }

    async fn try_fetch(&self, url: &str, referer: &str) -> Result<String, String> {
        let ua = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut request = self
            .client
            .get(url)
            .header("User-Agent", ua)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7");
        if !referer.is_empty() {
            request = request.header("Referer", referer);
        }

        let response = request.send().await.map_err(|e| format!("request: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_HTML_SIZE_BYTES {
                return Err(format!("response too large ({len} bytes)"));
            }
        }

        let body = response.text().await.map_err(|e| format!("body: {e}"))?;
        if body.len() > MAX_HTML_SIZE_BYTES {
            return Err(format!("html too large ({} bytes)", body.len()));
        }
        if is_captcha_page(&body) {
            return Err("captcha/challenge page".to_string());
        }

        Ok(body)
    }

    async fn polite_delay(&self) {
        let (lo, hi) = self.delay_ms;
        if hi == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(lo..=hi.max(lo + 1));
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Heuristic: only the head of the page is inspected, markers further down
/// are usually just script noise.
fn is_captcha_page(html: &str) -> bool {
    let head: String = html.chars().take(5000).collect::<String>().to_lowercase();
    CAPTCHA_MARKERS.iter().any(|m| head.contains(m))
}

/// Lenient float parsing for area-like values ("54,3" or "54.3").
pub fn parse_float(value: &str) -> Option<f64> {
    let cleaned = value.trim().replace(',', ".");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extracts the balanced JSON value (object or array) that starts at the
/// first `{` or `[` after `marker`. Sites embed their result sets this way
/// inside script tags; regexes cannot cut the fragment out reliably because
/// of nesting, so we scan brackets while respecting string literals.
pub fn extract_json_fragment(html: &str, marker: &str) -> Option<String> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let open_rel = rest.find(|c| c == '{' || c == '[')?;
    let fragment = &rest[open_rel..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in fragment.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(fragment[..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
