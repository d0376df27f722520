use crate::models::Source;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable application configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub db_path: PathBuf,
    pub check_interval: Duration,
    /// Default set of sources polled for filters that do not narrow it.
    pub default_sources: Vec<Source>,
    /// Process-wide group delivery defaults; a per-user override stored in
    /// the database wins over these.
    pub group_chat_id: Option<i64>,
    pub group_topic_id: Option<i64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Absent .env is fine in deployed environments.
        dotenvy::dotenv().ok();

        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?;
        if bot_token.trim().is_empty() {
            bail!("BOT_TOKEN is empty");
        }

        let db_path = env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data.db"));

        let minutes: u64 = env::var("CHECK_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("CHECK_INTERVAL_MINUTES must be an integer")?;
        if minutes == 0 {
            bail!("CHECK_INTERVAL_MINUTES must be positive");
        }

        let default_sources = match env::var("ENABLED_SOURCES") {
            Ok(raw) => parse_sources(&raw)?,
            Err(_) => Source::ALL.to_vec(),
        };

        Ok(Self {
            bot_token,
            db_path,
            check_interval: Duration::from_secs(minutes * 60),
            default_sources,
            group_chat_id: parse_optional_i64("GROUP_CHAT_ID")?,
            group_topic_id: parse_optional_i64("GROUP_TOPIC_ID")?,
        })
    }
}

fn parse_sources(raw: &str) -> Result<Vec<Source>> {
    let mut sources = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match Source::parse(part) {
            Some(s) if !sources.contains(&s) => sources.push(s),
            Some(_) => {}
            None => bail!("ENABLED_SOURCES contains unknown source '{part}'"),
        }
    }
    if sources.is_empty() {
        bail!("ENABLED_SOURCES is empty");
    }
    Ok(sources)
}

fn parse_optional_i64(name: &str) -> Result<Option<i64>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{name} must be an integer"))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_list_parsed_and_deduplicated() {
        let sources = parse_sources("cian, yandex,cian").unwrap();
        assert_eq!(sources, vec![Source::Cian, Source::Yandex]);

        assert!(parse_sources("cian,zillow").is_err());
        assert!(parse_sources(" , ").is_err());
    }
}
