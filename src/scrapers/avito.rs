use crate::cities::city_or_default;
use crate::models::{Listing, PetPolicy, Renovation, Source};
use crate::scrapers::client::{extract_json_fragment, parse_float, PageClient};
use crate::scrapers::traits::ScraperTrait;
use crate::scrapers::types::{SearchQuery, SourceError};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BASE_URL: &str = "https://www.avito.ru";
const PAGES_PER_SEARCH: u32 = 2;

/// Avito scraper implementation.
///
/// Avito has no structured fields beyond the title, so rooms and area are
/// cut out of it ("2-к. квартира, 45 м², 3/9 эт."); the rest comes from
/// `window.__initialData__` catalog items.
pub struct AvitoScraper {
    client: Arc<PageClient>,
}

impl AvitoScraper {
    pub fn new(client: Arc<PageClient>) -> Self {
        Self { client }
    }

    fn build_search_url(query: &SearchQuery, page: u32) -> String {
        let city = city_or_default(&query.city);
        let base = format!("{BASE_URL}/{}/kvartiry/sdam/na_dlitelnyy_srok", city.slug);
        let mut url = Url::parse(&base).expect("static base url");
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("s", "104"); // newest first

            if let Some(min) = query.price_min {
                qp.append_pair("pmin", &min.to_string());
            }
            if let Some(max) = query.price_max {
                qp.append_pair("pmax", &max.to_string());
            }
            if page > 1 {
                qp.append_pair("p", &page.to_string());
            }
        }
        url.to_string()
    }

    fn parse_listings(html: &str, city: &str) -> Result<Vec<Listing>, String> {
        if let Some(items) = extract_catalog_items(html) {
            let mut listings = Vec::new();
            for item in &items {
                match item_to_listing(item, city) {
                    Some(listing) => listings.push(listing),
                    None => warn!("Dropping avito item with missing mandatory fields"),
                }
            }
            return Ok(listings);
        }

        parse_html_cards(html, city)
    }
}

#[async_trait]
impl ScraperTrait for AvitoScraper {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceError> {
        let mut all = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for page in 1..=PAGES_PER_SEARCH {
            let url = Self::build_search_url(query, page);
            debug!(url, page, "Fetching avito results page");

            let html = self
                .client
                .fetch_page(Source::Avito, &url, "https://www.avito.ru/")
                .await?;

            let page_listings = Self::parse_listings(&html, &query.city)
                .map_err(|reason| SourceError::unavailable(Source::Avito, reason))?;

            let found = page_listings.len();
            for listing in page_listings {
                if seen_ids.insert(listing.external_id.clone()) {
                    all.push(listing);
                }
            }
            info!(page, found, "avito page parsed");

            if found == 0 {
                break;
            }
        }

        Ok(all)
    }

    fn source(&self) -> Source {
        Source::Avito
    }
}

fn extract_catalog_items(html: &str) -> Option<Vec<Value>> {
    let fragment = extract_json_fragment(html, "window.__initialData__")?;
    let state: Value = serde_json::from_str(&fragment).ok()?;

    // The catalog block may sit at the top level or one namespace deeper.
    let catalog = state.get("catalog").cloned().or_else(|| {
        state
            .as_object()?
            .values()
            .find_map(|v| v.get("catalog").cloned())
    })?;

    catalog.get("items").and_then(Value::as_array).cloned()
}

fn item_to_listing(item: &Value, city: &str) -> Option<Listing> {
    let external_id = match item.get("id")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };

    let title = item.get("title").and_then(Value::as_str)?.to_string();

    let price = item
        .get("priceDetailed")
        .and_then(|p| p.get("value"))
        .or_else(|| item.get("price"))
        .and_then(Value::as_i64)
        .filter(|p| *p > 0)?;

    let (rooms, area_m2) = fields_from_title(&title)?;

    let (metro_station, metro_hint) = item
        .get("geo")
        .and_then(|g| g.get("geoReferences"))
        .and_then(Value::as_array)
        .and_then(|refs| refs.first())
        .map(|nearest| {
            let name = nearest
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string);
            let hint = nearest
                .get("afterWithIcon")
                .and_then(|a| a.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string);
            (name, hint)
        })
        .unwrap_or((None, None));

    // "7 мин." style hints next to the metro badge; meter figures are left
    // to the description heuristics.
    let metro_minutes = metro_hint
        .as_deref()
        .and_then(|h| {
            Regex::new(r"(\d+)\s*мин")
                .expect("static regex")
                .captures(h)
        })
        .and_then(|c| c[1].parse::<u32>().ok());

    let description = item
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let photo_url = item
        .get("images")
        .and_then(Value::as_array)
        .and_then(|imgs| imgs.first())
        .and_then(|img| {
            img.as_str()
                .map(str::to_string)
                .or_else(|| img.get("636x476").and_then(Value::as_str).map(str::to_string))
        });

    let url = item
        .get("urlPath")
        .and_then(Value::as_str)
        .map(|p| format!("{BASE_URL}{p}"))
        .unwrap_or_else(|| format!("{BASE_URL}/items/{external_id}"));

    Some(Listing {
        source: Source::Avito,
        external_id,
        url,
        title,
        price,
        rooms,
        area_m2,
        kitchen_area_m2: None,
        city: city.to_string(),
        renovation: Renovation::Unknown,
        pets: PetPolicy::Unknown,
        metro_station,
        metro_minutes,
        no_commission: false,
        photo_url,
        description,
        posted_at: None,
    })
}

/// Avito titles carry the structure: "2-к. квартира, 45,5 м², 3/9 эт."
/// or "Квартира-студия, 28 м², 5/16 эт.".
fn fields_from_title(title: &str) -> Option<(u32, f64)> {
    let area_re = Regex::new(r"(\d+[.,]?\d*)\s*м²").expect("static regex");
    let rooms_re = Regex::new(r"(\d+)-к\.?\s").expect("static regex");

    let area = area_re.captures(title).and_then(|c| parse_float(&c[1]))?;
    if area <= 0.0 {
        return None;
    }

    let rooms = if title.contains("студия") || title.contains("Студия") {
        0
    } else {
        rooms_re.captures(title)?.get(1)?.as_str().parse::<u32>().ok()?
    };

    Some((rooms, area))
}

fn parse_html_cards(html: &str, city: &str) -> Result<Vec<Listing>, String> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse("div[data-marker='item']").expect("static selector");
    let title_sel = Selector::parse("a[data-marker='item-title']").expect("static selector");
    let price_sel = Selector::parse("[data-marker='item-price']").expect("static selector");

    let cards: Vec<_> = doc.select(&card_sel).collect();
    if cards.is_empty() {
        return Err("no __initialData__ json and no item cards".to_string());
    }

    let mut listings = Vec::new();
    for card in cards {
        let external_id = match card.value().attr("data-item-id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };
        let Some(link) = card.select(&title_sel).next() else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        let href = link.value().attr("href").unwrap_or_default();

        let price = card
            .select(&price_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .and_then(|t| {
                let d: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
                d.parse::<i64>().ok()
            })
            .unwrap_or(0);

        let Some((rooms, area_m2)) = fields_from_title(&title) else {
            warn!("Dropping avito card with unparsable title: {title}");
            continue;
        };
        if price <= 0 {
            warn!("Dropping avito card without price: {title}");
            continue;
        }

        listings.push(Listing {
            source: Source::Avito,
            external_id,
            url: format!("{BASE_URL}{href}"),
            title,
            price,
            rooms,
            area_m2,
            kitchen_area_m2: None,
            city: city.to_string(),
            renovation: Renovation::Unknown,
            pets: PetPolicy::Unknown,
            metro_station: None,
            metro_minutes: None,
            no_commission: false,
            photo_url: None,
            description: String::new(),
            posted_at: None,
        });
    }

    Ok(listings)
}
