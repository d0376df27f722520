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

const BASE_URL: &str = "https://realty.yandex.ru";
const PAGES_PER_SEARCH: u32 = 2;

/// Yandex Realty scraper implementation.
///
/// The result set lives in `window.INITIAL_STATE` under
/// `search.offers.entities`; HTML snippets are the degraded fallback.
pub struct YandexScraper {
    client: Arc<PageClient>,
}

impl YandexScraper {
    pub fn new(client: Arc<PageClient>) -> Self {
        Self { client }
    }

    fn build_search_url(query: &SearchQuery, page: u32) -> String {
        let city = city_or_default(&query.city);
        let base = format!("{BASE_URL}/{}/snyat/kvartira/", city.slug);
        let mut url = Url::parse(&base).expect("static base url");
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("sort", "DATE_DESC");

            if let Some(min) = query.price_min {
                qp.append_pair("priceMin", &min.to_string());
            }
            if let Some(max) = query.price_max {
                qp.append_pair("priceMax", &max.to_string());
            }
            if let Some(area) = query.area_min {
                qp.append_pair("areaMin", &(area as i64).to_string());
            }
            if let Some(kitchen) = query.kitchen_min {
                qp.append_pair("kitchenSpaceMin", &(kitchen as i64).to_string());
            }
            if query.no_commission {
                qp.append_pair("hasAgentFee", "NO");
            }

            if !query.rooms.is_empty() {
                let values: Vec<&str> = query.rooms.iter().map(|r| rooms_param(*r)).collect();
                qp.append_pair("roomsTotal", &values.join(","));
            }
            if page > 1 {
                qp.append_pair("page", &page.to_string());
            }
        }
        url.to_string()
    }

    fn parse_listings(html: &str, city: &str) -> Result<Vec<Listing>, String> {
        if let Some(offers) = extract_initial_state_offers(html) {
            let mut listings = Vec::new();
            for offer in &offers {
                match offer_to_listing(offer, city) {
                    Some(listing) => listings.push(listing),
                    None => warn!("Dropping yandex offer with missing mandatory fields"),
                }
            }
            return Ok(listings);
        }

        parse_html_cards(html, city)
    }
}

#[async_trait]
impl ScraperTrait for YandexScraper {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceError> {
        let mut all = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for page in 1..=PAGES_PER_SEARCH {
            let url = Self::build_search_url(query, page);
            debug!(url, page, "Fetching yandex results page");

            let html = self
                .client
                .fetch_page(Source::Yandex, &url, "https://realty.yandex.ru/")
                .await?;

            let page_listings = Self::parse_listings(&html, &query.city)
                .map_err(|reason| SourceError::unavailable(Source::Yandex, reason))?;

            let found = page_listings.len();
            for listing in page_listings {
                if seen_ids.insert(listing.external_id.clone()) {
                    all.push(listing);
                }
            }
            info!(page, found, "yandex page parsed");

            if found == 0 {
                break;
            }
        }

        Ok(all)
    }

    fn source(&self) -> Source {
        Source::Yandex
    }
}

/// Yandex room-count query values: studios and 4+ have symbolic keys.
fn rooms_param(rooms: u32) -> &'static str {
    match rooms {
        0 => "STUDIO",
        1 => "1",
        2 => "2",
        3 => "3",
        _ => "PLUS_4",
    }
}

fn rooms_from_key(key: &str) -> Option<u32> {
    match key.to_uppercase().as_str() {
        "STUDIO" => Some(0),
        "PLUS_4" => Some(4),
        other => other.parse::<u32>().ok(),
    }
}

fn extract_initial_state_offers(html: &str) -> Option<Vec<Value>> {
    let fragment = extract_json_fragment(html, "window.INITIAL_STATE")?;
    let state: Value = serde_json::from_str(&fragment).ok()?;

    let offers = state
        .get("search")
        .and_then(|s| s.get("offers"))
        .map(|o| match o {
            Value::Object(map) => map.get("entities").cloned().unwrap_or(Value::Null),
            other => other.clone(),
        })
        .unwrap_or(Value::Null);

    match offers {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn offer_to_listing(offer: &Value, city: &str) -> Option<Listing> {
    let external_id = match offer.get("offerId").or_else(|| offer.get("id"))? {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };

    let price = match offer.get("price")? {
        Value::Object(map) => map.get("value").and_then(Value::as_i64),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
    .filter(|p| *p > 0)?;

    let area_m2 = offer
        .get("area")
        .and_then(|a| match a {
            Value::Object(map) => map.get("value").cloned(),
            other => Some(other.clone()),
        })
        .and_then(|v| value_to_float(&v))
        .filter(|a| *a > 0.0)?;

    let rooms = match offer.get("roomsTotalKey").and_then(Value::as_str) {
        Some(key) => rooms_from_key(key)?,
        None => offer.get("roomsTotal").and_then(Value::as_u64)? as u32,
    };

    let kitchen_area_m2 = offer
        .get("kitchenSpace")
        .or_else(|| offer.get("kitchenArea"))
        .and_then(|v| value_to_float(v))
        .filter(|a| *a > 0.0);

    let (metro_station, metro_minutes) = offer
        .get("location")
        .and_then(|l| l.get("metro"))
        .map(|metro| {
            let name = metro
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            let on_foot = metro
                .get("metroTransport")
                .and_then(Value::as_str)
                .map_or(true, |t| t != "ON_TRANSPORT");
            let minutes = metro
                .get("timeToMetro")
                .and_then(Value::as_u64)
                .filter(|_| on_foot)
                .map(|m| m as u32);
            (name, minutes)
        })
        .unwrap_or((None, None));

    let renovation = offer
        .get("renovation")
        .and_then(Value::as_str)
        .map_or(Renovation::Unknown, |r| map_renovation(r));

    // Structured flag beats the later description heuristics.
    let pets = match offer.get("petsAllowed").and_then(Value::as_bool) {
        Some(true) => PetPolicy::Allowed,
        Some(false) => PetPolicy::Forbidden,
        None => PetPolicy::Unknown,
    };

    let no_commission = match offer.get("agentFee") {
        Some(Value::Number(fee)) => fee.as_i64() == Some(0),
        _ => offer.get("notForAgents").and_then(Value::as_bool) == Some(true),
    };

    let photo_url = offer
        .get("appLargeImages")
        .or_else(|| offer.get("fullImages"))
        .and_then(Value::as_array)
        .and_then(|imgs| imgs.first())
        .and_then(Value::as_str)
        .map(absolutize);

    let description = offer
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let url = offer
        .get("url")
        .and_then(Value::as_str)
        .map(absolutize)
        .unwrap_or_else(|| format!("{BASE_URL}/offer/{external_id}/"));

    let title = offer
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if rooms == 0 {
                format!("Студия, {area_m2} м²")
            } else {
                format!("{rooms}-комн. квартира, {area_m2} м²")
            }
        });

    Some(Listing {
        source: Source::Yandex,
        external_id,
        url,
        title,
        price,
        rooms,
        area_m2,
        kitchen_area_m2,
        city: city.to_string(),
        renovation,
        pets,
        metro_station,
        metro_minutes,
        no_commission,
        photo_url,
        description,
        posted_at: None,
    })
}

/// Yandex spells renovation values in Russian inside the state JSON.
fn map_renovation(raw: &str) -> Renovation {
    match raw.to_lowercase().as_str() {
        "косметический" | "cosmetic" => Renovation::Cosmetic,
        "евро" | "евроремонт" | "euro" => Renovation::Euro,
        "дизайнерский" | "designer" => Renovation::Designer,
        "без ремонта" | "needs_renovation" => Renovation::NoRenovation,
        _ => Renovation::Unknown,
    }
}

fn parse_html_cards(html: &str, city: &str) -> Result<Vec<Listing>, String> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse("[class*='OfferSnippet']").expect("static selector");
    let link_sel = Selector::parse("a[href*='/offer/']").expect("static selector");
    let price_sel = Selector::parse("[class*='price']").expect("static selector");

    let id_re = Regex::new(r"/offer/(\d+)").expect("static regex");
    let area_re = Regex::new(r"(\d+[.,]?\d*)\s*м²").expect("static regex");
    let rooms_re = Regex::new(r"(\d+)-комн").expect("static regex");

    let cards: Vec<_> = doc.select(&card_sel).collect();
    if cards.is_empty() {
        return Err("no INITIAL_STATE json and no offer snippets".to_string());
    }

    let mut listings = Vec::new();
    for card in cards {
        let Some(link) = card.select(&link_sel).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        let Some(id_caps) = id_re.captures(href) else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();

        let price = card
            .select(&price_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .and_then(|t| {
                let d: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
                d.parse::<i64>().ok()
            })
            .unwrap_or(0);

        let area_m2 = area_re
            .captures(&title)
            .and_then(|c| parse_float(&c[1]))
            .unwrap_or(0.0);
        let rooms = if title.contains("Студия") {
            Some(0)
        } else {
            rooms_re.captures(&title).and_then(|c| c[1].parse::<u32>().ok())
        };

        let Some(rooms) = rooms else {
            warn!("Dropping yandex snippet without room count: {title}");
            continue;
        };
        if price <= 0 || area_m2 <= 0.0 {
            warn!("Dropping yandex snippet with missing mandatory fields: {title}");
            continue;
        }

        listings.push(Listing {
            source: Source::Yandex,
            external_id: id_caps[1].to_string(),
            url: absolutize(href),
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

fn absolutize(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else if url.starts_with('/') {
        format!("{BASE_URL}{url}")
    } else {
        url.to_string()
    }
}

fn value_to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserFilter;

    fn state_page(entities: &str) -> String {
        format!(
            "<html><script>window.INITIAL_STATE = {{\"search\": {{\"offers\": {{\"entities\": {entities}}}}}}};</script></html>"
        )
    }

    #[test]
    fn search_url_uses_city_slug_and_symbolic_rooms() {
        let mut filter = UserFilter::new(1, "Казань");
        filter.rooms = vec![0, 2, 5];
        filter.no_commission_only = true;
        let url = YandexScraper::build_search_url(&SearchQuery::from_filter(&filter), 1);

        assert!(url.contains("/kazan/snyat/kvartira/"));
        assert!(url.contains("roomsTotal=STUDIO%2C2%2CPLUS_4"));
        assert!(url.contains("hasAgentFee=NO"));
        assert!(!url.contains("page="));
    }

    #[test]
    fn parses_offer_with_structured_pets_flag() {
        let html = state_page(
            r#"[{
                "offerId": "987654",
                "price": {"value": 52000},
                "area": {"value": 48.5},
                "kitchenSpace": "10,2",
                "roomsTotalKey": "2",
                "renovation": "евроремонт",
                "petsAllowed": false,
                "agentFee": 0,
                "location": {"metro": {"name": "Площадь Восстания", "timeToMetro": 9, "metroTransport": "ON_FOOT"}},
                "description": "Светлая квартира",
                "url": "/offer/987654/"
            }]"#,
        );

        let listings = YandexScraper::parse_listings(&html, "Санкт-Петербург").unwrap();
        assert_eq!(listings.len(), 1);
        let l = &listings[0];
        assert_eq!(l.external_id, "987654");
        assert_eq!(l.price, 52_000);
        assert_eq!(l.rooms, 2);
        assert_eq!(l.area_m2, 48.5);
        assert_eq!(l.kitchen_area_m2, Some(10.2));
        assert_eq!(l.renovation, Renovation::Euro);
        assert_eq!(l.pets, PetPolicy::Forbidden);
        assert!(l.no_commission);
        assert_eq!(l.metro_minutes, Some(9));
        assert_eq!(l.url, "https://realty.yandex.ru/offer/987654/");
    }

    #[test]
    fn studio_key_maps_to_zero_rooms() {
        let html = state_page(
            r#"[{"offerId": 5, "price": {"value": 30000}, "area": {"value": 25}, "roomsTotalKey": "STUDIO"}]"#,
        );
        let listings = YandexScraper::parse_listings(&html, "Москва").unwrap();
        assert_eq!(listings[0].rooms, 0);
        assert!(listings[0].title.contains("Студия"));
    }

    #[test]
    fn offer_without_price_is_dropped() {
        let html = state_page(
            r#"[
                {"offerId": 1, "price": {"value": 0}, "area": {"value": 40}, "roomsTotal": 1},
                {"offerId": 2, "price": {"value": 41000}, "area": {"value": 40}, "roomsTotal": 1}
            ]"#,
        );
        let listings = YandexScraper::parse_listings(&html, "Москва").unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].external_id, "2");
    }

    #[test]
    fn unrecognizable_page_is_a_schema_error() {
        assert!(YandexScraper::parse_listings("<html></html>", "Москва").is_err());
    }
}
