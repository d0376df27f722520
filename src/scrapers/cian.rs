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

const BASE_URL: &str = "https://www.cian.ru/cat.php";
const PAGES_PER_SEARCH: u32 = 2;

/// Cian scraper implementation.
///
/// Cian embeds the result set as JSON (`offersSerialized`) inside a script
/// tag; the HTML cards are only a fallback for degraded pages.
pub struct CianScraper {
    client: Arc<PageClient>,
}

impl CianScraper {
    pub fn new(client: Arc<PageClient>) -> Self {
        Self { client }
    }

    /// Builds a long-term-rent search URL from the server-side constraints.
    fn build_search_url(query: &SearchQuery, page: u32) -> String {
        let city = city_or_default(&query.city);
        let mut url = Url::parse(BASE_URL).expect("static base url");
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("deal_type", "rent")
                .append_pair("offer_type", "flat")
                .append_pair("type", "4")
                .append_pair("region", &city.cian_region.to_string())
                .append_pair("p", &page.to_string())
                .append_pair("sort", "creation_date_desc");

            if let Some(min) = query.price_min {
                qp.append_pair("minprice", &min.to_string());
            }
            if let Some(max) = query.price_max {
                qp.append_pair("maxprice", &max.to_string());
            }
            if let Some(area) = query.area_min {
                qp.append_pair("mintarea", &(area as i64).to_string());
            }
            if let Some(kitchen) = query.kitchen_min {
                qp.append_pair("minkarea", &(kitchen as i64).to_string());
            }
            for rooms in &query.rooms {
                qp.append_pair(&format!("room{rooms}"), "1");
            }
        }
        url.to_string()
    }

    /// Extracts listings from one results page.
    ///
    /// Err means the page had no recognizable structure at all (site layout
    /// change or an interstitial) as opposed to a genuinely empty result.
    fn parse_listings(html: &str, city: &str) -> Result<Vec<Listing>, String> {
        if let Some(offers) = extract_offers_json(html) {
            let mut listings = Vec::new();
            for offer in &offers {
                match offer_to_listing(offer, city) {
                    Some(listing) => listings.push(listing),
                    None => warn!("Dropping cian offer with missing mandatory fields"),
                }
            }
            return Ok(listings);
        }

        parse_html_cards(html, city)
    }
}

#[async_trait]
impl ScraperTrait for CianScraper {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Listing>, SourceError> {
        let mut all = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for page in 1..=PAGES_PER_SEARCH {
            let url = Self::build_search_url(query, page);
            debug!(url, page, "Fetching cian results page");

            let html = self
                .client
                .fetch_page(Source::Cian, &url, "https://www.cian.ru/")
                .await?;

            let page_listings = Self::parse_listings(&html, &query.city)
                .map_err(|reason| SourceError::unavailable(Source::Cian, reason))?;

            let found = page_listings.len();
            for listing in page_listings {
                if seen_ids.insert(listing.external_id.clone()) {
                    all.push(listing);
                }
            }
            info!(page, found, "cian page parsed");

            if found == 0 {
                break;
            }
        }

        Ok(all)
    }

    fn source(&self) -> Source {
        Source::Cian
    }
}

/// Finds the `offersSerialized` array inside the page's script tags.
fn extract_offers_json(html: &str) -> Option<Vec<Value>> {
    let fragment = extract_json_fragment(html, "\"offersSerialized\"")?;
    serde_json::from_str::<Vec<Value>>(&fragment).ok()
}

/// Converts one JSON offer into a Listing; None when a mandatory field
/// (id, price, area, rooms) cannot be extracted.
fn offer_to_listing(offer: &Value, city: &str) -> Option<Listing> {
    let external_id = offer
        .get("cianId")
        .or_else(|| offer.get("id"))
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)?
        .to_string();

    let price = offer
        .get("bargainTerms")
        .or_else(|| offer.get("priceInfo"))
        .and_then(|t| t.get("price").or_else(|| t.get("priceRur")))
        .and_then(Value::as_i64)
        .filter(|p| *p > 0)?;

    let area_m2 = value_to_float(offer.get("totalArea")).filter(|a| *a > 0.0)?;
    let rooms = offer.get("roomsCount").and_then(Value::as_u64)? as u32;

    let kitchen_area_m2 = value_to_float(offer.get("kitchenArea")).filter(|a| *a > 0.0);

    let (metro_station, metro_minutes) = offer
        .get("geo")
        .and_then(|g| g.get("undergrounds"))
        .and_then(Value::as_array)
        .and_then(|u| u.first())
        .map(|nearest| {
            let name = nearest
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            let on_foot = nearest
                .get("transportType")
                .and_then(Value::as_str)
                .map_or(true, |t| t != "transport");
            let minutes = nearest
                .get("time")
                .and_then(Value::as_u64)
                .filter(|_| on_foot)
                .map(|m| m as u32);
            (name, minutes)
        })
        .unwrap_or((None, None));

    let renovation = offer
        .get("repairType")
        .and_then(Value::as_str)
        .map_or(Renovation::Unknown, Renovation::parse);

    let no_commission = offer
        .get("bargainTerms")
        .and_then(|t| t.get("agentFee"))
        .and_then(Value::as_i64)
        .map_or(false, |fee| fee == 0);

    let photo_url = offer
        .get("photos")
        .and_then(Value::as_array)
        .and_then(|p| p.first())
        .and_then(|p| p.get("fullUrl").or_else(|| p.get("thumbnailUrl")))
        .and_then(Value::as_str)
        .map(str::to_string);

    let description = offer
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let url = offer
        .get("fullUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.cian.ru/rent/flat/{external_id}/"));

    let title = offer
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{rooms}-комн. квартира, {area_m2} м²"));

    Some(Listing {
        source: Source::Cian,
        external_id,
        url,
        title,
        price,
        rooms,
        area_m2,
        kitchen_area_m2,
        city: city.to_string(),
        renovation,
        pets: PetPolicy::Unknown,
        metro_station,
        metro_minutes,
        no_commission,
        photo_url,
        description,
        posted_at: None,
    })
}

/// Fallback parsing from HTML cards when the embedded JSON is absent.
fn parse_html_cards(html: &str, city: &str) -> Result<Vec<Listing>, String> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse("article[data-name='CardComponent']").expect("static selector");
    let link_sel = Selector::parse("a[href*='/rent/flat/']").expect("static selector");
    let price_sel = Selector::parse("[data-mark='MainPrice']").expect("static selector");

    let id_re = Regex::new(r"/flat/(\d+)/").expect("static regex");
    let area_re = Regex::new(r"(\d+[.,]?\d*)\s*м²").expect("static regex");
    let rooms_re = Regex::new(r"(\d+)-комн").expect("static regex");

    let cards: Vec<_> = doc.select(&card_sel).collect();
    if cards.is_empty() {
        return Err("no offersSerialized json and no listing cards".to_string());
    }

    let mut listings = Vec::new();
    for card in cards {
        let Some(link) = card.select(&link_sel).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default().to_string();
        let Some(id_caps) = id_re.captures(&href) else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();

        let price = card
            .select(&price_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .and_then(|t| digits(&t).parse::<i64>().ok())
            .unwrap_or(0);

        let area_m2 = area_re
            .captures(&title)
            .and_then(|c| parse_float(&c[1]))
            .unwrap_or(0.0);
        let rooms = rooms_re
            .captures(&title)
            .and_then(|c| c[1].parse::<u32>().ok());
        let rooms = if title.contains("Студия") { Some(0) } else { rooms };

        let Some(rooms) = rooms else {
            warn!("Dropping cian card without room count: {title}");
            continue;
        };
        if price <= 0 || area_m2 <= 0.0 {
            warn!("Dropping cian card with missing mandatory fields: {title}");
            continue;
        }

        listings.push(Listing {
            source: Source::Cian,
            external_id: id_caps[1].to_string(),
            url: href,
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

fn value_to_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float(s),
        _ => None,
    }
}

fn digits(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserFilter;

    fn offers_page(offers: &str) -> String {
        format!(
            "<html><script>window._cianConfig = {{\"offersSerialized\": {offers}, \"page\": 1}};</script></html>"
        )
    }

    #[test]
    fn search_url_carries_server_side_constraints() {
        let mut filter = UserFilter::new(1, "Санкт-Петербург");
        filter.price_min = Some(30_000);
        filter.price_max = Some(80_000);
        filter.rooms = vec![1, 2];
        let url = CianScraper::build_search_url(&SearchQuery::from_filter(&filter), 1);

        assert!(url.contains("deal_type=rent"));
        assert!(url.contains("region=2"));
        assert!(url.contains("minprice=30000"));
        assert!(url.contains("maxprice=80000"));
        assert!(url.contains("room1=1"));
        assert!(url.contains("room2=1"));
    }

    #[test]
    fn parses_offers_from_embedded_json() {
        let html = offers_page(
            r#"[{
                "cianId": 123456,
                "bargainTerms": {"price": 45000, "agentFee": 0},
                "totalArea": "54.3",
                "kitchenArea": "12",
                "roomsCount": 2,
                "repairType": "euro",
                "description": "Уютная квартира",
                "geo": {"undergrounds": [{"name": "Тверская", "time": 7, "transportType": "walk"}]},
                "fullUrl": "https://www.cian.ru/rent/flat/123456/"
            }]"#,
        );

        let listings = CianScraper::parse_listings(&html, "Москва").unwrap();
        assert_eq!(listings.len(), 1);
        let l = &listings[0];
        assert_eq!(l.external_id, "123456");
        assert_eq!(l.price, 45_000);
        assert_eq!(l.rooms, 2);
        assert_eq!(l.area_m2, 54.3);
        assert_eq!(l.kitchen_area_m2, Some(12.0));
        assert_eq!(l.renovation, Renovation::Euro);
        assert_eq!(l.metro_station.as_deref(), Some("Тверская"));
        assert_eq!(l.metro_minutes, Some(7));
        assert!(l.no_commission);
    }

    #[test]
    fn record_missing_mandatory_fields_is_dropped_not_fatal() {
        let html = offers_page(
            r#"[
                {"cianId": 1, "bargainTerms": {"price": 45000}, "totalArea": "40", "roomsCount": 1},
                {"cianId": 2, "bargainTerms": {}, "totalArea": "40", "roomsCount": 1},
                {"cianId": 3, "bargainTerms": {"price": 50000}, "roomsCount": 1}
            ]"#,
        );

        let listings = CianScraper::parse_listings(&html, "Москва").unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].external_id, "1");
    }

    #[test]
    fn metro_by_transport_is_not_walking_minutes() {
        let html = offers_page(
            r#"[{
                "cianId": 9,
                "bargainTerms": {"price": 40000},
                "totalArea": "38",
                "roomsCount": 1,
                "geo": {"undergrounds": [{"name": "Щёлковская", "time": 15, "transportType": "transport"}]}
            }]"#,
        );

        let listings = CianScraper::parse_listings(&html, "Москва").unwrap();
        assert_eq!(listings[0].metro_station.as_deref(), Some("Щёлковская"));
        assert_eq!(listings[0].metro_minutes, None);
    }

    #[test]
    fn empty_offers_array_is_ok_not_schema_error() {
        let html = offers_page("[]");
        let listings = CianScraper::parse_listings(&html, "Москва").unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn unrecognizable_page_is_a_schema_error() {
        let err = CianScraper::parse_listings("<html><body>oops</body></html>", "Москва")
            .unwrap_err();
        assert!(err.contains("no "));
    }

    #[test]
    fn html_card_fallback_extracts_listing() {
        let html = r#"<html><body>
            <article data-name="CardComponent">
                <a href="https://www.cian.ru/rent/flat/777/">2-комн. квартира, 54,3 м²</a>
                <span data-mark="MainPrice">45 000 ₽/мес.</span>
            </article>
        </body></html>"#;

        let listings = CianScraper::parse_listings(html, "Москва").unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].external_id, "777");
        assert_eq!(listings[0].price, 45_000);
        assert_eq!(listings[0].area_m2, 54.3);
        assert_eq!(listings[0].rooms, 2);
    }
}
