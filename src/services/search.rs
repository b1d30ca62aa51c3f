// src/services/search.rs

//! Classifieds search client.
//!
//! Fetches a search results page and extracts the listing data the site
//! embeds as JSON inside an inline `<script>` element, roughly:
//!
//! ```text
//! window.renderSearchSection({
//!     listings: [{"id": 66123456, "title": ...}, ...],
//!     displayType: 'grid',
//!     ...
//! })
//! ```
//!
//! Only the `listings` array is well-formed JSON; the surrounding object
//! is JavaScript. The parser anchors on the `listings` property and
//! bracket-matches the array out of the script text.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode, header};
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ClientConfig, Listing, SearchQuery};

fn script_selector() -> &'static Selector {
    static SCRIPT: OnceLock<Selector> = OnceLock::new();
    SCRIPT.get_or_init(|| Selector::parse("script").expect("static selector"))
}

fn listings_anchor() -> &'static Regex {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    ANCHOR.get_or_init(|| Regex::new(r#""?listings"?\s*:\s*\["#).expect("static regex"))
}

/// Client for the classifieds search endpoint.
pub struct SearchClient {
    client: Client,
    search_url: Url,
    listing_url: Url,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
}

impl SearchClient {
    /// Create a search client from configuration and a shared HTTP client.
    pub fn new(config: &ClientConfig, client: Client) -> Result<Self> {
        if config.user_agents.is_empty() {
            return Err(AppError::config("client.user_agents is empty"));
        }
        Ok(Self {
            client,
            search_url: Url::parse(&config.search_url)?,
            listing_url: Url::parse(&config.listing_url)?,
            user_agents: config.user_agents.clone(),
            next_agent: AtomicUsize::new(0),
        })
    }

    /// Fetch one search page and return its listings, newest first as the
    /// site orders them. Zero matches is a successful empty result.
    pub async fn fetch(&self, query: &SearchQuery) -> Result<Vec<Listing>> {
        let url = query.to_url(&self.search_url);
        let agent = self.next_user_agent();
        log::debug!("GET {url}");

        let response = self
            .client
            .get(url.clone())
            .header(header::USER_AGENT, agent)
            .send()
            .await
            .map_err(|e| AppError::source_unavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::source_unavailable(format!("{url}: HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(AppError::source_rejected(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::source_unavailable(format!("{url}: {e}")))?;

        self.parse_listings(&body, Utc::now())
    }

    /// Extract listings from a search page body.
    ///
    /// Public so tests can feed captured pages through the full parse path.
    pub fn parse_listings(&self, html: &str, fetched_at: DateTime<Utc>) -> Result<Vec<Listing>> {
        let document = Html::parse_document(html);

        for script in document.select(script_selector()) {
            let text: String = script.text().collect();
            if !text.contains("listings") {
                continue;
            }
            let Some(json) = extract_listings_json(&text) else {
                continue;
            };
            let raw: Vec<RawListing> = serde_json::from_str(json)
                .map_err(|e| AppError::source_format(format!("listings JSON: {e}")))?;
            return Ok(self.convert(raw, fetched_at));
        }

        Err(AppError::source_format("no listings data in search page"))
    }

    /// Turn raw wire listings into domain listings.
    ///
    /// Paid placements (`listingType` containing "featured") repeat on
    /// every page regardless of recency and are dropped here.
    fn convert(&self, raw: Vec<RawListing>, fetched_at: DateTime<Utc>) -> Vec<Listing> {
        let mut listings = Vec::with_capacity(raw.len());
        for item in raw {
            if item
                .listing_type
                .as_deref()
                .is_some_and(|t| t.contains("featured"))
            {
                log::debug!("Skipping featured listing {}", item.id);
                continue;
            }

            let posted_at = item
                .display_time
                .as_deref()
                .and_then(parse_display_time)
                .unwrap_or(fetched_at);
            let link = self
                .listing_url
                .join(&item.id)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| format!("{}{}", self.listing_url, item.id));

            listings.push(Listing {
                id: item.id,
                title: item.title,
                price: item.price,
                city: item.city,
                state: item.state,
                description: item.description,
                posted_at,
                link,
                fetched_at,
            });
        }
        listings
    }

    /// Next User-Agent from the pool, round-robin.
    fn next_user_agent(&self) -> &str {
        let idx = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        &self.user_agents[idx]
    }
}

/// Listing as it appears in the embedded JSON.
#[derive(Debug, Deserialize)]
struct RawListing {
    #[serde(deserialize_with = "de_id")]
    id: String,

    #[serde(default)]
    title: String,

    /// Absent for free items
    #[serde(default, deserialize_with = "de_price")]
    price: f64,

    #[serde(default)]
    city: String,

    #[serde(default)]
    state: String,

    #[serde(default)]
    description: String,

    #[serde(default, rename = "displayTime")]
    display_time: Option<String>,

    #[serde(default, rename = "listingType")]
    listing_type: Option<String>,
}

/// Ids arrive as JSON numbers; tolerate strings too.
fn de_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }
    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::String(s) => s,
    })
}

/// Prices are usually numbers but occasionally quoted; null means free.
fn de_price<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPrice {
        Number(f64),
        String(String),
    }
    Ok(match Option::<RawPrice>::deserialize(deserializer)? {
        Some(RawPrice::Number(n)) => n,
        Some(RawPrice::String(s)) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .unwrap_or(0.0),
        None => 0.0,
    })
}

/// Parse the wire `displayTime` format, e.g. `2024-03-01T08:00:00Z`.
fn parse_display_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Slice the listings JSON array out of script text.
///
/// Anchors on the `listings` property, then walks bytes tracking bracket
/// depth and string state until the array closes. Byte-wise scanning is
/// safe here: every delimiter is ASCII and multi-byte characters never
/// contain ASCII bytes.
fn extract_listings_json(script: &str) -> Option<&str> {
    let anchor = listings_anchor().find(script)?;
    // the match ends at the opening '['
    let start = anchor.end() - 1;
    let bytes = script.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&script[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
