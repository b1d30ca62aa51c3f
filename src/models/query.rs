//! Search query definition and URL construction.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use url::Url;

/// A classifieds search with its filter set.
///
/// Queries are normalized once at construction time and stay immutable for
/// the process lifetime. Each query owns one seen-store file named by
/// [`SearchQuery::store_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Search keyword (quoted phrases allowed)
    pub keyword: String,

    /// Category filter
    pub category: Option<String>,

    /// Subcategory filter
    pub subcategory: Option<String>,

    /// Minimum price in dollars; 0 means unset
    pub min_price: i64,

    /// Maximum price in dollars; 0 means unset
    pub max_price: i64,

    /// ZIP code to center the search on
    pub zip: Option<String>,

    /// City to center the search on
    pub city: Option<String>,

    /// State abbreviation, e.g. "UT"
    pub state: Option<String>,

    /// Radius in miles from the ZIP code center
    pub miles: Option<u32>,

    /// Results per page
    pub per_page: Option<u32>,

    /// Sort oldest to newest instead of the default newest-first
    pub oldest_first: bool,

    /// Include sold items alongside active ones
    pub include_sold: bool,
}

impl SearchQuery {
    /// Create a query for a keyword with no filters.
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            category: None,
            subcategory: None,
            min_price: 0,
            max_price: 0,
            zip: None,
            city: None,
            state: None,
            miles: None,
            per_page: None,
            oldest_first: false,
            include_sold: false,
        }
    }

    /// Apply filter normalization rules.
    ///
    /// Negative price bounds are clamped to 0, inverted bounds are swapped,
    /// and a city without a state gets the state the site assumes anyway.
    pub fn normalized(mut self) -> Self {
        self.min_price = self.min_price.max(0);
        self.max_price = self.max_price.max(0);
        if self.min_price > 0 && self.max_price > 0 && self.min_price > self.max_price {
            std::mem::swap(&mut self.min_price, &mut self.max_price);
        }
        if self.city.is_some() && self.state.is_none() {
            self.state = Some("UT".to_string());
        }
        self
    }

    /// Build the full search request URL against the given base.
    pub fn to_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        self.append_pairs(&mut url.query_pairs_mut());
        url
    }

    /// Seen-store file name for this query.
    ///
    /// The sanitized keyword keeps the file recognizable, the digest suffix
    /// keeps two queries with the same keyword but different filters from
    /// sharing a store.
    pub fn store_file(&self) -> String {
        let digest = Sha256::digest(self.fingerprint().as_bytes());
        format!("{}-{}.json", self.slug(), &hex::encode(digest)[..8])
    }

    /// Drop queries that would share a seen store with an earlier one,
    /// keeping the first occurrence.
    ///
    /// Each store file gets exactly one watcher, so a term repeated on the
    /// command line (or across `KSL_QUERY*` variables) must collapse to a
    /// single query before any watcher starts.
    pub fn dedupe(queries: Vec<SearchQuery>) -> Vec<SearchQuery> {
        let mut seen = HashSet::new();
        let mut deduped = Vec::new();
        for query in queries {
            if seen.insert(query.store_file()) {
                deduped.push(query);
            } else {
                log::warn!("[{}] duplicate query dropped", query.keyword);
            }
        }
        deduped
    }

    /// Append the query string pairs in wire order.
    ///
    /// `sort` and `sold` are always present (0/1), unset filters are
    /// omitted, and `nocache=1` defeats result caching on the site side.
    fn append_pairs<T>(&self, pairs: &mut url::form_urlencoded::Serializer<'_, T>)
    where
        T: url::form_urlencoded::Target,
    {
        pairs.append_pair("keyword", &self.keyword);
        if self.min_price > 0 {
            pairs.append_pair("priceFrom", &self.min_price.to_string());
        }
        if self.max_price > 0 {
            pairs.append_pair("priceTo", &self.max_price.to_string());
        }
        if let Some(category) = &self.category {
            pairs.append_pair("category", category);
        }
        if let Some(subcategory) = &self.subcategory {
            pairs.append_pair("subCategory", subcategory);
        }
        if let Some(zip) = &self.zip {
            pairs.append_pair("zip", zip);
        }
        if let Some(city) = &self.city {
            pairs.append_pair("city", city);
        }
        if let Some(state) = &self.state {
            pairs.append_pair("state", state);
        }
        if let Some(miles) = self.miles {
            pairs.append_pair("miles", &miles.to_string());
        }
        if let Some(per_page) = self.per_page {
            pairs.append_pair("perPage", &per_page.to_string());
        }
        pairs.append_pair("sort", if self.oldest_first { "1" } else { "0" });
        pairs.append_pair("sold", if self.include_sold { "1" } else { "0" });
        pairs.append_pair("nocache", "1");
    }

    /// Canonical encoding of every filter, used for the store file digest.
    fn fingerprint(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        self.append_pairs(&mut serializer);
        serializer.finish()
    }

    /// Keyword reduced to lowercase alphanumerics and single dashes.
    fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.keyword.len());
        let mut pending_dash = false;
        for ch in self.keyword.chars() {
            if ch.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                slug.push(ch.to_ascii_lowercase());
                pending_dash = false;
            } else {
                pending_dash = true;
            }
        }
        if slug.is_empty() {
            slug.push_str("query");
        }
        slug
    }
}
