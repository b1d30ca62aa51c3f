//! Classified listing data structure.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// A single classified listing fetched from a search page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    /// Site-wide unique listing identifier
    pub id: String,

    /// Listing title
    pub title: String,

    /// Asking price in dollars (0.0 when the seller did not set one)
    pub price: f64,

    /// Seller city (empty string if not published)
    pub city: String,

    /// Seller state abbreviation (empty string if not published)
    pub state: String,

    /// Seller-provided description
    pub description: String,

    /// When the listing was posted, UTC
    pub posted_at: DateTime<Utc>,

    /// Full URL to the listing detail page
    pub link: String,

    /// When this snapshot was fetched, UTC
    pub fetched_at: DateTime<Utc>,
}

impl Listing {
    /// Posted time rendered in the operator's local timezone.
    pub fn posted_display(&self) -> String {
        self.posted_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    /// "City, State" location line, omitting whichever half is missing.
    pub fn location_display(&self) -> String {
        match (self.city.is_empty(), self.state.is_empty()) {
            (false, false) => format!("{}, {}", self.city, self.state),
            (false, true) => self.city.clone(),
            (true, false) => self.state.clone(),
            (true, true) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_listing() -> Listing {
        Listing {
            id: "66123456".to_string(),
            title: "Canon AE-1 film camera".to_string(),
            price: 120.0,
            city: "Provo".to_string(),
            state: "UT".to_string(),
            description: "Works great, new light seals.".to_string(),
            posted_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap(),
            link: "https://www.ksl.com/classifieds/listing/66123456".to_string(),
        }
    }

    #[test]
    fn test_location_display() {
        let mut listing = sample_listing();
        assert_eq!(listing.location_display(), "Provo, UT");
        listing.state.clear();
        assert_eq!(listing.location_display(), "Provo");
        listing.city.clear();
        assert_eq!(listing.location_display(), "");
        listing.state = "UT".to_string();
        assert_eq!(listing.location_display(), "UT");
    }

    #[test]
    fn test_posted_display_shape() {
        // exact value depends on the host timezone; check the shape only
        let rendered = sample_listing().posted_display();
        assert_eq!(rendered.len(), "2024-03-01 08:00".len());
        assert!(rendered.starts_with("2024-0"));
    }
}
