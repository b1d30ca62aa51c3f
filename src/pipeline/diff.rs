//! New-listing detection.
//!
//! Splits a fetched snapshot into listings the operator already knows
//! about and ones they do not. Detection never writes the store;
//! committing ids is the watcher's job after delivery, so a failed
//! notification gets retried next cycle.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::Listing;
use crate::storage::SeenStore;

/// Listings whose id is not in the store, fetch order preserved.
///
/// An id duplicated within one fetch is returned once, first occurrence
/// wins.
pub async fn new_listings(fetched: &[Listing], store: &dyn SeenStore) -> Result<Vec<Listing>> {
    let mut fresh = Vec::new();
    let mut in_batch = HashSet::new();
    for listing in fetched {
        if !in_batch.insert(listing.id.as_str()) {
            continue;
        }
        if !store.has(&listing.id).await? {
            fresh.push(listing.clone());
        }
    }
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemorySeenStore, SeenRecord};
    use chrono::Utc;

    fn listing(id: &str) -> Listing {
        Listing {
            id: id.to_string(),
            title: format!("Item {id}"),
            price: 10.0,
            city: "Provo".to_string(),
            state: "UT".to_string(),
            description: String::new(),
            posted_at: Utc::now(),
            fetched_at: Utc::now(),
            link: format!("https://www.ksl.com/classifieds/listing/{id}"),
        }
    }

    fn ids(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_store_returns_everything_in_order() {
        let store = MemorySeenStore::new();
        let fetched = vec![listing("A"), listing("B")];

        let fresh = new_listings(&fetched, &store).await.unwrap();
        assert_eq!(ids(&fresh), ["A", "B"]);
    }

    #[tokio::test]
    async fn test_seen_ids_are_filtered() {
        let store = MemorySeenStore::new();
        store
            .record_all(&[
                SeenRecord::new("A", Utc::now()),
                SeenRecord::new("B", Utc::now()),
            ])
            .await
            .unwrap();

        let fetched = vec![listing("A"), listing("B"), listing("C")];
        let fresh = new_listings(&fetched, &store).await.unwrap();
        assert_eq!(ids(&fresh), ["C"]);
    }

    #[tokio::test]
    async fn test_detection_is_idempotent_without_commit() {
        let store = MemorySeenStore::new();
        store.record("B", Utc::now()).await.unwrap();
        let fetched = vec![listing("A"), listing("B")];

        let first = new_listings(&fetched, &store).await.unwrap();
        let second = new_listings(&fetched, &store).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count().await, 1, "detection must not write the store");
    }

    #[tokio::test]
    async fn test_empty_fetch_is_empty_result() {
        let store = MemorySeenStore::new();
        let fresh = new_listings(&[], &store).await.unwrap();
        assert!(fresh.is_empty());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_one_fetch_reported_once() {
        let store = MemorySeenStore::new();
        let mut second_copy = listing("A");
        second_copy.title = "Reposted".to_string();
        let fetched = vec![listing("A"), second_copy, listing("B")];

        let fresh = new_listings(&fetched, &store).await.unwrap();
        assert_eq!(ids(&fresh), ["A", "B"]);
        assert_eq!(fresh[0].title, "Item A", "first occurrence wins");
    }
}
