//! Service layer for the notifier application.
//!
//! This module contains the business logic for:
//! - Search page fetching and parsing (`SearchClient`)

mod search;

pub use search::SearchClient;
