// src/models/mod.rs

//! Domain models for the notifier application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
mod query;

// Re-export all public types
pub use config::{ClientConfig, Config, EmailConfig, NotifierConfig, NotifyChannel, PollerConfig, WebhookConfig};
pub use listing::Listing;
pub use query::SearchQuery;
