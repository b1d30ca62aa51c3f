// src/notify/mod.rs

//! Notification channels.
//!
//! Each new listing is rendered into a plain-text [`Alert`] and handed to
//! the configured [`Notify`] channel. Channels distinguish transient
//! failures (`DeliveryFailed`, retried by the watcher) from permanent
//! rejections (`DeliveryRejected`).

mod console;
mod email;
mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{Listing, NotifierConfig, NotifyChannel};

pub use console::ConsoleNotifier;
pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

/// Longest description carried into a report block, in graphemes.
const MAX_DESCRIPTION_GRAPHEMES: usize = 300;

/// A rendered notification ready for any channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// Alert for one new listing found by a query.
    pub fn for_listing(query_label: &str, listing: &Listing) -> Self {
        Self {
            subject: format!("{query_label} search match on KSL Classifieds"),
            body: format!(
                "New match found for query {query_label}\n\n{}",
                render_report(std::slice::from_ref(listing))
            ),
        }
    }

    /// Operator alert after repeated cycle failures.
    pub fn for_failure_streak(query_label: &str, streak: u32, error: &AppError) -> Self {
        Self {
            subject: format!("{query_label} watcher is failing"),
            body: format!(
                "The watcher for query {query_label} has failed {streak} cycles in a row.\n\
                 Last error: {error}\n\
                 It will keep retrying with backoff."
            ),
        }
    }
}

/// A delivery channel for alerts.
#[async_trait]
pub trait Notify: Send + Sync {
    /// Short channel name for logs and error context.
    fn channel(&self) -> &'static str;

    /// Check that the channel is usable before the loop starts.
    ///
    /// Channels holding credentials override this so a bad password fails
    /// at startup instead of at first delivery.
    async fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver one alert.
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Build the configured delivery channel.
pub fn build_notifier(config: &NotifierConfig, client: reqwest::Client) -> Result<Arc<dyn Notify>> {
    match config.channel {
        NotifyChannel::Console => Ok(Arc::new(ConsoleNotifier::new())),
        NotifyChannel::Email => {
            let email = config.email.as_ref().ok_or_else(|| {
                AppError::config("notifier.email section required for the email channel")
            })?;
            Ok(Arc::new(EmailNotifier::new(email)?))
        }
        NotifyChannel::Webhook => {
            let webhook = config.webhook.as_ref().ok_or_else(|| {
                AppError::config("notifier.webhook section required for the webhook channel")
            })?;
            Ok(Arc::new(WebhookNotifier::new(webhook.url.clone(), client)))
        }
    }
}

/// Render the plain-text report for a batch of listings.
///
/// One block per listing:
///
/// ```text
/// *************************
/// {link}
/// {title}
/// ${price} - {posted} - {city}, {state}
/// *  {description}
/// ```
pub fn render_report(listings: &[Listing]) -> String {
    let mut report = String::new();
    for listing in listings {
        report.push_str(&"*".repeat(25));
        report.push('\n');
        report.push_str(&listing.link);
        report.push('\n');
        report.push_str(&listing.title);
        report.push('\n');
        report.push_str(&format!(
            "${} - {} - {}\n",
            listing.price,
            listing.posted_display(),
            listing.location_display()
        ));
        report.push_str(&format!(
            "*  {}\n\n",
            truncate_graphemes(&listing.description, MAX_DESCRIPTION_GRAPHEMES)
        ));
    }
    sanitize_ascii(&report)
}

/// Drop non-ASCII characters so SMTP bodies stay 7-bit clean.
fn sanitize_ascii(text: &str) -> String {
    text.chars().filter(char::is_ascii).collect()
}

/// Truncate at a grapheme boundary, marking the cut with an ellipsis.
fn truncate_graphemes(text: &str, max: usize) -> String {
    let mut graphemes = text.graphemes(true);
    let truncated: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
