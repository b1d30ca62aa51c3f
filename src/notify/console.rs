// src/notify/console.rs

//! Console delivery through the logger. The default channel.

use async_trait::async_trait;

use crate::error::Result;
use crate::notify::{Alert, Notify};

/// Notifier that prints alerts instead of sending them anywhere.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notify for ConsoleNotifier {
    fn channel(&self) -> &'static str {
        "console"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        log::info!("{}\n{}", alert.subject, alert.body);
        Ok(())
    }
}
