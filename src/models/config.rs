//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP client and listing source settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Poll loop timing and retry settings
    #[serde(default)]
    pub poller: PollerConfig,

    /// Notification channel settings
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Overlay settings from the environment.
    ///
    /// `KSL_EMAIL` selects the email channel and sets the recipient,
    /// `KSL_SMTP` overrides the relay, `KSL_EMAIL_PASS` supplies the
    /// password so it never has to live in the config file.
    pub fn apply_env(&mut self) {
        if let Ok(address) = std::env::var("KSL_EMAIL") {
            if !address.trim().is_empty() {
                self.notifier.channel = NotifyChannel::Email;
                let email = self.notifier.email.get_or_insert_with(EmailConfig::default);
                email.address = address;
            }
        }
        if let Ok(server) = std::env::var("KSL_SMTP") {
            if !server.trim().is_empty() {
                let email = self.notifier.email.get_or_insert_with(EmailConfig::default);
                email.smtp_server = Some(server);
            }
        }
        if let Ok(password) = std::env::var("KSL_EMAIL_PASS") {
            if !password.is_empty() {
                let email = self.notifier.email.get_or_insert_with(EmailConfig::default);
                email.password = Some(password);
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.client.user_agents.is_empty() {
            return Err(AppError::config("client.user_agents is empty"));
        }
        if self.client.user_agents.iter().any(|ua| ua.trim().is_empty()) {
            return Err(AppError::config("client.user_agents contains a blank entry"));
        }
        if self.client.timeout_secs == 0 {
            return Err(AppError::config("client.timeout_secs must be > 0"));
        }
        if self.poller.interval_mins == 0 {
            return Err(AppError::config("poller.interval_mins must be > 0"));
        }
        if self.poller.backoff_base_secs == 0 {
            return Err(AppError::config("poller.backoff_base_secs must be > 0"));
        }
        if self.poller.backoff_cap_secs < self.poller.backoff_base_secs {
            return Err(AppError::config(
                "poller.backoff_cap_secs must be >= poller.backoff_base_secs",
            ));
        }
        if self.poller.delivery_attempts == 0 {
            return Err(AppError::config("poller.delivery_attempts must be > 0"));
        }
        match self.notifier.channel {
            NotifyChannel::Email => {
                let email = self
                    .notifier
                    .email
                    .as_ref()
                    .ok_or_else(|| AppError::config("notifier.email section required for the email channel"))?;
                if email.address.trim().is_empty() {
                    return Err(AppError::config("notifier.email.address is empty"));
                }
                if !email.address.contains('@') {
                    return Err(AppError::config("notifier.email.address is not an email address"));
                }
            }
            NotifyChannel::Webhook => {
                let webhook = self
                    .notifier
                    .webhook
                    .as_ref()
                    .ok_or_else(|| AppError::config("notifier.webhook section required for the webhook channel"))?;
                url::Url::parse(&webhook.url)
                    .map_err(|e| AppError::config(format!("notifier.webhook.url: {e}")))?;
            }
            NotifyChannel::Console => {}
        }
        Ok(())
    }
}

/// HTTP client and listing source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Browser User-Agent pool, rotated per request
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Classifieds search endpoint
    #[serde(default = "defaults::search_url")]
    pub search_url: String,

    /// Listing detail page base, id is appended
    #[serde(default = "defaults::listing_url")]
    pub listing_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agents: defaults::user_agents(),
            timeout_secs: defaults::timeout(),
            search_url: defaults::search_url(),
            listing_url: defaults::listing_url(),
        }
    }
}

/// Poll loop timing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Minutes between poll cycles
    #[serde(default = "defaults::interval_mins")]
    pub interval_mins: u64,

    /// First backoff delay after a transient failure, in seconds
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_secs: u64,

    /// Backoff ceiling in seconds
    #[serde(default = "defaults::backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Delivery attempts per notification before giving up on the cycle
    #[serde(default = "defaults::delivery_attempts")]
    pub delivery_attempts: u32,

    /// Delay between delivery attempts, in seconds
    #[serde(default = "defaults::delivery_retry")]
    pub delivery_retry_secs: u64,

    /// Consecutive failed cycles before alerting the operator; 0 disables
    /// the alert
    #[serde(default = "defaults::failure_alert_threshold")]
    pub failure_alert_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_mins: defaults::interval_mins(),
            backoff_base_secs: defaults::backoff_base(),
            backoff_cap_secs: defaults::backoff_cap(),
            delivery_attempts: defaults::delivery_attempts(),
            delivery_retry_secs: defaults::delivery_retry(),
            failure_alert_threshold: defaults::failure_alert_threshold(),
        }
    }
}

/// Notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifierConfig {
    /// Which channel to deliver through
    #[serde(default)]
    pub channel: NotifyChannel,

    /// Email channel settings, required when channel = "email"
    #[serde(default)]
    pub email: Option<EmailConfig>,

    /// Webhook channel settings, required when channel = "webhook"
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

/// Available delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    /// Log matches to stdout only
    #[default]
    Console,
    /// Send email through an SMTP relay
    Email,
    /// POST a JSON payload to a webhook URL
    Webhook,
}

/// Email channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Recipient and sender address
    #[serde(default)]
    pub address: String,

    /// SMTP relay as host or host:port; inferred from the address domain
    /// when unset
    #[serde(default)]
    pub smtp_server: Option<String>,

    /// Display name on outgoing mail
    #[serde(default = "defaults::from_name")]
    pub from_name: String,

    /// SMTP password; prefer the KSL_EMAIL_PASS environment variable
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            smtp_server: None,
            from_name: defaults::from_name(),
            password: None,
        }
    }
}

/// Webhook channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// Endpoint receiving the JSON payload
    #[serde(default)]
    pub url: String,
}

mod defaults {
    // Client defaults
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.1.1 Safari/605.1.15".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:77.0) Gecko/20100101 Firefox/77.0".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:77.0) Gecko/20100101 Firefox/77.0".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36".into(),
        ]
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn search_url() -> String {
        "https://www.ksl.com/classifieds/search".into()
    }
    pub fn listing_url() -> String {
        "https://www.ksl.com/classifieds/listing/".into()
    }

    // Poller defaults
    pub fn interval_mins() -> u64 {
        10
    }
    pub fn backoff_base() -> u64 {
        30
    }
    pub fn backoff_cap() -> u64 {
        900
    }
    pub fn delivery_attempts() -> u32 {
        3
    }
    pub fn delivery_retry() -> u64 {
        2
    }
    pub fn failure_alert_threshold() -> u32 {
        5
    }

    // Notifier defaults
    pub fn from_name() -> String {
        "KSL Notify".into()
    }
}
