// src/notify/email.rs

//! Email delivery over SMTP with STARTTLS.
//!
//! The operator both sends and receives: mail goes from their address,
//! through their provider's relay, back to the same address.

use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header};
use lettre::transport::smtp::AsyncSmtpTransport;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncTransport, Tokio1Executor};

use crate::error::{AppError, Result};
use crate::models::EmailConfig;
use crate::notify::{Alert, Notify};

const CHANNEL: &str = "email";

/// SMTP-backed notifier.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Build the transport from configuration.
    ///
    /// The relay is taken from config, or inferred from the mail domain
    /// for the common providers. An unknown domain without an explicit
    /// relay is a configuration error.
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let address = config.address.trim();
        if address.is_empty() {
            return Err(AppError::config("notifier.email.address is empty"));
        }
        let password = config.password.clone().ok_or_else(|| {
            AppError::config("email password not set; use KSL_EMAIL_PASS or notifier.email.password")
        })?;

        let server = match &config.smtp_server {
            Some(server) => server.clone(),
            None => infer_smtp_relay(address)?,
        };
        let (host, port) = split_host_port(&server)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::config(format!("SMTP relay {host}: {e}")))?
            .port(port)
            .credentials(Credentials::new(address.to_string(), password))
            .build();

        let to: Mailbox = address
            .parse()
            .map_err(|e| AppError::config(format!("email address {address}: {e}")))?;
        let from = Mailbox::new(Some(config.from_name.clone()), to.email.clone());

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl Notify for EmailNotifier {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    /// Connect and authenticate once so bad credentials surface at
    /// startup.
    async fn verify(&self) -> Result<()> {
        match self.mailer.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::config("SMTP connection test failed")),
            Err(e) => Err(AppError::config(format!("SMTP server rejected login: {e}"))),
        }
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(alert.subject.as_str())
            .header(header::ContentType::TEXT_PLAIN)
            .body(alert.body.clone())
            .map_err(|e| AppError::delivery_rejected(CHANNEL, format!("build message: {e}")))?;

        match self.mailer.send(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(AppError::delivery_rejected(CHANNEL, e)),
            Err(e) => Err(AppError::delivery_failed(CHANNEL, e)),
        }
    }
}

/// Map well-known mail domains to their submission relay.
fn infer_smtp_relay(address: &str) -> Result<String> {
    let domain = address.rsplit_once('@').map(|(_, d)| d).unwrap_or(address);
    let server = match domain {
        "gmail.com" => "smtp.gmail.com:587",
        "yahoo.com" => "smtp.mail.yahoo.com:587",
        "outlook.com" | "hotmail.com" => "smtp-mail.outlook.com:587",
        "comcast.net" => "smtp.comcast.net:587",
        _ => {
            return Err(AppError::config(format!(
                "unknown mail domain {domain}; set notifier.email.smtp_server or KSL_SMTP"
            )));
        }
    };
    Ok(server.to_string())
}

/// Split "host:port", defaulting to the submission port.
fn split_host_port(server: &str) -> Result<(&str, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| AppError::config(format!("invalid SMTP port in {server}")))?;
            Ok((host, port))
        }
        None => Ok((server, 587)),
    }
}
