// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::ClientConfig;

/// Create the shared asynchronous HTTP client.
///
/// No default User-Agent is set; the search client rotates one in per
/// request.
pub fn create_client(config: &ClientConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AppError::config(format!("HTTP client construction failed: {e}")))?;
    Ok(client)
}
