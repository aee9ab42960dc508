//! Contains validation logic for the final Config struct.

use super::Config;
use crate::core::error::{AppError, Result};
use url::Url;

/// Validates the configuration settings after loading and overrides.
/// Mutates the config to clamp values where that is unambiguous.
pub(crate) fn validate_config(config: &mut Config) -> Result<()> {
    for (name, url) in [
        ("primary", &config.primary_url),
        ("secondary", &config.secondary_url),
    ] {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "The {} mail-engine URL must be http(s): {}",
                name, url
            )));
        }
    }
    if config.primary_key.is_none() && config.secondary_key.is_none() {
        tracing::warn!("No mail-engine API key configured. Move jobs will refuse to start.");
    }

    if config.workers == Some(0) {
        return Err(AppError::Config(
            "Worker count must be at least 1.".to_string(),
        ));
    }
    if config.max_retries == 0 {
        tracing::warn!("max_retries was set to 0. Each endpoint is still tried once.");
        config.max_retries = 1;
    }
    if config.send_attempts == 0 {
        tracing::warn!("send_attempts was set to 0. Setting to 1.");
        config.send_attempts = 1;
    }
    if config.batch_size == Some(0) {
        tracing::warn!("batch_size was set to 0. Batch throttling is disabled.");
        config.batch_size = None;
    }
    if config.smtp_chunk_size == 0 {
        tracing::warn!("SMTP chunk size was set to 0. Setting to 1.");
        config.smtp_chunk_size = 1;
    }
    if config.smtp_connect_attempts == 0 {
        tracing::warn!("SMTP connect attempts was set to 0. Setting to 1.");
        config.smtp_connect_attempts = 1;
    }
    if config.smtp.port == 0 {
        return Err(AppError::Config("SMTP port cannot be 0.".to_string()));
    }
    if !config.smtp.password.is_empty() && config.smtp.username.is_empty() {
        tracing::warn!("SMTP password is set without a user. The session will not authenticate.");
    }
    let (min, max) = config.slow_mode_range;
    if min > max {
        tracing::warn!(
            "Slow-mode min ({}s) > max ({}s). Setting max = min.",
            min,
            max
        );
        config.slow_mode_range.1 = min;
    }
    if config.spam_recipients == 0 {
        return Err(AppError::Config(
            "spam_recipients must be at least 1.".to_string(),
        ));
    }
    Ok(())
}
