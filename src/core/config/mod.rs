//! Defines the core runtime `Config` struct, its defaults, and related utilities.
//! Submodules handle loading, building, and validation.

pub(crate) mod builder;
pub(crate) mod file;
pub(crate) mod loading;
pub(crate) mod validation;

pub use builder::ConfigBuilder;
pub use file::ConfigFile;

use crate::core::error::{AppError, Result};
use crate::core::models::Endpoint;
use crate::core::policy::RetryPolicy;
use crate::remote::smtp::SmtpSettings;
use crate::source::clickhouse::ClickHouseConfig;
use std::time::Duration;

pub const DEFAULT_PRIMARY_URL: &str = "https://maileng.maildoso.co";
pub const DEFAULT_SECONDARY_URL: &str = "https://maileng-2.maildoso.co";

/// Runtime configuration settings used by the dispatch jobs.
#[derive(Clone)]
pub struct Config {
    pub primary_url: String,
    pub primary_key: Option<String>,
    pub secondary_url: String,
    pub secondary_key: Option<String>,
    pub request_timeout: Duration,
    pub server_timeout_ms: u64,
    pub user_agent: String,

    pub max_retries: u32,
    pub retry_delay: Duration,
    pub failover_on_transient: bool,
    pub send_attempts: u32,

    /// `None` lets each job pick its own default.
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub batch_pause: Duration,
    pub record_permanent: bool,

    pub smtp: SmtpSettings,
    pub smtp_chunk_size: usize,
    pub smtp_refresh_every: u32,
    pub smtp_connect_attempts: u32,
    pub smtp_connect_backoff: Duration,
    pub slow_mode_range: (u64, u64),

    /// `None` lets the send mode pick (1 for warmup, 6 for domains).
    pub same_sender_count: Option<usize>,
    pub original_sender_count: usize,
    pub warmup_sender_count: usize,
    pub spam_recipients: usize,
    pub burned_sends_per_sender: usize,

    pub spam_tests_ch: ClickHouseConfig,
    pub smtp_log_ch: ClickHouseConfig,

    pub loaded_config_path: Option<String>,
}

impl Config {
    fn build_default() -> Self {
        Config {
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            primary_key: None,
            secondary_url: DEFAULT_SECONDARY_URL.to_string(),
            secondary_key: None,
            request_timeout: Duration::from_secs(30),
            server_timeout_ms: 6000,
            user_agent: format!("mail-dispatch/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 5,
            retry_delay: Duration::from_secs(6),
            failover_on_transient: false,
            send_attempts: 2,
            workers: None,
            batch_size: None,
            batch_pause: Duration::from_secs(7),
            record_permanent: false,
            smtp: SmtpSettings {
                server: String::new(),
                port: 587,
                username: String::new(),
                password: String::new(),
                timeout: Duration::from_secs(30),
                hello_name: "localhost".to_string(),
                starttls: true,
            },
            smtp_chunk_size: 100,
            smtp_refresh_every: 5,
            smtp_connect_attempts: 3,
            smtp_connect_backoff: Duration::from_secs(1),
            slow_mode_range: (49, 100),
            same_sender_count: None,
            original_sender_count: 0,
            warmup_sender_count: 3,
            spam_recipients: 5,
            burned_sends_per_sender: 20,
            spam_tests_ch: ClickHouseConfig::default(),
            smtp_log_ch: ClickHouseConfig::default(),
            loaded_config_path: None,
        }
    }

    /// Mail-engine endpoints in priority order, keys included.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint::new("primary", &self.primary_url, self.primary_key.clone()),
            Endpoint::new("secondary", &self.secondary_url, self.secondary_key.clone()),
        ]
    }

    /// Endpoints for jobs that need an API key; errors when none has one.
    pub fn require_usable_endpoints(&self) -> Result<Vec<Endpoint>> {
        let endpoints = self.endpoints();
        if !endpoints.iter().any(Endpoint::has_credential) {
            return Err(AppError::Config(
                "No mail-engine endpoint has an API key (set EE_PRIMARY_API or EE_SECONDARY_API)."
                    .to_string(),
            ));
        }
        Ok(endpoints)
    }

    pub fn move_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
            .failover_on_transient(self.failover_on_transient)
    }

    /// Two attempts with no delay: the second one runs on a fresh connection.
    pub fn send_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.send_attempts, Duration::ZERO)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::build_default()
    }
}

fn redact(value: &Option<String>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "<set>",
        _ => "<unset>",
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("primary_url", &self.primary_url)
            .field("primary_key", &redact(&self.primary_key))
            .field("secondary_url", &self.secondary_url)
            .field("secondary_key", &redact(&self.secondary_key))
            .field("request_timeout", &self.request_timeout)
            .field("server_timeout_ms", &self.server_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("failover_on_transient", &self.failover_on_transient)
            .field("workers", &self.workers)
            .field("batch_size", &self.batch_size)
            .field("batch_pause", &self.batch_pause)
            .field("smtp_server", &self.smtp.server)
            .field("smtp_port", &self.smtp.port)
            .field("smtp_user", &self.smtp.username)
            .field("smtp_chunk_size", &self.smtp_chunk_size)
            .field("same_sender_count", &self.same_sender_count)
            .field("original_sender_count", &self.original_sender_count)
            .field("warmup_sender_count", &self.warmup_sender_count)
            .field("spam_tests_ch_host", &self.spam_tests_ch.host)
            .field("smtp_log_ch_host", &self.smtp_log_ch.host)
            .field("loaded_config_path", &self.loaded_config_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_pipeline() {
        let config = Config::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(6));
        assert_eq!(config.server_timeout_ms, 6000);
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.warmup_sender_count, 3);
        assert_eq!(config.endpoints()[0].base_url, DEFAULT_PRIMARY_URL);
    }

    #[test]
    fn endpoints_without_keys_are_rejected() {
        let mut config = Config::default();
        assert!(matches!(config.require_usable_endpoints(), Err(AppError::Config(_))));
        config.secondary_key = Some("k2".into());
        let endpoints = config.require_usable_endpoints().unwrap();
        assert!(!endpoints[0].has_credential());
        assert!(endpoints[1].has_credential());
    }

    #[test]
    fn debug_output_hides_keys() {
        let mut config = Config::default();
        config.primary_key = Some("super-secret".into());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<set>"));
    }
}
