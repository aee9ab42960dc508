//! Defines the structure mirroring the TOML configuration file format.

use serde::Deserialize;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub(crate) engine: EngineConfig,
    #[serde(default)]
    pub(crate) retry: RetryConfig,
    #[serde(default)]
    pub(crate) dispatch: DispatchConfig,
    #[serde(default)]
    pub(crate) smtp: SmtpConfig,
    #[serde(default)]
    pub(crate) warmup: WarmupConfig,
    #[serde(default)]
    pub(crate) clickhouse_spam_tests: ClickHouseSection,
    #[serde(default)]
    pub(crate) clickhouse_smtp_log: ClickHouseSection,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct EngineConfig {
    pub(crate) primary_url: Option<String>,
    pub(crate) primary_key: Option<String>,
    pub(crate) secondary_url: Option<String>,
    pub(crate) secondary_key: Option<String>,
    pub(crate) request_timeout: Option<u64>,
    pub(crate) server_timeout_ms: Option<u64>,
    pub(crate) user_agent: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct RetryConfig {
    pub(crate) max_retries: Option<u32>,
    pub(crate) delay: Option<u64>,
    pub(crate) failover_on_transient: Option<bool>,
    pub(crate) send_attempts: Option<u32>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct DispatchConfig {
    pub(crate) workers: Option<usize>,
    pub(crate) batch_size: Option<usize>,
    pub(crate) batch_pause: Option<u64>,
    pub(crate) record_permanent: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct SmtpConfig {
    pub(crate) server: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) timeout: Option<u64>,
    pub(crate) hello_name: Option<String>,
    pub(crate) starttls: Option<bool>,
    pub(crate) chunk_size: Option<usize>,
    pub(crate) refresh_every: Option<u32>,
    pub(crate) connect_attempts: Option<u32>,
    pub(crate) connect_backoff: Option<u64>,
    pub(crate) slow_min: Option<u64>,
    pub(crate) slow_max: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct WarmupConfig {
    pub(crate) same_sender_count: Option<usize>,
    pub(crate) original_sender_count: Option<usize>,
    pub(crate) warmup_sender_count: Option<usize>,
    pub(crate) spam_recipients: Option<usize>,
    pub(crate) burned_sends_per_sender: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct ClickHouseSection {
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) user: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<String>,
    pub(crate) secure: Option<bool>,
    pub(crate) verify: Option<bool>,
}
