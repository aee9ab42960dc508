//! Handles loading configuration from files and the environment and applying
//! it to the Config struct.

use super::{Config, ConfigFile};
use super::file::ClickHouseSection;
use crate::core::error::{AppError, Result};
use crate::source::clickhouse::ClickHouseConfig;
use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Loads configuration settings from a TOML file.
/// Internal to the builder logic.
pub(crate) fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!(
            "File not found or is not a file: {}",
            file_path
        ));
    }
    tracing::debug!("Attempting to read config file: {}", file_path);
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config_file_content: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::debug!("Successfully parsed configuration file: {}", file_path);
    Ok(config_file_content)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn apply_clickhouse_section(target: &mut ClickHouseConfig, section: &ClickHouseSection) {
    if let Some(ref host) = section.host {
        target.host = host.clone();
    }
    if let Some(port) = section.port {
        target.port = port;
    }
    if let Some(ref user) = section.user {
        target.user = user.clone();
    }
    if let Some(ref password) = section.password {
        target.password = password.clone();
    }
    if let Some(ref database) = section.database {
        target.database = database.clone();
    }
    if let Some(secure) = section.secure {
        target.secure = Some(secure);
    }
    if let Some(verify) = section.verify {
        target.verify = verify;
    }
}

/// Applies settings from a parsed `ConfigFile` onto a mutable `Config` instance.
/// Internal helper for the builder. This merges settings.
pub(crate) fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    // Engine
    let engine = &file_config.engine;
    if let Some(url) = non_blank(&engine.primary_url) {
        config.primary_url = url;
    }
    if engine.primary_key.is_some() {
        config.primary_key = non_blank(&engine.primary_key);
    }
    if let Some(url) = non_blank(&engine.secondary_url) {
        config.secondary_url = url;
    }
    if engine.secondary_key.is_some() {
        config.secondary_key = non_blank(&engine.secondary_key);
    }
    if let Some(timeout) = engine.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
    if let Some(ms) = engine.server_timeout_ms {
        config.server_timeout_ms = ms;
    }
    if let Some(ref user_agent) = engine.user_agent {
        config.user_agent = user_agent.clone();
    }

    // Retry
    if let Some(retries) = file_config.retry.max_retries {
        config.max_retries = retries;
    }
    if let Some(delay) = file_config.retry.delay {
        config.retry_delay = Duration::from_secs(delay);
    }
    if let Some(enable) = file_config.retry.failover_on_transient {
        config.failover_on_transient = enable;
    }
    if let Some(attempts) = file_config.retry.send_attempts {
        config.send_attempts = attempts;
    }

    // Dispatch
    if let Some(workers) = file_config.dispatch.workers {
        config.workers = Some(workers);
    }
    if let Some(size) = file_config.dispatch.batch_size {
        config.batch_size = Some(size);
    }
    if let Some(pause) = file_config.dispatch.batch_pause {
        config.batch_pause = Duration::from_secs(pause);
    }
    if let Some(enable) = file_config.dispatch.record_permanent {
        config.record_permanent = enable;
    }

    // SMTP
    let smtp = &file_config.smtp;
    if let Some(ref server) = smtp.server {
        config.smtp.server = server.trim().to_string();
    }
    if let Some(port) = smtp.port {
        config.smtp.port = port;
    }
    if let Some(ref username) = smtp.username {
        config.smtp.username = username.clone();
    }
    if let Some(ref password) = smtp.password {
        config.smtp.password = password.clone();
    }
    if let Some(timeout) = smtp.timeout {
        config.smtp.timeout = Duration::from_secs(timeout);
    }
    if let Some(hello) = non_blank(&smtp.hello_name) {
        config.smtp.hello_name = hello;
    }
    if let Some(starttls) = smtp.starttls {
        config.smtp.starttls = starttls;
    }
    if let Some(size) = smtp.chunk_size {
        config.smtp_chunk_size = size;
    }
    if let Some(every) = smtp.refresh_every {
        config.smtp_refresh_every = every;
    }
    if let Some(attempts) = smtp.connect_attempts {
        config.smtp_connect_attempts = attempts;
    }
    if let Some(backoff) = smtp.connect_backoff {
        config.smtp_connect_backoff = Duration::from_secs(backoff);
    }
    if let Some(min) = smtp.slow_min {
        config.slow_mode_range.0 = min;
    }
    if let Some(max) = smtp.slow_max {
        config.slow_mode_range.1 = max;
    }

    // Warmup
    let warmup = &file_config.warmup;
    if let Some(count) = warmup.same_sender_count {
        config.same_sender_count = Some(count);
    }
    if let Some(count) = warmup.original_sender_count {
        config.original_sender_count = count;
    }
    if let Some(count) = warmup.warmup_sender_count {
        config.warmup_sender_count = count;
    }
    if let Some(count) = warmup.spam_recipients {
        config.spam_recipients = count;
    }
    if let Some(count) = warmup.burned_sends_per_sender {
        config.burned_sends_per_sender = count;
    }

    // ClickHouse
    apply_clickhouse_section(&mut config.spam_tests_ch, &file_config.clickhouse_spam_tests);
    apply_clickhouse_section(&mut config.smtp_log_ch, &file_config.clickhouse_smtp_log);
}

/// Accepts `1/true/yes/y/on` (case-insensitive) as true, anything else as false.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

struct EnvReader<'a> {
    vars: &'a HashMap<String, String>,
}

impl<'a> EnvReader<'a> {
    /// First non-empty value among `keys`.
    fn get(&self, keys: &[&str]) -> Option<&'a str> {
        keys.iter()
            .filter_map(|k| self.vars.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, keys: &[&str]) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(keys) {
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                AppError::Config(format!("Invalid value '{}' for {}: {}", raw, keys[0], e))
            }),
            None => Ok(None),
        }
    }
}

fn apply_clickhouse_env(
    target: &mut ClickHouseConfig,
    env: &EnvReader<'_>,
    prefix: &str,
    port_key: &str,
) -> Result<()> {
    let key = |name: &str| format!("{}_{}", prefix, name);

    if let Some(port) = env.parse::<u16>(&[port_key, "CH_PORT"])? {
        target.port = port;
    }
    if let Some(host) = env.get(&[key("CH_HOST").as_str(), "CH_HOST"]) {
        target.host = host.to_string();
    }
    if let Some(user) = env.get(&[key("CH_USER").as_str(), "CH_USER"]) {
        target.user = user.to_string();
    }
    if let Some(password) = env.get(&[key("CH_PASSWORD").as_str(), "CH_PASSWORD"]) {
        target.password = password.to_string();
    }
    if let Some(database) = env.get(&[key("CH_DATABASE").as_str(), "CH_DATABASE"]) {
        target.database = database.to_string();
    }
    if let Some(secure) = env.get(&[key("CH_SECURE").as_str(), "CH_SECURE"]) {
        target.secure = Some(parse_flag(secure));
    }
    if let Some(verify) = env.get(&[key("CH_VERIFY").as_str(), "CH_VERIFY"]) {
        target.verify = parse_flag(verify);
    }
    Ok(())
}

/// Applies the deployment environment keys onto `config`.
/// Blank values count as unset.
pub(crate) fn apply_env_config(config: &mut Config, vars: &HashMap<String, String>) -> Result<()> {
    let env = EnvReader { vars };

    if let Some(url) = env.get(&["EE_PRIMARY_URL"]) {
        config.primary_url = url.to_string();
    }
    if let Some(key) = env.get(&["EE_PRIMARY_API"]) {
        config.primary_key = Some(key.to_string());
    }
    if let Some(url) = env.get(&["EE_SECONDARY_URL", "EE_URL"]) {
        config.secondary_url = url.to_string();
    }
    if let Some(key) = env.get(&["EE_SECONDARY_API", "EE_API"]) {
        config.secondary_key = Some(key.to_string());
    }

    if let Some(workers) = env.parse::<usize>(&["PARALLEL_PROCESSES"])? {
        config.workers = Some(workers);
    }

    if let Some(server) = env.get(&["SMTP_SERVER"]) {
        config.smtp.server = server.to_string();
    }
    if let Some(port) = env.parse::<u16>(&["SMTP_PORT"])? {
        config.smtp.port = port;
    }
    if let Some(user) = env.get(&["SMTP_USER"]) {
        config.smtp.username = user.to_string();
    }
    if let Some(password) = env.get(&["SMTP_PASSWORD"]) {
        config.smtp.password = password.to_string();
    }

    if let Some(count) = env.parse::<usize>(&["WARMUP_SAME_SENDER_COUNT"])? {
        config.same_sender_count = Some(count);
    }
    if let Some(count) = env.parse::<usize>(&["WARMUP_ORIGINAL_SENDER_COUNT"])? {
        config.original_sender_count = count;
    }
    if let Some(count) = env.parse::<usize>(&["WARMUP_WARMUP_SENDER_COUNT"])? {
        config.warmup_sender_count = count;
    }

    apply_clickhouse_env(&mut config.spam_tests_ch, &env, "SPAM_TESTS", "SPAM_TESTS_CH_PORT")?;
    apply_clickhouse_env(&mut config.smtp_log_ch, &env, "SMTP_LOG", "SMTP_LOG_CH_PORT")?;
    Ok(())
}
