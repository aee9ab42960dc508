//! Fetches candidate rows from ClickHouse over its HTTP interface.
//!
//! Only the HTTP(S) port works here (8123, or 8443 with TLS); the native
//! protocol ports (9000, 9440) will not answer.

use crate::core::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_HTTP_PORT: u16 = 8123;

/// Connection settings for one ClickHouse database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickHouseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// `None` derives TLS from the port.
    pub secure: Option<bool>,
    pub verify: bool,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_HTTP_PORT,
            user: "default".to_string(),
            password: String::new(),
            database: "default".to_string(),
            secure: None,
            verify: false,
        }
    }
}

impl ClickHouseConfig {
    pub fn is_secure(&self) -> bool {
        self.secure
            .unwrap_or_else(|| Self::secure_by_default(self.port))
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.is_secure() { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }

    /// HTTPS ports, which imply TLS when `secure` is not set explicitly.
    pub fn secure_by_default(port: u16) -> bool {
        matches!(port, 443 | 8443)
    }
}

#[derive(Deserialize)]
struct JsonPayload {
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Appends `FORMAT JSON` unless the query already ends with it.
pub fn with_json_format(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.to_lowercase().ends_with("format json") {
        trimmed.to_string()
    } else {
        format!("{}\nFORMAT JSON", trimmed.trim_end_matches(';').trim_end())
    }
}

/// Row source backed by the ClickHouse HTTP endpoint.
#[derive(Clone)]
pub struct ClickHouseSource {
    client: reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseSource {
    pub fn new(config: ClickHouseConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(config.is_secure() && !config.verify)
            .build()
            .map_err(|e| AppError::Initialization(format!("Failed to build ClickHouse client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Runs `query` and returns its rows as JSON objects.
    pub async fn fetch_rows(&self, query: &str) -> Result<Vec<Map<String, Value>>> {
        let body = with_json_format(query);
        tracing::debug!(target: "source", "Querying {} ({} bytes)", self.config.base_url(), body.len());

        let response = self
            .client
            .post(self.config.base_url())
            .query(&[
                ("user", self.config.user.as_str()),
                ("password", self.config.password.as_str()),
                ("database", self.config.database.as_str()),
            ])
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Query(format!(
                "ClickHouse returned {}: {}",
                status,
                text.trim()
            )));
        }

        let payload: JsonPayload = response.json().await?;
        tracing::info!(target: "source", "Fetched {} rows from {}", payload.data.len(), self.config.host);
        Ok(payload.data)
    }

    /// Runs `query` and deserializes each row, skipping rows that do not fit `T`.
    pub async fn fetch<T: DeserializeOwned>(&self, query: &str) -> Result<Vec<T>> {
        let rows = self.fetch_rows(query).await?;
        Ok(decode_rows(rows))
    }
}

/// Deserializes rows into `T`, logging and dropping the ones that fail.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Map<String, Value>>) -> Vec<T> {
    let total = rows.len();
    let decoded: Vec<T> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(Value::Object(row)) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(target: "source", "Dropping malformed row: {}", e);
                None
            }
        })
        .collect();
    if decoded.len() < total {
        tracing::warn!(target: "source",
            "Skipped {} of {} rows that did not match the expected shape.",
            total - decoded.len(), total
        );
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_format_json_once() {
        assert_eq!(with_json_format("SELECT 1;"), "SELECT 1\nFORMAT JSON");
        assert_eq!(with_json_format("SELECT 1 FORMAT JSON"), "SELECT 1 FORMAT JSON");
        assert_eq!(with_json_format("  select 1\nformat json  "), "select 1\nformat json");
    }

    #[test]
    fn defaults_target_the_http_interface() {
        let config = ClickHouseConfig::default();
        assert_eq!(config.port, 8123);
        assert_eq!(config.base_url(), "http://localhost:8123/");
    }

    #[test]
    fn base_url_follows_secure_flag() {
        let mut config = ClickHouseConfig {
            host: "ch.internal".into(),
            port: 8443,
            ..ClickHouseConfig::default()
        };
        assert_eq!(config.base_url(), "https://ch.internal:8443/");
        config.secure = Some(false);
        assert_eq!(config.base_url(), "http://ch.internal:8443/");
        config.secure = Some(true);
        config.port = 8123;
        assert_eq!(config.base_url(), "https://ch.internal:8123/");
        assert!(!ClickHouseConfig::secure_by_default(8123));
        assert!(!ClickHouseConfig::secure_by_default(9000));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        ee_id: String,
        ee_account_id: String,
    }

    #[test]
    fn decode_rows_drops_malformed() {
        let rows = vec![
            json!({"ee_id": "m1", "ee_account_id": "a1"}),
            json!({"ee_id": "m2"}),
            json!({"ee_id": "m3", "ee_account_id": "a3", "extra": 1}),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        })
        .collect();
        let pairs: Vec<Pair> = decode_rows(rows);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].ee_id, "m3");
    }
}
