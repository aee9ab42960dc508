//! Moves stored messages between mailbox folders through the mail-engine HTTP API.

use super::RemoteOperation;
use crate::core::error::{AppError, Result};
use crate::core::models::{Endpoint, MoveRequest};
use crate::core::outcome::{Outcome, Reply};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const SERVER_TIMEOUT_HEADER: &str = "x-ee-timeout";

/// `PUT {endpoint}/v1/account/{account}/message/{message}/move` client.
#[derive(Clone)]
pub struct HttpMover {
    client: reqwest::Client,
    server_timeout_ms: u64,
}

impl HttpMover {
    pub fn new(client: reqwest::Client, server_timeout_ms: u64) -> Self {
        Self {
            client,
            server_timeout_ms,
        }
    }

    /// Builds the HTTP client shared (by clone) between workers.
    pub fn build_client(request_timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| AppError::Initialization(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Builds the move URL, percent-encoding the account and message segments.
pub fn move_url(base_url: &str, account: &str, message: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("Endpoint URL cannot be a base: {}", base_url)))?
        .pop_if_empty()
        .extend(["v1", "account", account, "message", message, "move"]);
    Ok(url)
}

/// Maps an HTTP status and body onto an [`Outcome`].
///
/// 404 is permanent whatever the body says; any status other than 200 or
/// 404 is transient. A 200 whose body is not JSON is a protocol error. An
/// empty body is read as `{}`.
pub fn classify_response(status: u16, body: &[u8], endpoint: &str) -> Outcome {
    let parsed: std::result::Result<Value, _> = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(json!({}))
    } else {
        serde_json::from_slice(body)
    };

    let reply = Reply::new(describe(status, parsed.as_ref().ok()))
        .with_status(status)
        .with_endpoint(endpoint);

    match (status, parsed) {
        (404, Ok(body)) => Outcome::permanent(reply.with_body(body)),
        (404, Err(_)) => Outcome::permanent(reply),
        (200, Ok(body)) => Outcome::success(reply.with_body(body)),
        (200, Err(e)) => Outcome::ProtocolError(Reply {
            detail: format!("unparseable response body: {}", e),
            ..reply
        }),
        (_, Ok(body)) => Outcome::TransientFailure(reply.with_body(body)),
        (_, Err(_)) => Outcome::TransientFailure(reply),
    }
}

fn describe(status: u16, body: Option<&Value>) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    match body.and_then(|b| b.get("error").or_else(|| b.get("message"))) {
        Some(Value::String(msg)) => format!("{} {}: {}", status, reason, msg),
        _ => format!("{} {}", status, reason),
    }
}

#[async_trait]
impl RemoteOperation for HttpMover {
    type Item = MoveRequest;

    async fn attempt(&mut self, endpoint: &Endpoint, item: &MoveRequest) -> Outcome {
        let url = match move_url(&endpoint.base_url, &item.account_id, &item.message_id) {
            Ok(url) => url,
            Err(e) => {
                return Outcome::TransientFailure(
                    Reply::new(e.to_string()).with_endpoint(&endpoint.base_url),
                )
            }
        };

        tracing::debug!(target: "mover",
            "PUT {} (folder={:?}) via {}", url, item.folder, endpoint.name
        );

        let response = self
            .client
            .put(url)
            .bearer_auth(endpoint.credential.as_deref().unwrap_or_default())
            .header(SERVER_TIMEOUT_HEADER, self.server_timeout_ms.to_string())
            .json(&json!({ "path": item.folder }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(target: "mover", "Request to {} failed: {}", endpoint.name, e);
                return Outcome::TransientFailure(
                    Reply::new(format!("request failed: {}", e)).with_endpoint(&endpoint.base_url),
                );
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => classify_response(status, &body, &endpoint.base_url),
            Err(e) => Outcome::TransientFailure(
                Reply::new(format!("failed reading body: {}", e))
                    .with_status(status)
                    .with_endpoint(&endpoint.base_url),
            ),
        }
    }
}
