//! Bounded retries with ordered endpoint failover.

use crate::core::models::{Endpoint, WorkItem};
use crate::core::outcome::Outcome;
use crate::remote::RemoteOperation;
use std::time::Duration;

/// Wraps a [`RemoteOperation`] with per-endpoint retries and failover.
///
/// Endpoints are tried in the order given. On each endpoint the operation is
/// attempted up to `max(max_retries, 1)` times, sleeping `delay` between
/// attempts, until a terminal outcome. A permanent failure moves on to the
/// next endpoint ("not on this shard"); a success returns immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    /// Also fail over after retries on one endpoint end in a transient failure.
    pub failover_on_transient: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(6),
            failover_on_transient: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            failover_on_transient: false,
        }
    }

    pub fn failover_on_transient(mut self, enable: bool) -> Self {
        self.failover_on_transient = enable;
        self
    }

    /// A budget of zero still makes one attempt.
    pub fn attempts_per_endpoint(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Runs `op` for `item` across `endpoints` and returns the final outcome.
    pub async fn execute<O>(&self, op: &mut O, endpoints: &[Endpoint], item: &O::Item) -> Outcome
    where
        O: RemoteOperation + ?Sized,
    {
        let mut last: Option<Outcome> = None;

        for (idx, endpoint) in endpoints.iter().enumerate() {
            if op.requires_credential() && !endpoint.has_credential() {
                tracing::warn!(target: "policy",
                    "Skipping endpoint {} ({}) due to missing credential.",
                    endpoint.name, endpoint.base_url
                );
                continue;
            }

            let outcome = self.run_endpoint(op, endpoint, item).await;
            let more_remaining = idx + 1 < endpoints.len();

            match &outcome {
                Outcome::Success(_) => return outcome,
                Outcome::PermanentFailure(_) if more_remaining => {
                    tracing::debug!(target: "policy",
                        "[{}] Permanent failure on {}, trying next endpoint.",
                        item.label(), endpoint.name
                    );
                }
                Outcome::TransientFailure(_) | Outcome::ProtocolError(_)
                    if more_remaining && self.failover_on_transient =>
                {
                    tracing::info!(target: "policy",
                        "[{}] Retries exhausted on {} ({}), failing over.",
                        item.label(), endpoint.name, outcome
                    );
                }
                _ => return outcome,
            }
            last = Some(outcome);
        }

        last.unwrap_or_else(|| Outcome::transient("no usable endpoint"))
    }

    async fn run_endpoint<O>(&self, op: &mut O, endpoint: &Endpoint, item: &O::Item) -> Outcome
    where
        O: RemoteOperation + ?Sized,
    {
        let attempts = self.attempts_per_endpoint();
        let mut attempt = 1;
        loop {
            let outcome = op.attempt(endpoint, item).await;
            if outcome.is_terminal() {
                return outcome;
            }
            if attempt >= attempts {
                tracing::warn!(target: "policy",
                    "[{}] Failed after {} attempts on {}. Last: {}",
                    item.label(), attempts, endpoint.name, outcome
                );
                return outcome;
            }
            tracing::debug!(target: "policy",
                "[{}] Retry {}/{} on {} - {}",
                item.label(), attempt, attempts, endpoint.name, outcome
            );
            attempt += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}
