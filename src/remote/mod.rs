//! Remote operations: the one-shot calls a worker makes for each work item.
//!
//! An operation performs exactly one network call (or one transmission) per
//! [`RemoteOperation::attempt`] and never retries on its own; retries and
//! endpoint failover belong to [`RetryPolicy`](crate::RetryPolicy).

pub mod mover;
pub mod smtp;

use crate::core::models::{Endpoint, WorkItem};
use crate::core::outcome::Outcome;
use async_trait::async_trait;

/// One-shot call to an external system.
///
/// Each dispatcher worker owns its own instance, so implementations may keep
/// per-worker state (an open SMTP session, counters) behind `&mut self`.
#[async_trait]
pub trait RemoteOperation: Send + 'static {
    type Item: WorkItem;

    /// Whether endpoints without a credential must be skipped.
    fn requires_credential(&self) -> bool {
        true
    }

    /// Performs exactly one attempt against `endpoint`.
    async fn attempt(&mut self, endpoint: &Endpoint, item: &Self::Item) -> Outcome;

    /// Called after the worker finishes a chunk of items.
    async fn end_chunk(&mut self) {}

    /// Called once when the worker runs out of work.
    async fn shutdown(&mut self) {}
}
