//! # Mail Dispatch Core Library
//!
//! Resumable, at-least-once dispatch for an email deliverability pipeline:
//! pull candidate records, skip the ones an append-only ledger has already
//! seen, fan the rest out to a fixed worker pool, run one remote operation per
//! item under a retry/failover policy, and record each success as it happens.
//!
//! Two job families are built on top: mailbox folder moves through the
//! mail-engine HTTP API ([`jobs::mover`]) and synthetic warmup/spam-test sends
//! over SMTP ([`jobs::sender`]). The `mail-dispatch` binary drives both.

pub mod core;
pub mod jobs;
pub mod remote;
pub mod source;

pub use crate::core::config::{Config, ConfigBuilder, ConfigFile};
pub use crate::core::dispatcher::{DispatchOptions, Dispatcher};
pub use crate::core::error::{AppError, Result};
pub use crate::core::ledger::{Ledger, LedgerFormat};
pub use crate::core::models::{
    Endpoint, KeyShape, LedgerKey, MessageCategory, MoveRequest, RunSummary, SendRequest,
    TemplateMessage, WorkItem,
};
pub use crate::core::outcome::{Outcome, OutcomeKind, Reply};
pub use crate::core::policy::RetryPolicy;
pub use crate::jobs::{run_move, run_send, MoveJob, MoveTarget, SendJob, SendMode};
pub use crate::remote::RemoteOperation;
