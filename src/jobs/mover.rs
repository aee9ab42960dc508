//! Folder-move jobs: fetch message ids, skip the ones already moved, and move
//! the rest through the mail-engine API.

use crate::core::config::Config;
use crate::core::dispatcher::{DispatchOptions, Dispatcher};
use crate::core::error::{AppError, Result};
use crate::core::ledger::{Ledger, LedgerFormat};
use crate::core::models::{Endpoint, KeyShape, MoveRequest, RunSummary};
use crate::remote::mover::HttpMover;
use crate::source::clickhouse::ClickHouseSource;
use crate::source::{files, queries};
use indicatif::ProgressBar;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Which way messages move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    /// Spam-test copies that reached the inbox go to junk.
    Spam,
    /// Warmup copies that reached junk go back to the inbox.
    Inbox,
    /// Query-supplied pairs go to a caller-chosen folder.
    Custom,
}

impl MoveTarget {
    pub fn default_folder(&self) -> &'static str {
        match self {
            MoveTarget::Spam => "\\Junk",
            MoveTarget::Inbox | MoveTarget::Custom => "INBOX",
        }
    }

    pub fn default_ledger(&self) -> (&'static str, LedgerFormat) {
        match self {
            MoveTarget::Spam => ("spam_log.txt", LedgerFormat::Lines),
            MoveTarget::Inbox => ("inbox_log.csv", LedgerFormat::Pairs),
            MoveTarget::Custom => ("logs.txt", LedgerFormat::Lines),
        }
    }

    pub fn key_shape(&self) -> KeyShape {
        match self {
            MoveTarget::Inbox => KeyShape::MessageAndAccount,
            MoveTarget::Spam | MoveTarget::Custom => KeyShape::MessageId,
        }
    }

    /// `None` means the job needs a query file.
    pub fn default_query(&self) -> Option<&'static str> {
        match self {
            MoveTarget::Spam => Some(queries::SPAM_MOVE),
            MoveTarget::Inbox => Some(queries::INBOX_MOVE),
            MoveTarget::Custom => None,
        }
    }

    /// Inbox moves are throttled to spare the mail engine.
    pub fn default_batch_size(&self) -> Option<usize> {
        match self {
            MoveTarget::Inbox => Some(600),
            _ => None,
        }
    }
}

/// One move run.
#[derive(Debug, Clone)]
pub struct MoveJob {
    pub target: MoveTarget,
    pub folder: Option<String>,
    pub ledger_path: Option<PathBuf>,
    pub query_file: Option<PathBuf>,
    pub seed_list: PathBuf,
}

impl MoveJob {
    pub fn new(target: MoveTarget) -> Self {
        Self {
            target,
            folder: None,
            ledger_path: None,
            query_file: None,
            seed_list: PathBuf::from("seed_list_all.csv"),
        }
    }

    pub fn folder(&self) -> &str {
        self.folder.as_deref().unwrap_or(self.target.default_folder())
    }

    pub fn ledger(&self) -> Ledger {
        let (default_path, format) = self.target.default_ledger();
        let path = self
            .ledger_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_path));
        Ledger::new(path, format)
    }
}

/// Query row carrying the account id directly.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageAccountRow {
    pub ee_id: String,
    pub ee_account_id: String,
}

/// Query row carrying the seed recipient instead of an account id.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecipientRow {
    pub ee_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

pub fn requests_from_rows(rows: Vec<MessageAccountRow>, folder: &str, key_shape: KeyShape) -> Vec<MoveRequest> {
    rows.into_iter()
        .map(|row| MoveRequest {
            message_id: row.ee_id,
            account_id: row.ee_account_id,
            folder: folder.to_string(),
            key_shape,
        })
        .collect()
}

/// Resolves each row's recipient to its seed account id (case-insensitive).
/// Returns the requests and the number of rows with no matching seed.
pub fn requests_from_recipients(
    rows: Vec<MessageRecipientRow>,
    seed_accounts: &HashMap<String, String>,
    folder: &str,
) -> (Vec<MoveRequest>, usize) {
    let mut missing = 0usize;
    let requests = rows
        .into_iter()
        .filter_map(|row| {
            let email = row.email.unwrap_or_default().trim().to_lowercase();
            match seed_accounts.get(&email) {
                Some(account) => Some(MoveRequest {
                    message_id: row.ee_id,
                    account_id: account.clone(),
                    folder: folder.to_string(),
                    key_shape: KeyShape::MessageAndAccount,
                }),
                None => {
                    missing += 1;
                    None
                }
            }
        })
        .collect();
    (requests, missing)
}

/// Returns the move requests and the number of fetched rows that could not be mapped.
async fn fetch_candidates(config: &Config, job: &MoveJob) -> Result<(Vec<MoveRequest>, usize)> {
    let query = match job.target.default_query() {
        Some(default) => queries::load_query(job.query_file.as_deref(), default)?,
        None => match job.query_file.as_deref() {
            Some(path) => queries::load_query(Some(path), "")?,
            None => {
                return Err(AppError::Config(
                    "The custom move target needs --query-file".to_string(),
                ))
            }
        },
    };
    let source = ClickHouseSource::new(config.spam_tests_ch.clone(), config.request_timeout)?;

    match job.target {
        MoveTarget::Inbox => {
            let seed_accounts = files::read_seed_accounts(&job.seed_list)?;
            if seed_accounts.is_empty() {
                return Err(AppError::InsufficientInput(format!(
                    "No seed accounts loaded from {}",
                    job.seed_list.display()
                )));
            }
            let rows: Vec<MessageRecipientRow> = source.fetch(&query).await?;
            let (requests, missing) = requests_from_recipients(rows, &seed_accounts, job.folder());
            if missing > 0 {
                tracing::info!(target: "mover",
                    "Skipped {} messages without a matching ee_account_id in {}.",
                    missing, job.seed_list.display()
                );
            }
            Ok((requests, missing))
        }
        MoveTarget::Spam | MoveTarget::Custom => {
            let rows: Vec<MessageAccountRow> = source.fetch(&query).await?;
            Ok((requests_from_rows(rows, job.folder(), job.target.key_shape()), 0))
        }
    }
}

/// Dispatch options for a move run: the configured values, falling back to
/// the target's own defaults.
pub fn dispatch_options(config: &Config, target: MoveTarget) -> DispatchOptions {
    DispatchOptions {
        workers: config.workers.unwrap_or(3),
        shuffle: target == MoveTarget::Inbox,
        chunk_size: 1,
        batch_size: config.batch_size.or(target.default_batch_size()),
        batch_pause: config.batch_pause,
        record_permanent: config.record_permanent,
    }
}

/// Moves already-fetched candidates, skipping those the ledger has seen.
pub async fn dispatch_moves(
    config: &Config,
    job: &MoveJob,
    candidates: Vec<MoveRequest>,
    endpoints: Vec<Endpoint>,
    progress: Option<ProgressBar>,
) -> Result<RunSummary> {
    let ledger = Arc::new(job.ledger());
    let client = HttpMover::build_client(config.request_timeout, &config.user_agent)?;
    let server_timeout_ms = config.server_timeout_ms;

    let mut dispatcher = Dispatcher::new(
        dispatch_options(config, job.target),
        config.move_policy(),
        endpoints,
    );
    if let Some(bar) = progress {
        dispatcher = dispatcher.with_progress(bar);
    }

    dispatcher
        .run(candidates, Some(ledger), |_| {
            Ok(HttpMover::new(client.clone(), server_timeout_ms))
        })
        .await
}

/// Runs a full move job: fetch, filter against the ledger, move.
pub async fn run_move(config: &Config, job: &MoveJob, progress: Option<ProgressBar>) -> Result<RunSummary> {
    let endpoints = config.require_usable_endpoints()?;
    for endpoint in endpoints.iter().filter(|e| !e.has_credential()) {
        tracing::warn!(target: "mover",
            "Endpoint {} ({}) has no API key and will be skipped.", endpoint.name, endpoint.base_url
        );
    }

    let (candidates, unmapped) = fetch_candidates(config, job).await?;
    tracing::info!(target: "mover",
        "Fetched {} messages to move to {} ({} unmapped).",
        candidates.len() + unmapped, job.folder(), unmapped
    );

    let mut summary = dispatch_moves(config, job, candidates, endpoints, progress).await?;
    summary.record_unmapped(unmapped);
    tracing::info!(target: "mover",
        "Moved {} messages to {} ({} already logged, {} unmapped, {} not found, {} failed).",
        summary.success_count(), job.folder(), summary.skipped, summary.unmapped,
        summary.not_found, summary.failed
    );
    Ok(summary)
}
