//! Send jobs: plan synthetic warmup or spam-test traffic and push it through
//! per-worker SMTP sessions.

use super::plan::{self, WarmupCounts};
use crate::core::config::Config;
use crate::core::dispatcher::{DispatchOptions, Dispatcher};
use crate::core::error::{AppError, Result};
use crate::core::models::{Endpoint, RunSummary, SendRequest, TemplateMessage};
use crate::remote::smtp::{
    ensure_resolvable, ComposeOptions, Connector, SenderOptions, SmtpConnector, SmtpSender,
};
use crate::source::clickhouse::ClickHouseSource;
use crate::source::{files, queries};
use chrono::Local;
use indicatif::ProgressBar;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Which traffic to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Per template: own sender, original sender, random warmup senders.
    Warmup,
    /// Every listed warmup sender sends every template.
    Senders,
    /// Spam-test blast from the spam sender list.
    Spam,
    /// Recovery traffic from senders that failed the spam test.
    Burned,
    /// Per-domain warmup across today's half of the account list.
    Domains,
}

impl SendMode {
    pub fn default_seed_list(&self) -> &'static str {
        match self {
            SendMode::Warmup | SendMode::Domains => "seed_list_all.csv",
            SendMode::Senders => "seed_list_warmup.csv",
            SendMode::Spam => "seed_list.txt",
            SendMode::Burned => "seed_list.csv",
        }
    }

    /// Sender list file, for the modes that read one.
    pub fn default_senders_file(&self) -> Option<&'static str> {
        match self {
            SendMode::Warmup | SendMode::Senders => Some("email_to_warmup.txt"),
            SendMode::Spam => Some("spam_senders.txt"),
            SendMode::Burned | SendMode::Domains => None,
        }
    }

    pub fn default_query(&self) -> &'static str {
        match self {
            SendMode::Warmup | SendMode::Senders => queries::WARMUP_MESSAGES,
            SendMode::Domains => queries::DOMAIN_WARMUP_MESSAGES,
            SendMode::Spam => queries::SPAM_TEST_MESSAGES,
            SendMode::Burned => queries::BURNED_MESSAGES,
        }
    }

    pub fn default_workers(&self) -> usize {
        match self {
            SendMode::Warmup | SendMode::Senders | SendMode::Domains => 4,
            SendMode::Spam | SendMode::Burned => 3,
        }
    }

    pub fn default_same_sender_count(&self) -> usize {
        match self {
            SendMode::Domains => 6,
            _ => 1,
        }
    }

    /// Whether templates must carry their own sender.
    fn needs_template_sender(&self) -> bool {
        matches!(self, SendMode::Warmup | SendMode::Domains)
    }
}

/// One send run.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub mode: SendMode,
    pub seed_list: Option<PathBuf>,
    pub senders_file: Option<PathBuf>,
    pub accounts_file: PathBuf,
    pub query_file: Option<PathBuf>,
    pub senders_query_file: Option<PathBuf>,
    pub compose: ComposeOptions,
    pub slow: bool,
}

impl SendJob {
    pub fn new(mode: SendMode) -> Self {
        Self {
            mode,
            seed_list: None,
            senders_file: None,
            accounts_file: PathBuf::from("accounts.csv"),
            query_file: None,
            senders_query_file: None,
            compose: ComposeOptions::default(),
            slow: false,
        }
    }

    pub fn seed_list(&self) -> PathBuf {
        self.seed_list
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.mode.default_seed_list()))
    }

    pub fn senders_file(&self) -> Option<PathBuf> {
        self.senders_file
            .clone()
            .or_else(|| self.mode.default_senders_file().map(PathBuf::from))
    }
}

#[derive(Debug, Deserialize)]
struct SenderRow {
    email: String,
}

fn require<T>(items: &[T], what: &str) -> Result<()> {
    if items.is_empty() {
        return Err(AppError::InsufficientInput(format!("No {} found.", what)));
    }
    Ok(())
}

async fn fetch_templates(config: &Config, job: &SendJob) -> Result<Vec<TemplateMessage>> {
    let query = queries::load_query(job.query_file.as_deref(), job.mode.default_query())?;
    let source = ClickHouseSource::new(config.smtp_log_ch.clone(), config.request_timeout)?;
    tracing::info!(target: "source", "Fetching candidate messages from smtp logs...");
    let mut messages: Vec<TemplateMessage> = source.fetch(&query).await?;
    if job.mode.needs_template_sender() {
        messages.retain(|m| m.sender.as_deref().is_some_and(|s| !s.is_empty()));
    }
    tracing::info!(target: "source", "Fetched {} candidate messages.", messages.len());
    Ok(messages)
}

async fn load_senders(config: &Config, job: &SendJob) -> Result<Vec<String>> {
    if let Some(path) = job.senders_file() {
        return files::read_senders(&path);
    }
    if job.mode == SendMode::Burned {
        let query = queries::load_query(job.senders_query_file.as_deref(), queries::BURNED_SENDERS)?;
        let source = ClickHouseSource::new(config.spam_tests_ch.clone(), config.request_timeout)?;
        let rows: Vec<SenderRow> = source.fetch(&query).await?;
        return Ok(rows
            .into_iter()
            .map(|r| r.email.trim().to_string())
            .filter(|e| files::is_plausible_address(e))
            .collect());
    }
    Ok(Vec::new())
}

/// Builds the send plan for `job` from already-loaded inputs.
pub fn build_plan(
    config: &Config,
    mode: SendMode,
    messages: &[TemplateMessage],
    seeds: &[String],
    senders: &[String],
    accounts: &[files::AccountRow],
) -> Result<Vec<SendRequest>> {
    require(seeds, "seed recipients")?;
    require(messages, "candidate messages")?;
    let same_sender = config
        .same_sender_count
        .unwrap_or_else(|| mode.default_same_sender_count());

    let mut rng = rand::thread_rng();
    let plan = match mode {
        SendMode::Warmup => {
            require(senders, "warmup senders")?;
            let counts = WarmupCounts {
                same_sender,
                original_sender: config.original_sender_count,
                warmup_sender: config.warmup_sender_count,
            };
            if counts.same_sender + counts.warmup_sender == 0 && counts.original_sender == 0 {
                return Err(AppError::Config(
                    "Warmup sender counts are all zero; nothing to send.".to_string(),
                ));
            }
            plan::plan_warmup(messages, seeds, senders, counts, &mut rng)
        }
        SendMode::Senders => {
            require(senders, "warmup senders")?;
            plan::plan_from_senders(messages, seeds, senders, &mut rng)
        }
        SendMode::Spam => {
            require(senders, "spam senders")?;
            plan::plan_spam(senders, messages, seeds, config.spam_recipients, &mut rng)
        }
        SendMode::Burned => {
            require(senders, "burned senders")?;
            tracing::info!(target: "smtp",
                "Sending {} messages from each of {} burned senders.",
                config.burned_sends_per_sender, senders.len()
            );
            plan::plan_burned(senders, messages, seeds, config.burned_sends_per_sender, &mut rng)
        }
        SendMode::Domains => {
            if same_sender == 0 {
                return Err(AppError::Config(
                    "WARMUP_SAME_SENDER_COUNT must be greater than zero.".to_string(),
                ));
            }
            let parity = plan::day_parity(Local::now().date_naive());
            let plan = plan::plan_domains(accounts, messages, seeds, same_sender, parity, &mut rng);
            if plan.is_empty() {
                let label = if parity == 0 { "even" } else { "odd" };
                return Err(AppError::InsufficientInput(format!(
                    "No email accounts found for {} domains.",
                    label
                )));
            }
            plan
        }
    };
    Ok(plan)
}

pub fn dispatch_options(config: &Config, mode: SendMode) -> DispatchOptions {
    DispatchOptions {
        workers: config.workers.unwrap_or_else(|| mode.default_workers()),
        shuffle: false,
        chunk_size: config.smtp_chunk_size,
        batch_size: None,
        batch_pause: config.batch_pause,
        record_permanent: false,
    }
}

pub fn sender_options(config: &Config, job: &SendJob) -> SenderOptions {
    SenderOptions {
        compose: job.compose.clone(),
        refresh_every_chunks: config.smtp_refresh_every,
        connect_attempts: config.smtp_connect_attempts,
        connect_backoff: config.smtp_connect_backoff,
        slow_mode: job.slow.then_some(config.slow_mode_range),
    }
}

/// Sends a planned list through `connector`. Sends are not ledgered.
pub async fn dispatch_sends<C: Connector>(
    config: &Config,
    job: &SendJob,
    plan: Vec<SendRequest>,
    connector: Arc<C>,
    progress: Option<ProgressBar>,
) -> Result<RunSummary> {
    let endpoint = Endpoint::new("smtp", connector.describe(), None);
    let options = sender_options(config, job);
    let mut dispatcher = Dispatcher::new(dispatch_options(config, job.mode), config.send_policy(), vec![endpoint]);
    if let Some(bar) = progress {
        dispatcher = dispatcher.with_progress(bar);
    }
    dispatcher
        .run(plan, None, |_| {
            Ok(SmtpSender::new(Arc::clone(&connector), options.clone()))
        })
        .await
}

/// Runs a full send job: pre-flight, load inputs, plan, send.
pub async fn run_send(config: &Config, job: &SendJob, progress: Option<ProgressBar>) -> Result<RunSummary> {
    let addrs = ensure_resolvable(&config.smtp.server).await?;
    tracing::debug!(target: "smtp", "SMTP pre-flight ok ({} addresses).", addrs.len());

    let seed_path = job.seed_list();
    let seeds = files::read_seed_emails(&seed_path)?;
    if seeds.is_empty() {
        return Err(AppError::InsufficientInput(format!(
            "No recipients found in {}",
            seed_path.display()
        )));
    }
    let messages = fetch_templates(config, job).await?;
    let senders = load_senders(config, job).await?;
    let accounts = if job.mode == SendMode::Domains {
        files::read_accounts(&job.accounts_file)?
    } else {
        Vec::new()
    };

    let plan = build_plan(config, job.mode, &messages, &seeds, &senders, &accounts)?;
    if plan.is_empty() {
        tracing::warn!(target: "smtp", "No sends were generated with the current settings.");
        return Ok(RunSummary::default());
    }
    tracing::info!(target: "smtp", "Planned {} sends ({:?}).", plan.len(), job.mode);

    let connector = Arc::new(SmtpConnector::new(config.smtp.clone()));
    let summary = dispatch_sends(config, job, plan, connector, progress).await?;
    tracing::info!(target: "smtp",
        "Sent {} emails ({} attempted, {} failed).",
        summary.success_count(), summary.attempted, summary.failed
    );
    Ok(summary)
}
