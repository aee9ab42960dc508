//! # Mail Dispatch CLI
//!
//! Command-line interface for the mail-dispatch library (`mail_dispatch_core`).
//! Parses arguments, layers configuration, runs one move or send job, and
//! reports the run summary.

use mail_dispatch_core::remote::smtp::ComposeOptions;
use mail_dispatch_core::{
    run_move, run_send, ConfigBuilder, MoveJob, MoveTarget, RunSummary, SendJob, SendMode,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MoveTargetArg {
    /// Inbox -> \Junk for spam-test copies
    Spam,
    /// Junk -> INBOX for warmup copies, resolved through the seed list
    Inbox,
    /// Query-supplied messages to --folder
    Custom,
}

impl From<MoveTargetArg> for MoveTarget {
    fn from(arg: MoveTargetArg) -> Self {
        match arg {
            MoveTargetArg::Spam => MoveTarget::Spam,
            MoveTargetArg::Inbox => MoveTarget::Inbox,
            MoveTargetArg::Custom => MoveTarget::Custom,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SendModeArg {
    /// Template sender, original sender, and random warmup senders
    Warmup,
    /// Every warmup sender sends every template
    Senders,
    /// Spam-test sends from the spam sender list
    Spam,
    /// Recovery sends from burned senders
    Burned,
    /// Per-domain warmup across today's half of the accounts
    Domains,
}

impl From<SendModeArg> for SendMode {
    fn from(arg: SendModeArg) -> Self {
        match arg {
            SendModeArg::Warmup => SendMode::Warmup,
            SendModeArg::Senders => SendMode::Senders,
            SendModeArg::Spam => SendMode::Spam,
            SendModeArg::Burned => SendMode::Burned,
            SendModeArg::Domains => SendMode::Domains,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Resumable mailbox moves and warmup sends.",
    long_about = "Mail Dispatch pulls candidates from ClickHouse, skips what its ledger has already recorded, and runs the rest through a worker pool with retries and endpoint failover."
)]
struct AppArgs {
    /// Path to a configuration file (TOML format). CLI args override file settings.
    #[arg(long, global = true, env = "MAIL_DISPATCH_CONFIG")]
    config_file: Option<String>,

    /// Dotenv file with deployment keys. The process environment wins.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Number of concurrent workers (overrides PARALLEL_PROCESSES).
    #[arg(short, long, global = true, env = "MAIL_DISPATCH_WORKERS")]
    workers: Option<usize>,

    /// Attempts per endpoint before giving up or failing over.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Seconds between attempts on the same endpoint.
    #[arg(long, global = true)]
    retry_delay: Option<u64>,

    /// Items per throttling batch.
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Seconds to pause between throttling batches.
    #[arg(long, global = true)]
    batch_pause: Option<u64>,

    /// HTTP request timeout in seconds.
    #[arg(long, global = true, env = "MAIL_DISPATCH_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Hide the progress bar.
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Move stored messages between mailbox folders.
    Move(MoveArgs),
    /// Send synthetic warmup or spam-test mail over SMTP.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct MoveArgs {
    #[arg(value_enum)]
    target: MoveTargetArg,

    /// Destination folder (defaults per target).
    #[arg(long)]
    folder: Option<String>,

    /// Ledger file (defaults per target).
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Replace the default candidate query.
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Seed list CSV mapping recipients to account ids (inbox target).
    #[arg(long, default_value = "seed_list_all.csv")]
    seed_list: PathBuf,

    /// Also record messages that no endpoint knows about.
    #[arg(long)]
    record_not_found: bool,

    /// Fail over to the next endpoint after retries run out on transient errors.
    #[arg(long)]
    failover_on_transient: bool,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(value_enum)]
    mode: SendModeArg,

    /// Seed recipients (defaults per mode).
    #[arg(long)]
    seed_list: Option<PathBuf>,

    /// Sender list, one address per line (defaults per mode).
    #[arg(long)]
    senders_file: Option<PathBuf>,

    /// `email_account,domain_id` CSV for the domains mode.
    #[arg(long, default_value = "accounts.csv")]
    accounts_file: PathBuf,

    /// Replace the default template query.
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Replace the burned-sender query.
    #[arg(long)]
    senders_query_file: Option<PathBuf>,

    /// Custom tag placed before the UUID in the Message-ID local part.
    #[arg(short = 'm', long)]
    message_id_tag: Option<String>,

    /// Add a References header identical to the Message-ID.
    #[arg(short = 'r', long)]
    references: bool,

    /// Add a Reply-To header identical to the sender.
    #[arg(long)]
    reply_to: bool,

    /// Pause a random 49-100 s after each send.
    #[arg(long)]
    slow: bool,
}

fn load_env_file(path: &Path) -> Result<()> {
    if !path.exists() {
        tracing::debug!("No env file at {}", path.display());
        return Ok(());
    }
    dotenvy::from_path(path)
        .with_context(|| format!("Failed to load env file {}", path.display()))?;
    tracing::debug!("Loaded env file {}", path.display());
    Ok(())
}

fn progress_bar(hidden: bool) -> Result<Option<ProgressBar>> {
    if hidden {
        return Ok(None);
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | ETA: {eta}")
            .context("Failed to set progress bar template")?
            .progress_chars("=> "),
    );
    Ok(Some(pb))
}

fn report(summary: &RunSummary, started: Instant) {
    tracing::info!(
        "Finished in {:.2?}: fetched={}, already processed={}, unmapped={}, attempted={}, succeeded={}, not found={}, failed={}",
        started.elapsed(),
        summary.fetched,
        summary.skipped,
        summary.unmapped,
        summary.attempted,
        summary.success_count(),
        summary.not_found,
        summary.failed
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .with_target(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Setting up tracing subscriber failed")?;

    let args = AppArgs::parse();
    tracing::info!("Mail Dispatch v{} starting...", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Parsed CLI arguments: {:?}", args);

    load_env_file(&args.env_file)?;

    let mut config_builder = ConfigBuilder::new().env_vars(std::env::vars());
    if let Some(ref path) = args.config_file {
        config_builder = config_builder.config_file(path);
    }
    if let Some(w) = args.workers {
        config_builder = config_builder.workers(w);
    }
    if let Some(r) = args.max_retries {
        config_builder = config_builder.max_retries(r);
    }
    if let Some(d) = args.retry_delay {
        config_builder = config_builder.retry_delay(Duration::from_secs(d));
    }
    if let Some(b) = args.batch_size {
        config_builder = config_builder.batch_size(b);
    }
    if let Some(p) = args.batch_pause {
        config_builder = config_builder.batch_pause(Duration::from_secs(p));
    }
    if let Some(t) = args.request_timeout {
        config_builder = config_builder.request_timeout(Duration::from_secs(t));
    }
    if let Command::Move(ref m) = args.command {
        if m.record_not_found {
            config_builder = config_builder.record_permanent(true);
        }
        if m.failover_on_transient {
            config_builder = config_builder.failover_on_transient(true);
        }
    }

    let config = config_builder
        .build()
        .context("Failed to build configuration")?;
    tracing::debug!("Effective configuration loaded: {:?}", config);

    let progress = progress_bar(args.no_progress)?;
    let started = Instant::now();

    let summary = match args.command {
        Command::Move(m) => {
            let job = MoveJob {
                target: m.target.into(),
                folder: m.folder,
                ledger_path: m.ledger,
                query_file: m.query_file,
                seed_list: m.seed_list,
            };
            run_move(&config, &job, progress)
                .await
                .with_context(|| format!("Move job ({:?}) failed", job.target))?
        }
        Command::Send(s) => {
            let job = SendJob {
                mode: s.mode.into(),
                seed_list: s.seed_list,
                senders_file: s.senders_file,
                accounts_file: s.accounts_file,
                query_file: s.query_file,
                senders_query_file: s.senders_query_file,
                compose: ComposeOptions {
                    custom_tag: s.message_id_tag,
                    references: s.references,
                    reply_to_sender: s.reply_to,
                },
                slow: s.slow,
            };
            run_send(&config, &job, progress)
                .await
                .with_context(|| format!("Send job ({:?}) failed", job.mode))?
        }
    };

    report(&summary, started);
    Ok(())
}
