//! Defines the custom error types for the mail-dispatch application.

use std::io;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The primary error type for dispatch runs.
///
/// Per-item failures never surface here; they are folded into an
/// [`Outcome`](crate::Outcome) and counted. `AppError` is for problems that
/// stop a run before (or instead of) dispatching work.
#[derive(Error, Debug)]
pub enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error initializing necessary components (e.g., clients, resolvers, workers).
    #[error("Initialization Error: {0}")]
    Initialization(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reading or writing CSV ledgers and seed lists.
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// Error making HTTP requests via reqwest.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// The analytics store answered with something other than rows.
    #[error("Query Error: {0}")]
    Query(String),

    /// Error during DNS resolution.
    #[error("DNS Resolution Error: {0}")]
    Dns(#[from] trust_dns_resolver::error::ResolveError),

    /// Error during SMTP communication setup or command execution.
    #[error("SMTP Error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Error assembling an outgoing message.
    #[error("Message Build Error: {0}")]
    MessageBuild(String),

    /// Error related to concurrency or task execution.
    #[error("Task Execution Error: {0}")]
    Task(String),

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),

    /// Indicates insufficient input data to proceed (e.g., empty seed list).
    #[error("Insufficient Input Data: {0}")]
    InsufficientInput(String),
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        AppError::MessageBuild(err.to_string())
    }
}

impl From<lettre::address::AddressError> for AppError {
    fn from(err: lettre::address::AddressError) -> Self {
        AppError::MessageBuild(format!("invalid address: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
