//! Data structures for work items, endpoints, and run results.

use serde::Deserialize;
use std::fmt;

/// Identifier persisted in a [`Ledger`](crate::Ledger) once a work item completes.
///
/// Equality is by value: a single message id, or a message-id/account-id pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LedgerKey {
    Single(String),
    Pair(String, String),
}

impl LedgerKey {
    pub fn single(id: impl Into<String>) -> Self {
        LedgerKey::Single(id.into())
    }

    pub fn pair(id: impl Into<String>, account: impl Into<String>) -> Self {
        LedgerKey::Pair(id.into(), account.into())
    }

    /// The primary identifier (the message id for both shapes).
    pub fn id(&self) -> &str {
        match self {
            LedgerKey::Single(id) | LedgerKey::Pair(id, _) => id,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKey::Single(id) => write!(f, "{}", id),
            LedgerKey::Pair(id, account) => write!(f, "{}/{}", id, account),
        }
    }
}

/// One unit of dispatchable work.
pub trait WorkItem: Clone + Send + Sync + 'static {
    /// Key used to deduplicate against the ledger and to record success.
    fn ledger_key(&self) -> LedgerKey;

    /// Short label for log lines.
    fn label(&self) -> String {
        self.ledger_key().to_string()
    }
}

/// How a move item is identified in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// Message id alone.
    MessageId,
    /// Message id plus account id.
    MessageAndAccount,
}

/// Request to move one stored message into a folder of its mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub message_id: String,
    pub account_id: String,
    pub folder: String,
    pub key_shape: KeyShape,
}

impl WorkItem for MoveRequest {
    fn ledger_key(&self) -> LedgerKey {
        match self.key_shape {
            KeyShape::MessageId => LedgerKey::single(&self.message_id),
            KeyShape::MessageAndAccount => LedgerKey::pair(&self.message_id, &self.account_id),
        }
    }

    fn label(&self) -> String {
        format!("{} (account {})", self.message_id, self.account_id)
    }
}

/// A previously-sent message reused as the content of synthetic traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateMessage {
    #[serde(default, alias = "sender_email")]
    pub sender: Option<String>,
    #[serde(default, alias = "original_sender_email")]
    pub original_sender: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, alias = "email_body")]
    pub plain_text: Option<String>,
    #[serde(default, alias = "email_html")]
    pub html: Option<String>,
}

impl TemplateMessage {
    /// Plain text and HTML bodies with empty strings normalized to `None`.
    pub fn body_parts(&self) -> (Option<&str>, Option<&str>) {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|v| !v.is_empty())
        }
        (non_empty(&self.plain_text), non_empty(&self.html))
    }
}

/// Category tag embedded in generated Message-IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    Warmup,
    Spam,
}

impl MessageCategory {
    pub fn tag(&self) -> &'static str {
        match self {
            MessageCategory::Warmup => "-mldz",
            MessageCategory::Spam => "-smdz",
        }
    }
}

/// Request to send one synthetic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub sender: String,
    pub recipient: String,
    pub message: TemplateMessage,
    pub category: MessageCategory,
}

impl WorkItem for SendRequest {
    fn ledger_key(&self) -> LedgerKey {
        LedgerKey::pair(&self.sender, &self.recipient)
    }

    fn label(&self) -> String {
        format!("{} -> {}", self.sender, self.recipient)
    }
}

/// One configured instance of a remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub base_url: String,
    pub credential: Option<String>,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        credential: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            credential: credential.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }
}

/// Counters and successful identifiers of one dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Candidate rows fetched, including any dropped before dispatch.
    pub fetched: usize,
    /// Fetched rows that could not be turned into work items.
    pub unmapped: usize,
    /// Candidates already present in the ledger.
    pub skipped: usize,
    /// Items that were attempted.
    pub attempted: usize,
    /// Keys of items whose operation succeeded, in completion order.
    pub succeeded: Vec<LedgerKey>,
    /// Items that ended in a permanent failure on every endpoint tried.
    pub not_found: usize,
    /// Items that ended in a transient/protocol failure or a worker panic.
    pub failed: usize,
    /// Number of throttling batches submitted.
    pub batches: usize,
}

impl RunSummary {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Accounts for rows fetched but dropped before reaching the dispatcher.
    pub fn record_unmapped(&mut self, rows: usize) {
        self.fetched += rows;
        self.unmapped += rows;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bodies_read_as_missing() {
        let message = TemplateMessage {
            plain_text: Some(String::new()),
            html: Some("<p>hi</p>".into()),
            ..TemplateMessage::default()
        };
        assert_eq!(message.body_parts(), (None, Some("<p>hi</p>")));
        assert_eq!(TemplateMessage::default().body_parts(), (None, None));
    }

    #[test]
    fn move_keys_follow_their_shape() {
        let mut request = MoveRequest {
            message_id: "m1".into(),
            account_id: "a1".into(),
            folder: "INBOX".into(),
            key_shape: KeyShape::MessageId,
        };
        assert_eq!(request.ledger_key(), LedgerKey::single("m1"));
        request.key_shape = KeyShape::MessageAndAccount;
        assert_eq!(request.ledger_key(), LedgerKey::pair("m1", "a1"));
        assert_eq!(request.ledger_key().id(), "m1");
    }

    #[test]
    fn unmapped_rows_count_as_fetched() {
        let mut summary = RunSummary {
            fetched: 3,
            skipped: 1,
            attempted: 2,
            ..RunSummary::default()
        };
        summary.record_unmapped(2);
        assert_eq!(summary.fetched, 5);
        assert_eq!(summary.unmapped, 2);
        assert_eq!(summary.fetched, summary.skipped + summary.attempted + summary.unmapped);
    }
}
