//! Default query texts for each job. Any of them can be replaced at run time
//! with a query file.

use crate::core::error::{AppError, Result};
use std::fs;
use std::path::Path;

/// Spam-test copies that landed in the inbox: `ee_id, ee_account_id`.
pub const SPAM_MOVE: &str = r"
SELECT ee_id, ee_account_id
FROM email_letters
WHERE 1=1
    AND date(created_at) >= today() - INTERVAL '2 day'
    AND path = '\Inbox'
    AND status = 'received'
    AND id LIKE '%-smdz%'
";

/// Warmup copies that landed in junk: `ee_id, email` (the seed recipient).
pub const INBOX_MOVE: &str = r"
SELECT
    ee_id,
    arrayElement(recipients, 1) AS email
FROM email_letters_first_emails
WHERE 1=1
    AND date(created_at) >= today() - INTERVAL '1 day'
    AND path = '\Junk'
    AND (id LIKE '<curious-gepard%' or id LIKE '%-mldz%')
";

/// Recently sent customer mail used as warmup templates.
pub const WARMUP_MESSAGES: &str = r"
SELECT
  sender_email,
  original_sender_email,
  subject,
  plain_text,
  email_html
FROM
(
  SELECT
    sender_email,
    original_sender_email,
    subject,
    email_body AS plain_text,
    email_html
  FROM smtp_logs
  WHERE 1=1
    AND is_warmup = false
    AND is_followup = false
    AND is_spamtest = false
    AND is_sent = true
    AND NOT match(message_headers, 'X-Ref-Id')
    AND NOT match(message_headers, 'X-Auto-Response-Suppress')
    AND NOT match(rcp_email, '@(gmail|yahoo|hotmail)\.com$')
    AND ts >= today() - INTERVAL 2 DAY
    AND (cityHash64(sender_email, subject, ts) % 2) = 0
  LIMIT 100000
)
ORDER BY rand()
LIMIT 30000
";

/// Templates for the per-domain warmup run.
pub const DOMAIN_WARMUP_MESSAGES: &str = r"
SELECT
    sender_email,
    original_sender_email,
    subject,
    email_body AS plain_text,
    email_html
FROM smtp_logs
WHERE
    is_warmup = false
    AND is_followup = false
    AND is_spamtest = false
    AND is_sent = true
    AND NOT match(message_headers, 'X-Ref-Id')
    AND NOT match(message_headers, 'X-Auto-Response-Suppress')
    AND NOT match(rcp_email, '@(gmail|yahoo|hotmail)\.com$')
    AND ts >= today() - INTERVAL 3 DAY
ORDER BY rand()
LIMIT 5000
";

/// A small random sample of sent mail for spam tests.
pub const SPAM_TEST_MESSAGES: &str = r"
SELECT
    subject as subject,
    email_body as plain_text,
    email_html as html
FROM smtp_logs
WHERE 1=1
    AND is_warmup = 0
    AND is_followup = 0
    AND is_spamtest = 0
    AND date(ts) >= today() - INTERVAL 2 day
    AND is_sent = 1
    AND rand() % 1000 = 0
LIMIT 10
";

/// A larger random sample for burned-sender runs.
pub const BURNED_MESSAGES: &str = r"
SELECT
    subject as subject,
    email_body as plain_text,
    email_html as html
FROM smtp_logs
WHERE 1=1
    AND is_warmup = 0
    AND is_followup = 0
    AND is_spamtest = 0
    AND date(ts) >= today() - INTERVAL 2 day
    AND is_sent = 1
    AND rand() % 1000 = 0
LIMIT 1000
";

/// Senders that scored badly on the Google spam test two days ago.
pub const BURNED_SENDERS: &str = r"
select sender as email
from reputation_test_results
where 1=1
AND date(created_at) = today() - INTERVAL 2 DAY
AND spam_google >= 3
AND sender NOT LIKE '%maildoso%'
AND sender NOT LIKE '%dosomail%'
";

/// Reads the query at `path` if given, otherwise returns `default`.
pub fn load_query(path: Option<&Path>, default: &str) -> Result<String> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p)?;
            if text.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "Query file {} is empty",
                    p.display()
                )));
            }
            tracing::info!(target: "source", "Using query from {}", p.display());
            Ok(text)
        }
        None => Ok(default.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn query_file_replaces_default() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "SELECT ee_id, ee_account_id FROM moves").unwrap();
        let query = load_query(Some(file.path()), SPAM_MOVE).unwrap();
        assert!(query.contains("FROM moves"));
        assert_eq!(load_query(None, SPAM_MOVE).unwrap(), SPAM_MOVE);
    }

    #[test]
    fn empty_query_file_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(load_query(Some(file.path()), SPAM_MOVE), Err(AppError::Config(_))));
    }

    #[test]
    fn escaped_folder_names_survive() {
        assert!(SPAM_MOVE.contains(r"path = '\Inbox'"));
        assert!(INBOX_MOVE.contains(r"path = '\Junk'"));
    }
}
