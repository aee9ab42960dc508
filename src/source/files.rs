//! Flat-file inputs: sender lists, seed lists, and account lists.

use crate::core::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+'-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("address pattern failed to compile. This is a bug.")
});

/// Cheap plausibility check; the relay does the real validation.
pub fn is_plausible_address(value: &str) -> bool {
    ADDRESS_RE.is_match(value)
}

fn open_optional(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(target: "source", "Input file not found: {}", path.display());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn keep_plausible(values: Vec<String>, path: &Path) -> Vec<String> {
    let total = values.len();
    let kept: Vec<String> = values.into_iter().filter(|v| is_plausible_address(v)).collect();
    if kept.len() < total {
        tracing::warn!(target: "source",
            "Dropped {} entries from {} that are not email addresses.",
            total - kept.len(), path.display()
        );
    }
    kept
}

/// Non-empty trimmed lines of a text file. Missing file yields an empty list.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let Some(file) = open_optional(path)? else {
        return Ok(Vec::new());
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

/// Sender addresses, one per line.
pub fn read_senders(path: &Path) -> Result<Vec<String>> {
    Ok(keep_plausible(read_lines(path)?, path))
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    ee_account_id: Option<String>,
}

/// One seed mailbox, optionally with its mail-engine account id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub email: String,
    pub account_id: Option<String>,
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

/// Raw CSV seed rows with a non-empty email, before any address check.
fn read_seed_rows(path: &Path) -> Result<Vec<SeedEntry>> {
    let Some(file) = open_optional(path)? else {
        return Ok(Vec::new());
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut entries = Vec::new();
    for row in reader.deserialize::<SeedRow>() {
        let row = row?;
        let email = row.email.unwrap_or_default();
        if email.is_empty() {
            continue;
        }
        entries.push(SeedEntry {
            email,
            account_id: row.ee_account_id.filter(|a| !a.is_empty()),
        });
    }
    Ok(entries)
}

/// Reads a seed list: a CSV with an `email` column (and optionally
/// `ee_account_id`), or a plain text file with one address per line.
/// Entries that are not plausible addresses are dropped.
pub fn read_seed_list(path: &Path) -> Result<Vec<SeedEntry>> {
    if !is_csv(path) {
        return Ok(keep_plausible(read_lines(path)?, path)
            .into_iter()
            .map(|email| SeedEntry {
                email,
                account_id: None,
            })
            .collect());
    }

    let rows = read_seed_rows(path)?;
    let total = rows.len();
    let entries: Vec<SeedEntry> = rows
        .into_iter()
        .filter(|row| is_plausible_address(&row.email))
        .collect();
    if entries.len() < total {
        tracing::warn!(target: "source",
            "Dropped {} seed rows from {} that are not email addresses.",
            total - entries.len(), path.display()
        );
    }
    Ok(entries)
}

/// Seed email addresses only.
pub fn read_seed_emails(path: &Path) -> Result<Vec<String>> {
    Ok(read_seed_list(path)?.into_iter().map(|s| s.email).collect())
}

/// Lower-cased seed email -> account id, for seeds that have one.
///
/// Used to resolve stored messages, so every row with both columns counts;
/// the address check for outgoing lists does not apply here.
pub fn read_seed_accounts(path: &Path) -> Result<HashMap<String, String>> {
    Ok(read_seed_rows(path)?
        .into_iter()
        .filter_map(|s| s.account_id.map(|a| (s.email.to_lowercase(), a)))
        .collect())
}

/// A sending mailbox and the domain it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountRow {
    pub email_account: String,
    pub domain_id: i64,
}

/// Reads `email_account,domain_id` rows. Rows missing either column are skipped.
pub fn read_accounts(path: &Path) -> Result<Vec<AccountRow>> {
    let Some(file) = open_optional(path)? else {
        return Ok(Vec::new());
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut accounts = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<AccountRow>() {
        match row {
            Ok(account) if !account.email_account.is_empty() => accounts.push(account),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(target: "source",
            "Skipped {} rows missing email_account or domain_id in {}.", skipped, path.display()
        );
    }
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_files_are_empty() {
        let dir = tempdir().unwrap();
        assert!(read_lines(&dir.path().join("none.txt")).unwrap().is_empty());
        assert!(read_seed_list(&dir.path().join("none.csv")).unwrap().is_empty());
        assert!(read_accounts(&dir.path().join("accounts.csv")).unwrap().is_empty());
    }

    #[test]
    fn senders_drop_junk_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spam_senders.txt");
        fs::write(&path, "a@brand.io\n\n  b@brand.io  \nnot an address\n").unwrap();
        assert_eq!(read_senders(&path).unwrap(), vec!["a@brand.io", "b@brand.io"]);
    }

    #[test]
    fn seed_csv_reads_email_and_account_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed_list_all.csv");
        fs::write(
            &path,
            "name,email,ee_account_id\nA, Seed.One@Inbox.io ,acc1\nB,seed2@inbox.io,\nC,,acc3\n",
        )
        .unwrap();

        let seeds = read_seed_list(&path).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].account_id.as_deref(), Some("acc1"));
        assert_eq!(seeds[1].account_id, None);

        let accounts = read_seed_accounts(&path).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts.get("seed.one@inbox.io").map(String::as_str), Some("acc1"));
    }

    #[test]
    fn seed_accounts_keep_rows_the_address_check_rejects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed_list_all.csv");
        fs::write(
            &path,
            "email,ee_account_id\nops@localhost,acc1\nseed@inbox.io,acc2\n",
        )
        .unwrap();

        assert_eq!(read_seed_emails(&path).unwrap(), vec!["seed@inbox.io"]);
        let accounts = read_seed_accounts(&path).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts.get("ops@localhost").map(String::as_str), Some("acc1"));
    }

    #[test]
    fn seed_csv_without_account_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed_list.csv");
        fs::write(&path, "email\nx@inbox.io\ny@inbox.io\n").unwrap();
        assert_eq!(read_seed_emails(&path).unwrap(), vec!["x@inbox.io", "y@inbox.io"]);
    }

    #[test]
    fn seed_text_file_is_one_address_per_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed_list.txt");
        fs::write(&path, "x@inbox.io\n\ny@inbox.io\n").unwrap();
        assert_eq!(read_seed_emails(&path).unwrap().len(), 2);
    }

    #[test]
    fn accounts_skip_incomplete_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        fs::write(
            &path,
            "email_account,domain_id\nwarm1@d1.io,10\nwarm2@d1.io,10\nwarm3@d2.io,\n,11\nwarm4@d3.io,13\n",
        )
        .unwrap();
        let accounts = read_accounts(&path).unwrap();
        assert_eq!(accounts.len(), 3);
        assert_eq!(accounts[2].domain_id, 13);
    }
}
