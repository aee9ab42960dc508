//! Append-only record of completed work items, used to make runs resumable.

use crate::core::error::Result;
use crate::core::models::LedgerKey;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const PAIR_HEADER: [&str; 2] = ["ee_id", "ee_account_id"];

/// On-disk layout of a ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFormat {
    /// One identifier per line.
    Lines,
    /// CSV rows of `ee_id,ee_account_id` with a header row.
    Pairs,
}

/// Persisted set of identifiers that completed successfully.
///
/// The handle is shared by every worker of a run (wrap it in an `Arc`);
/// appends are serialized by an internal guard so lines never interleave.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    format: LedgerFormat,
    write_guard: Mutex<()>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>, format: LedgerFormat) -> Self {
        Self {
            path: path.into(),
            format,
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> LedgerFormat {
        self.format
    }

    /// Reads every identifier recorded by previous runs.
    /// A missing file yields an empty set.
    pub fn load(&self) -> Result<HashSet<LedgerKey>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(target: "ledger", "Ledger {} does not exist yet", self.path.display());
                return Ok(HashSet::new());
            }
            Err(e) => return Err(e.into()),
        };

        let keys = match self.format {
            LedgerFormat::Lines => load_lines(file)?,
            LedgerFormat::Pairs => load_pairs(file)?,
        };
        tracing::debug!(target: "ledger", "Loaded {} entries from {}", keys.len(), self.path.display());
        Ok(keys)
    }

    /// Appends `keys`, one record each, and flushes before returning.
    pub fn append(&self, keys: &[LedgerKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let _guard = self.write_guard.lock();
        let needs_header = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        match self.format {
            LedgerFormat::Lines => {
                let mut file = file;
                let mut buf = String::new();
                for key in keys {
                    buf.push_str(key.id());
                    buf.push('\n');
                }
                file.write_all(buf.as_bytes())?;
                file.flush()?;
            }
            LedgerFormat::Pairs => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(file);
                if needs_header {
                    writer.write_record(PAIR_HEADER)?;
                }
                for key in keys {
                    match key {
                        LedgerKey::Pair(id, account) => writer.write_record([id, account])?,
                        LedgerKey::Single(id) => writer.write_record([id.as_str(), ""])?,
                    }
                }
                writer.flush()?;
            }
        }
        Ok(())
    }
}

/// Keys are kept exactly as written; only the line terminator is dropped.
fn load_lines(file: File) -> Result<HashSet<LedgerKey>> {
    let mut keys = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() {
            keys.insert(LedgerKey::single(line));
        }
    }
    Ok(keys)
}

fn load_pairs(file: File) -> Result<HashSet<LedgerKey>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut keys = HashSet::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        if idx == 0 && is_pair_header(&record) {
            continue;
        }
        match (record.get(0), record.get(1)) {
            (Some(id), Some(account)) => {
                keys.insert(LedgerKey::pair(id, account));
            }
            (Some(id), None) if !id.is_empty() => {
                keys.insert(LedgerKey::pair(id, ""));
            }
            _ => {}
        }
    }
    Ok(keys)
}

fn is_pair_header(record: &csv::StringRecord) -> bool {
    record.len() == PAIR_HEADER.len()
        && record
            .iter()
            .zip(PAIR_HEADER)
            .all(|(col, expected)| col.trim().eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("absent.txt"), LedgerFormat::Lines);
        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn empty_append_does_not_create_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let ledger = Ledger::new(&path, LedgerFormat::Lines);
        ledger.append(&[]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn lines_round_trip_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spam_log.txt");

        let first = Ledger::new(&path, LedgerFormat::Lines);
        first.append(&[LedgerKey::single("m1")]).unwrap();
        first
            .append(&[LedgerKey::single("<abc-mldz@x.io>"), LedgerKey::single("m3")])
            .unwrap();

        let second = Ledger::new(&path, LedgerFormat::Lines);
        let loaded = second.load().unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.contains(&LedgerKey::single("<abc-mldz@x.io>")));
        assert_eq!(fs::read_to_string(&path).unwrap(), "m1\n<abc-mldz@x.io>\nm3\n");
    }

    #[test]
    fn lines_ignore_blank_lines_and_crlf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.txt");
        fs::write(&path, "m1\r\n\n\nm2\n").unwrap();
        let loaded = Ledger::new(&path, LedgerFormat::Lines).load().unwrap();
        assert_eq!(
            loaded,
            [LedgerKey::single("m1"), LedgerKey::single("m2")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn padded_keys_round_trip_unchanged() {
        let dir = tempdir().unwrap();

        let lines = Ledger::new(dir.path().join("padded.txt"), LedgerFormat::Lines);
        let single = LedgerKey::single(" m1 ");
        lines.append(&[single.clone()]).unwrap();
        let loaded = lines.load().unwrap();
        assert!(loaded.contains(&single));
        assert!(!loaded.contains(&LedgerKey::single("m1")));

        let pairs = Ledger::new(dir.path().join("padded.csv"), LedgerFormat::Pairs);
        let pair = LedgerKey::pair(" m1", "a1 ");
        pairs.append(&[pair.clone()]).unwrap();
        let loaded = pairs.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains(&pair));
    }

    #[test]
    fn pairs_write_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inbox_log.csv");
        let ledger = Ledger::new(&path, LedgerFormat::Pairs);
        ledger.append(&[LedgerKey::pair("m1", "a1")]).unwrap();
        ledger.append(&[LedgerKey::pair("m2", "a2")]).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ee_id,ee_account_id\nm1,a1\nm2,a2\n"
        );
        let loaded = ledger.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&LedgerKey::pair("m2", "a2")));
    }

    #[test]
    fn pairs_accept_single_column_and_missing_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        fs::write(&path, "m1,a1\nm9\n").unwrap();
        let loaded = Ledger::new(&path, LedgerFormat::Pairs).load().unwrap();
        assert!(loaded.contains(&LedgerKey::pair("m1", "a1")));
        assert!(loaded.contains(&LedgerKey::pair("m9", "")));
    }

    #[test]
    fn pairs_with_commas_survive_quoting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quoted.csv");
        let ledger = Ledger::new(&path, LedgerFormat::Pairs);
        let key = LedgerKey::pair("id,with,commas", "acct");
        ledger.append(&[key.clone()]).unwrap();
        assert!(ledger.load().unwrap().contains(&key));
    }

    #[test]
    fn concurrent_appends_keep_whole_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("concurrent.txt");
        let ledger = std::sync::Arc::new(Ledger::new(&path, LedgerFormat::Lines));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        ledger
                            .append(&[LedgerKey::single(format!("worker{}-item{}", t, i))])
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 400);
        assert!(content.lines().all(|l| l.starts_with("worker") && l.contains("-item")));
        assert_eq!(ledger.load().unwrap().len(), 400);
    }
}
