//! End-to-end runs of the dispatcher and the move job against in-process fakes.

use async_trait::async_trait;
use mail_dispatch_core::jobs::mover::dispatch_moves;
use mail_dispatch_core::{
    Config, DispatchOptions, Dispatcher, Endpoint, KeyShape, Ledger, LedgerFormat, LedgerKey,
    MoveJob, MoveRequest, MoveTarget, Outcome, RemoteOperation, Reply, RetryPolicy,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Succeeds for ids in `found`, answers 404 for everything else, and keeps a
/// log of `(endpoint, id)` calls.
struct ShardFake {
    found: Arc<HashSet<(String, String)>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl RemoteOperation for ShardFake {
    type Item = MoveRequest;

    async fn attempt(&mut self, endpoint: &Endpoint, item: &MoveRequest) -> Outcome {
        let key = (endpoint.name.clone(), item.message_id.clone());
        self.calls.lock().push(key.clone());
        if self.found.contains(&key) {
            Outcome::success(Reply::new("moved").with_status(200))
        } else {
            Outcome::permanent(Reply::new("not found").with_status(404))
        }
    }
}

fn request(id: &str) -> MoveRequest {
    MoveRequest {
        message_id: id.to_string(),
        account_id: "acct".to_string(),
        folder: "\\Junk".to_string(),
        key_shape: KeyShape::MessageId,
    }
}

fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("primary", "https://primary.test", Some("k1".into())),
        Endpoint::new("secondary", "https://secondary.test", Some("k2".into())),
    ]
}

fn options() -> DispatchOptions {
    DispatchOptions {
        workers: 2,
        ..DispatchOptions::default()
    }
}

async fn run_fake(
    ids: &[&str],
    found: &[(&str, &str)],
    ledger: Arc<Ledger>,
) -> (mail_dispatch_core::RunSummary, Vec<(String, String)>) {
    let found: Arc<HashSet<(String, String)>> = Arc::new(
        found
            .iter()
            .map(|(e, id)| (e.to_string(), id.to_string()))
            .collect(),
    );
    let calls = Arc::new(Mutex::new(Vec::new()));
    let c = calls.clone();
    let summary = Dispatcher::new(options(), RetryPolicy::new(3, Duration::ZERO), endpoints())
        .run(ids.iter().map(|id| request(id)).collect(), Some(ledger), move |_| {
            Ok(ShardFake {
                found: found.clone(),
                calls: c.clone(),
            })
        })
        .await
        .unwrap();
    let calls = calls.lock().clone();
    (summary, calls)
}

#[tokio::test]
async fn only_successes_reach_the_ledger() {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(Ledger::new(dir.path().join("spam_log.txt"), LedgerFormat::Lines));

    let (summary, _) = run_fake(&["m1", "m2"], &[("primary", "m1")], ledger.clone()).await;

    assert_eq!(summary.succeeded, vec![LedgerKey::single("m1")]);
    assert_eq!(summary.not_found, 1);
    let text = std::fs::read_to_string(ledger.path()).unwrap();
    assert_eq!(text.lines().collect::<Vec<_>>(), vec!["m1"]);
}

#[tokio::test]
async fn permanent_failure_on_primary_fails_over_to_secondary() {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(Ledger::new(dir.path().join("spam_log.txt"), LedgerFormat::Lines));

    let (summary, calls) = run_fake(&["m1"], &[("secondary", "m1")], ledger).await;

    assert_eq!(summary.success_count(), 1);
    // 404 is terminal for an endpoint: one call each, no retries.
    assert_eq!(
        calls,
        vec![
            ("primary".to_string(), "m1".to_string()),
            ("secondary".to_string(), "m1".to_string())
        ]
    );
}

#[tokio::test]
async fn resumed_run_skips_recorded_items() {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(Ledger::new(dir.path().join("spam_log.txt"), LedgerFormat::Lines));

    let (first, _) = run_fake(&["m1", "m2", "m3"], &[("primary", "m1")], ledger.clone()).await;
    assert_eq!(first.success_count(), 1);

    // The second run finds m2 on the secondary; m1 is never attempted again.
    let (second, calls) = run_fake(
        &["m1", "m2", "m3"],
        &[("primary", "m1"), ("secondary", "m2")],
        ledger.clone(),
    )
    .await;
    assert_eq!(second.skipped, 1);
    assert_eq!(second.attempted, 2);
    assert_eq!(second.succeeded, vec![LedgerKey::single("m2")]);
    assert!(calls.iter().all(|(_, id)| id != "m1"));

    let stored = ledger.load().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(!stored.contains(&LedgerKey::single("m3")));
}

/// Minimal HTTP/1.1 responder: 404 for messages whose id starts with
/// `missing`, 200 with a JSON body otherwise. One request per connection.
async fn spawn_engine(name: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let log = log.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let request_line = head.lines().next().unwrap_or_default().to_string();
                log.lock().push(request_line.clone());

                let (status, body) = if request_line.contains("/message/missing") {
                    ("404 Not Found", format!(r#"{{"error":"not on {}"}}"#, name))
                } else {
                    ("200 OK", r#"{"moved":{"destination":"\\Junk"}}"#.to_string())
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), seen)
}

#[tokio::test]
async fn move_job_records_moves_against_a_live_engine() {
    let (primary_url, primary_log) = spawn_engine("primary").await;
    let dir = tempdir().unwrap();
    let ledger_path: PathBuf = dir.path().join("spam_log.txt");

    let config = Config {
        workers: Some(2),
        max_retries: 1,
        retry_delay: Duration::ZERO,
        ..Config::default()
    };
    let job = MoveJob {
        ledger_path: Some(ledger_path.clone()),
        ..MoveJob::new(MoveTarget::Spam)
    };
    let endpoints = vec![Endpoint::new("primary", primary_url, Some("key".into()))];

    let summary = dispatch_moves(
        &config,
        &job,
        vec![request("m1"), request("missing-2")],
        endpoints,
        None,
    )
    .await
    .unwrap();

    assert_eq!(summary.succeeded, vec![LedgerKey::single("m1")]);
    assert_eq!(summary.not_found, 1);
    assert_eq!(std::fs::read_to_string(&ledger_path).unwrap().trim(), "m1");

    let log = primary_log.lock().clone();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|line| line.starts_with("PUT /v1/account/acct/message/")));
}
