//! Sends one composed message per attempt over a worker-owned session.

use super::message::{compose, ComposeOptions};
use super::session::{Connector, MailSession};
use crate::core::error::{AppError, Result};
use crate::core::models::{Endpoint, SendRequest, WorkItem};
use crate::core::outcome::{Outcome, Reply};
use crate::remote::RemoteOperation;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for a worker's SMTP sender.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderOptions {
    pub compose: ComposeOptions,
    /// Reopen the session after this many processed chunks (0 = never).
    pub refresh_every_chunks: u32,
    /// Attempts when opening a session.
    pub connect_attempts: u32,
    /// First backoff between connect attempts; doubles each time.
    pub connect_backoff: Duration,
    /// Random pause after each send, in seconds (inclusive range).
    pub slow_mode: Option<(u64, u64)>,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            compose: ComposeOptions::default(),
            refresh_every_chunks: 5,
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(1),
            slow_mode: None,
        }
    }
}

/// SMTP [`RemoteOperation`]. Any send error is transient; the broken session
/// is dropped and the next attempt reconnects.
pub struct SmtpSender<C: Connector> {
    connector: Arc<C>,
    session: Option<C::Session>,
    options: SenderOptions,
    chunks_done: u32,
}

impl<C: Connector> SmtpSender<C> {
    pub fn new(connector: Arc<C>, options: SenderOptions) -> Self {
        Self {
            connector,
            session: None,
            options,
            chunks_done: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a session, retrying with exponential backoff. Takes owned
    /// arguments so no borrow of the sender is held across the blocking call.
    async fn open_session(connector: Arc<C>, attempts: u32, backoff: Duration) -> Result<C::Session> {
        let attempts = attempts.max(1);
        let mut delay = backoff;
        let mut attempt = 1;
        loop {
            let worker_connector = Arc::clone(&connector);
            let result = tokio::task::spawn_blocking(move || worker_connector.connect()).await?;
            match result {
                Ok(session) => return Ok(session),
                Err(e) if attempt >= attempts => {
                    tracing::error!(target: "smtp",
                        "Failed to create SMTP connection to {} after {} attempts: {}",
                        connector.describe(), attempt, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(target: "smtp",
                        "SMTP connection failed (attempt {}): {}. Retrying in {:?}.",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || session.quit()).await;
        }
    }
}

#[async_trait]
impl<C: Connector> RemoteOperation for SmtpSender<C> {
    type Item = SendRequest;

    fn requires_credential(&self) -> bool {
        false
    }

    async fn attempt(&mut self, endpoint: &Endpoint, item: &SendRequest) -> Outcome {
        let (message, message_id) = match compose(item, &self.options.compose) {
            Ok(built) => built,
            Err(e) => {
                return Outcome::TransientFailure(
                    Reply::new(format!("could not compose message: {}", e))
                        .with_endpoint(&endpoint.base_url),
                )
            }
        };

        let session = match self.session.take() {
            Some(session) => session,
            None => match Self::open_session(
                Arc::clone(&self.connector),
                self.options.connect_attempts,
                self.options.connect_backoff,
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    return Outcome::TransientFailure(
                        Reply::new(format!("no SMTP session: {}", e)).with_endpoint(&endpoint.base_url),
                    )
                }
            },
        };

        let envelope = message.envelope().clone();
        let raw = message.formatted();
        let sent = tokio::task::spawn_blocking(move || {
            let mut session = session;
            let result = session.send(&envelope, &raw);
            (session, result)
        })
        .await
        .map_err(AppError::from);

        match sent {
            Ok((session, Ok(()))) => {
                self.session = Some(session);
                tracing::debug!(target: "smtp", "Sent {} ({})", item.label(), message_id);
                if let Some((lo, hi)) = self.options.slow_mode {
                    let secs = rand::thread_rng().gen_range(lo.min(hi)..=hi.max(lo));
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                Outcome::success(
                    Reply::new(format!("sent {}", message_id)).with_endpoint(&endpoint.base_url),
                )
            }
            Ok((mut session, Err(e))) => {
                // the session may be mid-transaction; never reuse it
                let _ = tokio::task::spawn_blocking(move || session.quit()).await;
                Outcome::TransientFailure(
                    Reply::new(format!("send failed: {}", e)).with_endpoint(&endpoint.base_url),
                )
            }
            Err(e) => Outcome::TransientFailure(
                Reply::new(format!("send task failed: {}", e)).with_endpoint(&endpoint.base_url),
            ),
        }
    }

    async fn end_chunk(&mut self) {
        self.chunks_done += 1;
        let every = self.options.refresh_every_chunks;
        if every > 0 && self.chunks_done % every == 0 && self.session.is_some() {
            tracing::debug!(target: "smtp",
                "Refreshing SMTP session after {} chunks.", self.chunks_done
            );
            self.close_session().await;
        }
    }

    async fn shutdown(&mut self) {
        self.close_session().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{MessageCategory, TemplateMessage};
    use crate::core::policy::RetryPolicy;
    use lettre::address::Envelope;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Counts connections and scripted send failures.
    #[derive(Default)]
    struct FakeConnector {
        connects: Mutex<u32>,
        connect_failures: Mutex<u32>,
        send_failures: Arc<Mutex<VecDeque<bool>>>,
        delivered: Arc<Mutex<Vec<(u32, String)>>>,
        quits: Arc<Mutex<u32>>,
    }

    struct FakeSession {
        id: u32,
        send_failures: Arc<Mutex<VecDeque<bool>>>,
        delivered: Arc<Mutex<Vec<(u32, String)>>>,
        quits: Arc<Mutex<u32>>,
    }

    impl MailSession for FakeSession {
        fn send(&mut self, envelope: &Envelope, _raw: &[u8]) -> Result<()> {
            if self.send_failures.lock().pop_front().unwrap_or(false) {
                return Err(AppError::Task("connection reset".into()));
            }
            let to = envelope.to()[0].to_string();
            self.delivered.lock().push((self.id, to));
            Ok(())
        }

        fn quit(&mut self) {
            *self.quits.lock() += 1;
        }
    }

    impl Connector for FakeConnector {
        type Session = FakeSession;

        fn connect(&self) -> Result<FakeSession> {
            {
                let mut failures = self.connect_failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(AppError::Initialization("refused".into()));
                }
            }
            let mut connects = self.connects.lock();
            *connects += 1;
            Ok(FakeSession {
                id: *connects,
                send_failures: Arc::clone(&self.send_failures),
                delivered: Arc::clone(&self.delivered),
                quits: Arc::clone(&self.quits),
            })
        }

        fn describe(&self) -> String {
            "fake:587".into()
        }
    }

    fn request(to: &str) -> SendRequest {
        SendRequest {
            sender: "warm@brand.io".into(),
            recipient: to.into(),
            message: TemplateMessage {
                subject: Some("hi".into()),
                plain_text: Some("hello".into()),
                ..TemplateMessage::default()
            },
            category: MessageCategory::Warmup,
        }
    }

    fn smtp_endpoint() -> Endpoint {
        Endpoint::new("smtp", "smtp://fake:587", None)
    }

    fn sender(connector: Arc<FakeConnector>, refresh: u32) -> SmtpSender<FakeConnector> {
        SmtpSender::new(
            connector,
            SenderOptions {
                refresh_every_chunks: refresh,
                connect_backoff: Duration::from_millis(10),
                ..SenderOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn reuses_one_session_across_sends() {
        let connector = Arc::new(FakeConnector::default());
        let mut op = sender(Arc::clone(&connector), 0);
        for to in ["a@seed.io", "b@seed.io", "c@seed.io"] {
            assert!(op.attempt(&smtp_endpoint(), &request(to)).await.is_success());
        }
        assert_eq!(*connector.connects.lock(), 1);
        assert_eq!(connector.delivered.lock().len(), 3);
    }

    #[tokio::test]
    async fn failed_send_reconnects_on_retry() {
        let connector = Arc::new(FakeConnector::default());
        connector.send_failures.lock().push_back(false);
        connector.send_failures.lock().push_back(true);
        let mut op = sender(Arc::clone(&connector), 0);

        assert!(op.attempt(&smtp_endpoint(), &request("a@seed.io")).await.is_success());

        // one reconnect-and-retry: two attempts on the single SMTP endpoint
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let outcome = policy.execute(&mut op, &[smtp_endpoint()], &request("b@seed.io")).await;
        assert!(outcome.is_success());
        assert_eq!(*connector.connects.lock(), 2);
        let delivered = connector.delivered.lock().clone();
        assert_eq!(delivered, vec![(1, "a@seed.io".to_string()), (2, "b@seed.io".to_string())]);
    }

    #[tokio::test]
    async fn every_send_error_is_transient() {
        let connector = Arc::new(FakeConnector::default());
        connector.send_failures.lock().extend([true, true]);
        let mut op = sender(Arc::clone(&connector), 0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let outcome = policy.execute(&mut op, &[smtp_endpoint()], &request("a@seed.io")).await;
        assert!(matches!(outcome, Outcome::TransientFailure(_)));
        assert!(!op.is_connected());
    }

    #[tokio::test]
    async fn connect_retries_with_backoff() {
        let connector = Arc::new(FakeConnector::default());
        *connector.connect_failures.lock() = 2;
        let mut op = sender(Arc::clone(&connector), 0);
        assert!(op.attempt(&smtp_endpoint(), &request("a@seed.io")).await.is_success());
        assert_eq!(*connector.connects.lock(), 1);

        let connector = Arc::new(FakeConnector::default());
        *connector.connect_failures.lock() = 3;
        let mut op = sender(Arc::clone(&connector), 0);
        let outcome = op.attempt(&smtp_endpoint(), &request("a@seed.io")).await;
        assert!(matches!(outcome, Outcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn session_refreshes_every_n_chunks() {
        let connector = Arc::new(FakeConnector::default());
        let mut op = sender(Arc::clone(&connector), 2);
        for chunk in 0..4 {
            op.attempt(&smtp_endpoint(), &request(&format!("r{}@seed.io", chunk))).await;
            op.end_chunk().await;
        }
        // refreshed after chunks 2 and 4
        assert_eq!(*connector.connects.lock(), 2);
        assert_eq!(*connector.quits.lock(), 2);
        assert!(!op.is_connected());
    }

    #[tokio::test]
    async fn invalid_address_is_a_transient_failure_without_connecting() {
        let connector = Arc::new(FakeConnector::default());
        let mut op = sender(Arc::clone(&connector), 0);
        let outcome = op.attempt(&smtp_endpoint(), &request("broken")).await;
        assert!(matches!(outcome, Outcome::TransientFailure(_)));
        assert_eq!(*connector.connects.lock(), 0);
    }
}
