//! Authenticated SMTP sessions owned by a single worker.

use crate::core::error::{AppError, Result};
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use std::time::Duration;

/// An open mail-transport session. Calls block the current thread.
pub trait MailSession: Send + 'static {
    fn send(&mut self, envelope: &Envelope, raw: &[u8]) -> Result<()>;
    fn quit(&mut self);
}

/// Opens new sessions; shared read-only by all workers.
pub trait Connector: Send + Sync + 'static {
    type Session: MailSession;

    /// Connects, upgrades, and authenticates. Blocks the current thread.
    fn connect(&self) -> Result<Self::Session>;

    /// Human-readable `host:port` for logs and endpoints.
    fn describe(&self) -> String;
}

/// Connection settings for the outbound relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub hello_name: String,
    pub starttls: bool,
}

/// Connects to the configured relay with STARTTLS and LOGIN/PLAIN auth.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    settings: SmtpSettings,
}

impl SmtpConnector {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }
}

/// Wraps lettre's blocking [`SmtpConnection`].
pub struct LettreSession {
    conn: SmtpConnection,
}

impl MailSession for LettreSession {
    fn send(&mut self, envelope: &Envelope, raw: &[u8]) -> Result<()> {
        self.conn.send(envelope, raw)?;
        Ok(())
    }

    fn quit(&mut self) {
        if let Err(e) = self.conn.quit() {
            tracing::debug!(target: "smtp", "Error during SMTP QUIT: {}", e);
        }
    }
}

impl Connector for SmtpConnector {
    type Session = LettreSession;

    fn connect(&self) -> Result<LettreSession> {
        let s = &self.settings;
        let hello = ClientId::Domain(s.hello_name.clone());

        let mut conn = SmtpConnection::connect(
            (s.server.as_str(), s.port),
            Some(s.timeout),
            &hello,
            None,
            None,
        )?;

        if s.starttls {
            if !conn.can_starttls() {
                conn.quit().ok();
                return Err(AppError::Initialization(format!(
                    "SMTP server {} does not offer STARTTLS",
                    self.describe()
                )));
            }
            let tls = TlsParameters::new(s.server.clone())?;
            conn.starttls(&tls, &hello)?;
        }

        if !s.username.is_empty() {
            let credentials = Credentials::new(s.username.clone(), s.password.clone());
            conn.auth(&[Mechanism::Plain, Mechanism::Login], &credentials)?;
        }

        tracing::debug!(target: "smtp", "Opened SMTP session to {}", self.describe());
        Ok(LettreSession { conn })
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.settings.server, self.settings.port)
    }
}
