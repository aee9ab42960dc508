//! SMTP sending: message construction, worker-owned sessions, and pre-flight checks.

pub mod message;
pub mod sender;
pub mod session;

pub use message::{compose, generate_message_id, ComposeOptions};
pub use sender::{SenderOptions, SmtpSender};
pub use session::{Connector, LettreSession, MailSession, SmtpConnector, SmtpSettings};

use crate::core::error::{AppError, Result};
use std::net::IpAddr;
use trust_dns_resolver::TokioAsyncResolver;

/// Checks that the relay host resolves before any worker starts.
pub async fn ensure_resolvable(server: &str) -> Result<Vec<IpAddr>> {
    if server.trim().is_empty() {
        return Err(AppError::Config("SMTP server is not configured".to_string()));
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
    let lookup = resolver.lookup_ip(server).await.map_err(|e| {
        AppError::Config(format!("SMTP server '{}' cannot be resolved: {}", server, e))
    })?;
    let addrs: Vec<IpAddr> = lookup.iter().collect();
    if addrs.is_empty() {
        return Err(AppError::Config(format!(
            "SMTP server '{}' resolved to no addresses",
            server
        )));
    }
    tracing::debug!(target: "smtp", "SMTP server {} resolves to {:?}", server, addrs);
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_server_is_a_config_error() {
        assert!(matches!(ensure_resolvable("  ").await, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn ip_literals_skip_dns() {
        let addrs = ensure_resolvable("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }
}
