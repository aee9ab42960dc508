//! Defines the result type for a single remote-operation attempt.

use serde_json::Value;
use std::fmt;

/// Structured payload carried by every [`Outcome`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Status code returned by the remote side, when there was one.
    pub status: Option<u16>,
    /// Base address of the endpoint that produced this reply.
    pub endpoint: Option<String>,
    /// Parsed response body (HTTP only).
    pub body: Option<Value>,
    /// Detailed message about the attempt.
    pub detail: String,
}

impl Reply {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Classification of one attempt at a remote operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation took effect.
    Success(Reply),
    /// The target does not exist here (e.g. HTTP 404). Not retried on the
    /// same endpoint; may fail over to the next one.
    PermanentFailure(Reply),
    /// Network blip, rate limit, 5xx. Retried.
    TransientFailure(Reply),
    /// The remote side answered with something we could not parse.
    /// Retried like a transient failure.
    ProtocolError(Reply),
}

/// Coarse kind of an [`Outcome`], used for counters and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    PermanentFailure,
    TransientFailure,
    ProtocolError,
}

impl Outcome {
    pub fn success(reply: Reply) -> Self {
        Outcome::Success(reply)
    }

    pub fn permanent(reply: Reply) -> Self {
        Outcome::PermanentFailure(reply)
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Outcome::TransientFailure(Reply::new(detail))
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Outcome::ProtocolError(Reply::new(detail))
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::PermanentFailure(_) => OutcomeKind::PermanentFailure,
            Outcome::TransientFailure(_) => OutcomeKind::TransientFailure,
            Outcome::ProtocolError(_) => OutcomeKind::ProtocolError,
        }
    }

    pub fn reply(&self) -> &Reply {
        match self {
            Outcome::Success(r)
            | Outcome::PermanentFailure(r)
            | Outcome::TransientFailure(r)
            | Outcome::ProtocolError(r) => r,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Outcome::PermanentFailure(_))
    }

    /// Terminal outcomes stop the retry loop for the current endpoint.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Success(_) | Outcome::PermanentFailure(_))
    }

    pub fn status(&self) -> Option<u16> {
        self.reply().status
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reply = self.reply();
        let label = match self.kind() {
            OutcomeKind::Success => "success",
            OutcomeKind::PermanentFailure => "permanent failure",
            OutcomeKind::TransientFailure => "transient failure",
            OutcomeKind::ProtocolError => "protocol error",
        };
        match reply.status {
            Some(code) => write!(f, "{} (status {}): {}", label, code, reply.detail),
            None => write!(f, "{}: {}", label, reply.detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_and_permanent_are_terminal() {
        assert!(Outcome::success(Reply::new("ok")).is_terminal());
        assert!(Outcome::permanent(Reply::new("gone")).is_terminal());
        assert!(!Outcome::transient("blip").is_terminal());
        assert!(!Outcome::protocol("garbage").is_terminal());
    }

    #[test]
    fn display_includes_status_when_present() {
        let outcome = Outcome::TransientFailure(Reply::new("bad gateway").with_status(502));
        assert_eq!(outcome.to_string(), "transient failure (status 502): bad gateway");
        assert_eq!(
            Outcome::transient("connection reset").to_string(),
            "transient failure: connection reset"
        );
    }
}
