use serde_json::Value;
use thiserror::Error;

/// Message carried by every "no response received" failure.
///
/// Views compare against this string to render the dedicated "server
/// unavailable" state, so it must never change.
pub const SERVER_DISCONNECTED: &str = "SERVER_DISCONNECTED";

/// Broad classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response was received (connection refused, DNS, timeout).
    Disconnected,
    /// The server answered with a non-2xx status.
    Server,
    /// The server answered 2xx but the body was not valid JSON.
    Decode,
    /// The caller cancelled the request.
    Cancelled,
}

/// A classified transport failure.
///
/// `status` is `0` whenever no response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    pub raw_body: Option<String>,
}

impl TransportError {
    /// The "server unavailable" sentinel: status `0`, message [`SERVER_DISCONNECTED`].
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            kind: ErrorKind::Disconnected,
            status: 0,
            message: SERVER_DISCONNECTED.to_string(),
            raw_body: None,
        }
    }

    /// A non-2xx response. The message comes from the body's `message`
    /// field when present, otherwise a generic one naming the status.
    #[must_use]
    pub fn server(status: u16, raw_body: Option<String>) -> Self {
        let message = raw_body
            .as_deref()
            .and_then(|body| serde_json::from_str::<Value>(body).ok())
            .and_then(|body| match body.get("message") {
                Some(Value::String(message)) if !message.trim().is_empty() => Some(message.clone()),
                _ => None,
            })
            .unwrap_or_else(|| format!("Request failed with status code {status}"));

        Self {
            kind: ErrorKind::Server,
            status,
            message,
            raw_body,
        }
    }

    /// A 2xx response whose body could not be parsed.
    #[must_use]
    pub fn decode(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Decode,
            status,
            message: message.into(),
            raw_body: None,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            status: 0,
            message: "request cancelled".to_string(),
            raw_body: None,
        }
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.kind == ErrorKind::Disconnected
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}
