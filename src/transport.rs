//! Transport adapter: performs requests and classifies failures.
//!
//! The transport knows nothing about the cache. It turns a [`Request`] into
//! either a JSON payload or a [`TransportError`], and every failure cause
//! (unreachable server, non-2xx response, unparsable body, cancellation) is
//! folded into that one shape.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpTransport`](http::HttpTransport) talks to the real backend over
//!   `reqwest` (feature `http`, enabled by default).
//! - [`MockTransport`](mock::MockTransport) simulates the backend's REST
//!   collections in memory for local development and tests.

mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod mock;

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use error::{ErrorKind, SERVER_DISCONNECTED, TransportError};

/// Outcome of a single transport call.
pub type TransportResult = Result<Value, TransportError>;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether arguments travel in a JSON body rather than the query string.
    #[must_use]
    pub const fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Performs requests against the backend.
///
/// Implementations must honour `cancel`: once it fires, the returned future
/// should resolve promptly with [`TransportError::cancelled`] and abort the
/// underlying request if the transport supports it. The returned future is
/// `'static`, so implementations clone whatever shared client they hold.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    fn execute(&self, request: Request, cancel: CancellationToken) -> BoxFuture<'static, TransportResult>;
}
