use std::time::Duration;

use thiserror::Error;

use crate::transport::{NetworkResponse, TransportError};

/// A `Result` typedef to use with the [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The failure kinds a request can end with.
///
/// Every kind is carried end-to-end: the network layer classifies, the retry
/// policy accumulates, and the delivery executor hands the final value to the
/// request's error listener.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A connect or socket read timed out, or the server answered
    /// 408/504. Retryable.
    #[error("request timed out")]
    Timeout,
    /// No usable network connection could be established. Terminal.
    #[error("no connection available")]
    NoConnection,
    /// Transport-level I/O failure outside the timeout/connect cases. Terminal.
    #[error("network failure")]
    Network(#[source] std::io::Error),
    /// The server answered with a 5xx status. Retryable.
    #[error("server error")]
    Server,
    /// The server rejected the request with a 4xx status other than
    /// 401/403/408. Terminal.
    #[error("request rejected by server")]
    Request,
    /// The server answered 401, or a token could not be obtained.
    /// Retryable once after a token refresh.
    #[error("authentication failure")]
    AuthFailure {
        /// Optional resolution hint supplied by the
        /// [`Authenticator`](crate::Authenticator), e.g. a re-login URL.
        hint: Option<String>,
    },
    /// The server answered 403. Terminal.
    #[error("access forbidden")]
    Forbidden,
    /// The response converter could not decode the body. Terminal.
    #[error("failed to decode response: {0}")]
    Parse(String),
    /// The request URL could not be interpreted by the transport. Terminal.
    #[error("malformed url: {0}")]
    MalformedUrl(String),
}

/// The error type carried through the request lifecycle.
///
/// Alongside the [`ErrorKind`], an error keeps the raw [`NetworkResponse`]
/// that produced it (when one exists) and the time spent on the wire across
/// all attempts.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// What went wrong.
    #[source]
    pub kind: ErrorKind,
    /// The response that triggered the failure, if the server answered at all.
    pub response: Option<NetworkResponse>,
    /// Wall-clock time spent on the network before the failure surfaced.
    pub network_time: Duration,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, response: None, network_time: Duration::ZERO }
    }

    pub(crate) fn with_response(mut self, response: NetworkResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub(crate) fn with_network_time(mut self, elapsed: Duration) -> Self {
        self.network_time = elapsed;
        self
    }

    /// A timeout, without a server response.
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// No connection could be established.
    pub fn no_connection() -> Self {
        Self::new(ErrorKind::NoConnection)
    }

    /// A transport-level I/O failure.
    pub fn network(source: std::io::Error) -> Self {
        Self::new(ErrorKind::Network(source))
    }

    /// A converter failure with a human-readable reason.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse(reason.into()))
    }

    /// An authentication failure without a resolution hint.
    pub fn auth_failure() -> Self {
        Self::new(ErrorKind::AuthFailure { hint: None })
    }

    /// An authentication failure carrying a resolution hint for the caller.
    pub fn auth_failure_with_hint(hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure { hint: Some(hint.into()) })
    }

    /// Whether the retry policy may schedule another attempt for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout
                | ErrorKind::Server
                | ErrorKind::AuthFailure { .. }
        )
    }

    /// The HTTP status of the response that produced this error, if any.
    pub fn status(&self) -> Option<http::StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::timeout(),
            TransportError::ConnectionFailed => Self::no_connection(),
            TransportError::MalformedUrl(url) => {
                Self::new(ErrorKind::MalformedUrl(url))
            }
            TransportError::Io(source) => Self::network(source),
        }
    }
}
