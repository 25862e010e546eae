use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

use crate::headers::Headers;
use crate::request::NetworkRequest;

#[cfg(feature = "transport-ureq")]
mod ureq;

#[cfg(feature = "transport-ureq")]
pub use self::ureq::UreqTransport;

/// One HTTP exchange as seen by the dispatch layer.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    /// HTTP status code of the exchange.
    pub status: StatusCode,
    /// Response body. Shared cheaply between coalesced deliveries.
    pub data: Bytes,
    /// Response headers, case-insensitive.
    pub headers: Headers,
    /// Whether this response was a `304 Not Modified` answered from a
    /// conditional request.
    pub not_modified: bool,
    /// Wall-clock time this exchange (including retries) spent on the wire.
    pub network_time: Duration,
}

impl NetworkResponse {
    /// A plain response with the given status, body, and headers.
    pub fn new(status: StatusCode, data: Bytes, headers: Headers) -> Self {
        Self {
            status,
            data,
            headers,
            not_modified: false,
            network_time: Duration::ZERO,
        }
    }
}

/// Failures a [`Transport`] driver can surface.
///
/// Anything the server actually answered — including 4xx and 5xx — is a
/// [`NetworkResponse`], not an error; these variants cover the cases where no
/// usable response exists.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The connect or read deadline given to the driver elapsed.
    #[error("socket timed out")]
    Timeout,
    /// No connection to the host could be established.
    #[error("connection failed")]
    ConnectionFailed,
    /// The request URL was rejected by the driver.
    #[error("malformed url: {0}")]
    MalformedUrl(String),
    /// Any other I/O failure while talking to the server.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The low-level HTTP driver.
///
/// A transport performs exactly one attempt per call: it must honor the
/// passed per-attempt `timeout`, surface timeouts as
/// [`TransportError::Timeout`], and never retry internally — the retry loop
/// lives above it. `extra_headers` (cache validators, authorization) take
/// precedence over headers already present on the request.
pub trait Transport: Send + Sync + 'static {
    /// Executes `request` and returns the raw exchange.
    fn perform(
        &self,
        request: &NetworkRequest,
        extra_headers: &Headers,
        timeout: Duration,
    ) -> Result<NetworkResponse, TransportError>;
}
