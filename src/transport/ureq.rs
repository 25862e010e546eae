use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;

use crate::headers::Headers;
use crate::pool::{BufferPool, PooledBuffer};
use crate::request::NetworkRequest;
use crate::transport::{NetworkResponse, Transport, TransportError};

/// Scratch buffer size for streaming response bodies.
const COPY_CHUNK: usize = 1024;

/// A blocking [`Transport`] driver built on [`ureq`].
///
/// One agent is shared across all worker threads, so keep-alive connections
/// are reused between attempts. Response bodies are streamed through the
/// queue's [`BufferPool`] instead of allocating per response.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    pool: Arc<BufferPool>,
}

impl UreqTransport {
    /// Creates a driver with a default agent, drawing buffers from `pool`.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { agent: ureq::AgentBuilder::new().build(), pool }
    }

    /// Creates a driver around a preconfigured agent (proxy, TLS, resolver).
    pub fn with_agent(agent: ureq::Agent, pool: Arc<BufferPool>) -> Self {
        Self { agent, pool }
    }

    fn read_response(
        &self,
        response: ureq::Response,
    ) -> Result<NetworkResponse, TransportError> {
        let status = StatusCode::from_u16(response.status()).map_err(|_| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unparseable status code",
            ))
        })?;
        let mut headers = Headers::new();
        for name in response.headers_names() {
            if let Some(value) = response.header(&name) {
                headers.insert(&name, value);
            }
        }
        let size_hint = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut sink = PooledBuffer::with_capacity(Arc::clone(&self.pool), size_hint);
        let mut scratch = self.pool.get(COPY_CHUNK);
        scratch.resize(COPY_CHUNK, 0);
        let mut reader = response.into_reader();
        let copied = loop {
            match reader.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(err) = sink.write_all(&scratch[..n]) {
                        break Err(err);
                    }
                }
                Err(err) => break Err(err),
            }
        };
        self.pool.return_buf(scratch);
        copied.map_err(classify_io)?;

        Ok(NetworkResponse::new(
            status,
            Bytes::from(sink.to_vec()),
            headers,
        ))
    }
}

impl Transport for UreqTransport {
    fn perform(
        &self,
        request: &NetworkRequest,
        extra_headers: &Headers,
        timeout: Duration,
    ) -> Result<NetworkResponse, TransportError> {
        let mut call = self
            .agent
            .request(request.method.as_str(), request.url.as_str())
            .timeout(timeout);
        for (name, value) in request.headers.iter() {
            call = call.set(name, value);
        }
        for (name, value) in extra_headers.iter() {
            call = call.set(name, value);
        }

        let outcome = match &request.body {
            Some(body) => call
                .set("content-type", &body.content_type)
                .send_bytes(&body.data),
            None => call.call(),
        };

        match outcome {
            Ok(response) => self.read_response(response),
            // Non-2xx statuses are responses up here, not errors.
            Err(ureq::Error::Status(_, response)) => {
                self.read_response(response)
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(classify_transport(transport))
            }
        }
    }
}

fn classify_transport(err: ureq::Transport) -> TransportError {
    match err.kind() {
        ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
            TransportError::MalformedUrl(err.to_string())
        }
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
            TransportError::ConnectionFailed
        }
        ureq::ErrorKind::Io => {
            let timed_out = std::error::Error::source(&err)
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .map(|io| {
                    matches!(
                        io.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                    )
                })
                .unwrap_or_else(|| err.to_string().contains("timed out"));
            if timed_out {
                TransportError::Timeout
            } else {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    err.to_string(),
                ))
            }
        }
        _ => TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            err.to_string(),
        )),
    }
}

fn classify_io(err: std::io::Error) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            TransportError::Timeout
        }
        _ => TransportError::Io(err),
    }
}
