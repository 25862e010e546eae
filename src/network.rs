use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use log::{debug, warn};

use crate::auth::Authenticator;
use crate::cache::{format_epoch_millis, Entry};
use crate::error::{Error, ErrorKind, Result};
use crate::headers::Headers;
use crate::request::QueuedRequest;
use crate::transport::{NetworkResponse, Transport, TransportError};

/// Requests whose total lifetime exceeds this are logged as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(3000);

/// Executes the full retry loop for one request.
///
/// One `perform_request` call owns the request for its entire network life:
/// attempts run strictly sequentially on the calling worker thread, each one
/// under the retry policy's current timeout, until an attempt succeeds or
/// the policy gives the accumulated error back.
pub(crate) struct BasicNetwork {
    transport: Arc<dyn Transport>,
    authenticator: Option<Arc<dyn Authenticator>>,
    slow_threshold: Duration,
}

impl BasicNetwork {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        authenticator: Option<Arc<dyn Authenticator>>,
        slow_threshold: Duration,
    ) -> Self {
        Self { transport, authenticator, slow_threshold }
    }

    pub(crate) fn perform_request(
        &self,
        request: &mut QueuedRequest,
    ) -> Result<NetworkResponse> {
        let start = Instant::now();
        loop {
            let mut extra_headers = Headers::new();
            let token = self.attach_authorization(&mut extra_headers)?;
            attach_validators(request.cache_entry.as_ref(), &mut extra_headers);

            let timeout = request.retry.current_timeout();
            let attempt = self.transport.perform(
                &request.network,
                &extra_headers,
                timeout,
            );
            let elapsed = start.elapsed();

            match attempt {
                Ok(mut response) => {
                    response.network_time = elapsed;
                    let status = response.status;
                    if status == StatusCode::NOT_MODIFIED {
                        let merged = merge_not_modified(
                            request.cache_entry.as_ref(),
                            response,
                        );
                        self.log_completed(request, &merged, elapsed);
                        return Ok(merged);
                    }
                    if status.is_success()
                        || status.is_informational()
                        || status.is_redirection()
                    {
                        self.log_completed(request, &response, elapsed);
                        return Ok(response);
                    }
                    match status.as_u16() {
                        401 => self.handle_unauthorized(
                            request, token, response, elapsed,
                        )?,
                        403 => {
                            return Err(Error::new(ErrorKind::Forbidden)
                                .with_response(response)
                                .with_network_time(elapsed))
                        }
                        408 | 504 => attempt_retry(
                            request,
                            Error::timeout()
                                .with_response(response)
                                .with_network_time(elapsed),
                        )?,
                        500..=599 => attempt_retry(
                            request,
                            Error::new(ErrorKind::Server)
                                .with_response(response)
                                .with_network_time(elapsed),
                        )?,
                        _ => {
                            return Err(Error::new(ErrorKind::Request)
                                .with_response(response)
                                .with_network_time(elapsed))
                        }
                    }
                }
                Err(TransportError::Timeout) => attempt_retry(
                    request,
                    Error::timeout().with_network_time(elapsed),
                )?,
                Err(other) => {
                    return Err(Error::from(other).with_network_time(elapsed))
                }
            }
            // a retry was absorbed; loop for the next attempt
        }
    }

    /// One refresh per request: invalidate the rejected token, fetch a new
    /// one, and charge a retry. Without an authenticator the 401 is terminal.
    fn handle_unauthorized(
        &self,
        request: &mut QueuedRequest,
        rejected_token: Option<String>,
        response: NetworkResponse,
        elapsed: Duration,
    ) -> Result<()> {
        let Some(authenticator) = &self.authenticator else {
            return Err(Error::auth_failure()
                .with_response(response)
                .with_network_time(elapsed));
        };
        if let Some(token) = rejected_token {
            authenticator.invalidate(&token);
        }
        match authenticator.token() {
            Ok(_) => {
                debug!("token refreshed after 401 for {}", request.network.url);
                attempt_retry(
                    request,
                    Error::auth_failure()
                        .with_response(response)
                        .with_network_time(elapsed),
                )
            }
            Err(refresh_error) => Err(refresh_error
                .with_response(response)
                .with_network_time(elapsed)),
        }
    }

    fn attach_authorization(
        &self,
        extra_headers: &mut Headers,
    ) -> Result<Option<String>> {
        let Some(authenticator) = &self.authenticator else {
            return Ok(None);
        };
        let token = authenticator.token()?;
        extra_headers.insert("authorization", format!("Bearer {token}"));
        Ok(Some(token))
    }

    fn log_completed(
        &self,
        request: &QueuedRequest,
        response: &NetworkResponse,
        elapsed: Duration,
    ) {
        if elapsed > self.slow_threshold {
            warn!(
                "slow request {} [lifetime={elapsed:?}, status={}, size={}, retries={}]",
                request.network.url,
                response.status,
                response.data.len(),
                request.retry.retry_count()
            );
        } else {
            debug!(
                "completed {} [lifetime={elapsed:?}, status={}]",
                request.network.url, response.status
            );
        }
    }
}

/// Adds `If-None-Match`/`If-Modified-Since` from a previously cached entry.
fn attach_validators(entry: Option<&Entry>, extra_headers: &mut Headers) {
    let Some(entry) = entry else { return };
    if let Some(etag) = &entry.etag {
        extra_headers.insert("if-none-match", etag.clone());
    }
    if entry.last_modified > 0 {
        extra_headers.insert(
            "if-modified-since",
            format_epoch_millis(entry.last_modified),
        );
    }
}

/// Builds the response a `304 Not Modified` stands for: the cached body with
/// the cached headers refreshed by whatever the server just sent.
fn merge_not_modified(
    entry: Option<&Entry>,
    response: NetworkResponse,
) -> NetworkResponse {
    match entry {
        None => NetworkResponse { not_modified: true, ..response },
        Some(entry) => {
            let mut headers = entry.headers.clone();
            headers.merge(&response.headers);
            NetworkResponse {
                status: response.status,
                data: entry.data.clone(),
                headers,
                not_modified: true,
                network_time: response.network_time,
            }
        }
    }
}

fn attempt_retry(request: &mut QueuedRequest, error: Error) -> Result<()> {
    debug!("retrying {} after: {error}", request.network.url);
    request.retry.retry(error)
}
