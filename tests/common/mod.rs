#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_dispatch::{
    Entry, Headers, NetworkRequest, NetworkResponse, Transport,
    TransportError,
};

pub type MockResult = Result<NetworkResponse, TransportError>;
type Handler =
    dyn Fn(usize, &NetworkRequest, &Headers) -> MockResult + Send + Sync;

/// One recorded transport invocation.
#[derive(Clone)]
pub struct SeenCall {
    pub url: String,
    pub headers: Headers,
}

/// A programmable in-process transport.
///
/// The handler receives the zero-based call index, the request, and the
/// merged extra headers; every call is recorded before the handler runs.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

struct Inner {
    handler: Box<Handler>,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenCall>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(usize, &NetworkRequest, &Headers) -> MockResult
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A transport answering every call with the same response.
    pub fn always(response: NetworkResponse) -> Self {
        Self::new(move |_, _, _| Ok(response.clone()))
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenCall> {
        self.inner.seen.lock().unwrap().clone()
    }

    /// Spins until the transport has received at least `count` calls.
    pub fn wait_for_calls(&self, count: usize, timeout: Duration) {
        let deadline = std::time::Instant::now() + timeout;
        while self.calls() < count {
            assert!(
                std::time::Instant::now() < deadline,
                "transport never reached {count} calls (saw {})",
                self.calls()
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Transport for MockTransport {
    fn perform(
        &self,
        request: &NetworkRequest,
        extra_headers: &Headers,
        _timeout: Duration,
    ) -> MockResult {
        let mut merged = request.headers.clone();
        merged.merge(extra_headers);
        self.inner.seen.lock().unwrap().push(SeenCall {
            url: request.url.to_string(),
            headers: merged,
        });
        let index = self.inner.calls.fetch_add(1, Ordering::SeqCst);
        (self.inner.handler)(index, request, extra_headers)
    }
}

pub fn response(
    status: u16,
    body: &'static [u8],
    headers: &[(&str, &str)],
) -> NetworkResponse {
    NetworkResponse::new(
        StatusCode::from_u16(status).unwrap(),
        Bytes::from_static(body),
        headers.iter().copied().collect(),
    )
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// An entry with explicit expiries relative to now (negative = in the past).
pub fn entry_with_offsets(
    body: &'static [u8],
    etag: Option<&str>,
    soft_ttl_offset_ms: i64,
    ttl_offset_ms: i64,
) -> Entry {
    let now = now_ms() as i64;
    let mut headers = Headers::new();
    headers.insert("content-type", "application/octet-stream");
    Entry {
        data: Bytes::from_static(body),
        etag: etag.map(str::to_string),
        server_date: now as u64,
        last_modified: 0,
        ttl: (now + ttl_offset_ms).max(0) as u64,
        soft_ttl: (now + soft_ttl_offset_ms).max(0) as u64,
        headers,
    }
}
