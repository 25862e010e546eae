use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use log::warn;
use url::Url;

use crate::cache::Entry;
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::transport::NetworkResponse;

/// Dispatch priority of a request.
///
/// Queues serve higher priorities first; requests of equal priority are
/// served in admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Background work, served last.
    Low,
    /// The default.
    Normal,
    /// Served ahead of normal traffic.
    High,
    /// Jumps every other priority class.
    Immediate,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// An encoded HTTP request body with its content type.
#[derive(Debug, Clone)]
pub struct RequestBody {
    /// MIME type sent as `Content-Type`.
    pub content_type: String,
    /// The encoded payload.
    pub data: Bytes,
}

impl RequestBody {
    /// Wraps already-encoded bytes.
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { content_type: content_type.into(), data: data.into() }
    }

    /// Encodes `value` as a JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value)
            .map_err(|e| Error::parse(e.to_string()))?;
        Ok(Self::new("application/json; charset=utf-8", data))
    }

    /// Encodes key/value pairs as an `application/x-www-form-urlencoded` body.
    pub fn form(pairs: &[(&str, &str)]) -> Self {
        let mut encoder = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in pairs {
            encoder.append_pair(name, value);
        }
        Self::new(
            "application/x-www-form-urlencoded; charset=utf-8",
            encoder.finish().into_bytes(),
        )
    }
}

/// The wire-level portion of a request, handed to the [`Transport`](crate::Transport).
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Headers set by the caller.
    pub headers: Headers,
    /// Optional encoded body.
    pub body: Option<RequestBody>,
}

/// Decodes a [`NetworkResponse`] body into a typed value.
///
/// Converters run on the dispatcher worker threads, never on the delivery
/// executor, so an expensive decode does not stall callbacks. Any closure
/// `Fn(&NetworkResponse) -> Result<T>` is a converter.
pub trait ResponseConverter<T>: Send + Sync {
    /// Converts the raw response into `T`.
    fn convert(&self, response: &NetworkResponse) -> Result<T>;
}

impl<T, F> ResponseConverter<T> for F
where
    F: Fn(&NetworkResponse) -> Result<T> + Send + Sync,
{
    fn convert(&self, response: &NetworkResponse) -> Result<T> {
        self(response)
    }
}

/// Shared, externally visible state of an admitted request.
///
/// The queue returns one handle per [`add`](crate::RequestQueue::add); it is
/// the only way to cancel a request after admission. Cancellation is
/// cooperative: dispatchers check the flag at entry and again at delivery,
/// but an attempt already on the wire is allowed to finish (its result is
/// dropped at the delivery gate).
#[derive(Debug)]
pub struct RequestHandle {
    sequence: u64,
    tag: Option<String>,
    cache_key: String,
    url: Url,
    canceled: AtomicBool,
    delivered: AtomicBool,
}

impl RequestHandle {
    /// The admission sequence number. Lower numbers were admitted earlier.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The caller-supplied tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The cache key this request resolves to.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Suppresses all future deliveries for this request.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::SeqCst);
    }

    pub(crate) fn was_delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }
}

/// A typed request: addressing, priority, cacheability, and the converter and
/// listeners that turn a raw response into a caller-visible callback.
///
/// ```
/// use http_dispatch::{Priority, Request};
///
/// let request = Request::get(
///     url::Url::parse("https://example.com/feed")?,
///     http_dispatch::BytesConverter,
/// )
/// .with_priority(Priority::High)
/// .with_tag("feed")
/// .on_success(|body| println!("{} bytes", body.len()))
/// .on_error(|err| eprintln!("feed failed: {err}"));
/// # let _ = request;
/// # Ok::<(), url::ParseError>(())
/// ```
pub struct Request<T> {
    pub(crate) network: NetworkRequest,
    priority: Priority,
    tag: Option<String>,
    should_cache: bool,
    cache_key: Option<String>,
    retry: Box<dyn RetryPolicy>,
    converter: Arc<dyn ResponseConverter<T>>,
    on_success: Arc<dyn Fn(T) + Send + Sync>,
    on_error: Arc<dyn Fn(Error) + Send + Sync>,
}

impl<T: Send + 'static> Request<T> {
    /// Creates a request with the given method and URL.
    ///
    /// GET requests are cacheable by default; everything else is not.
    pub fn new(
        method: Method,
        url: Url,
        converter: impl ResponseConverter<T> + 'static,
    ) -> Self {
        let should_cache = method == Method::GET;
        Self {
            network: NetworkRequest {
                method,
                url,
                headers: Headers::new(),
                body: None,
            },
            priority: Priority::default(),
            tag: None,
            should_cache,
            cache_key: None,
            retry: Box::new(DefaultRetryPolicy::default()),
            converter: Arc::new(converter),
            on_success: Arc::new(|_| {}),
            on_error: Arc::new(|err| {
                warn!("request failed with no error listener: {err}")
            }),
        }
    }

    /// Shorthand for a GET request.
    pub fn get(url: Url, converter: impl ResponseConverter<T> + 'static) -> Self {
        Self::new(Method::GET, url, converter)
    }

    /// Shorthand for a POST request with a body.
    pub fn post(
        url: Url,
        body: RequestBody,
        converter: impl ResponseConverter<T> + 'static,
    ) -> Self {
        Self::new(Method::POST, url, converter).with_body(body)
    }

    /// Sets the dispatch priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Tags the request for [`cancel_all`](crate::RequestQueue::cancel_all).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Adds a request header.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.network.headers.insert(name, value);
        self
    }

    /// Attaches an encoded body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.network.body = Some(body);
        self
    }

    /// Overrides the cacheability default.
    pub fn with_caching(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    /// Overrides the default cache key (`"METHOD url"`).
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(
        mut self,
        policy: impl RetryPolicy + 'static,
    ) -> Self {
        self.retry = Box::new(policy);
        self
    }

    /// Registers the success listener. It is invoked on the delivery
    /// executor, possibly twice when a soft-expired cache entry is served
    /// and the revalidation then returns changed data.
    pub fn on_success(mut self, listener: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_success = Arc::new(listener);
        self
    }

    /// Registers the error listener, invoked at most once on the delivery
    /// executor.
    pub fn on_error(
        mut self,
        listener: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Arc::new(listener);
        self
    }

    /// The cache key this request will use.
    pub fn cache_key(&self) -> String {
        self.cache_key.clone().unwrap_or_else(|| {
            format!("{} {}", self.network.method, self.network.url)
        })
    }

    pub(crate) fn into_queued(self, sequence: u64) -> QueuedRequest {
        let cache_key = self.cache_key();
        let handle = Arc::new(RequestHandle {
            sequence,
            tag: self.tag,
            cache_key: cache_key.clone(),
            url: self.network.url.clone(),
            canceled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
        });
        QueuedRequest {
            network: self.network,
            priority: self.priority,
            sequence,
            cache_key,
            should_cache: self.should_cache,
            cache_entry: None,
            retry: self.retry,
            handle,
            handler: Arc::new(TypedHandler {
                converter: self.converter,
                on_success: self.on_success,
                on_error: self.on_error,
            }),
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.network.method)
            .field("url", &self.network.url.as_str())
            .field("priority", &self.priority)
            .field("tag", &self.tag)
            .field("should_cache", &self.should_cache)
            .field("converter", &"ResponseConverter<T>")
            .finish()
    }
}

/// Type-erased decode-and-deliver capabilities of a request.
///
/// `respond` runs the converter on the calling (worker) thread and returns
/// the closure that will invoke the success listener; `fail` does the same
/// for the error listener. Listeners are `Fn`, not `FnOnce`: a soft-expired
/// cache hit delivers once from cache and possibly again after revalidation.
pub(crate) trait ResponseHandler: Send + Sync {
    fn respond(&self, response: &NetworkResponse) -> Result<DeliveryFn>;
    fn fail(&self, error: Error) -> DeliveryFn;
}

pub(crate) type DeliveryFn = Box<dyn FnOnce() + Send>;

struct TypedHandler<T> {
    converter: Arc<dyn ResponseConverter<T>>,
    on_success: Arc<dyn Fn(T) + Send + Sync>,
    on_error: Arc<dyn Fn(Error) + Send + Sync>,
}

impl<T: Send + 'static> ResponseHandler for TypedHandler<T> {
    fn respond(&self, response: &NetworkResponse) -> Result<DeliveryFn> {
        let value = self.converter.convert(response)?;
        let listener = Arc::clone(&self.on_success);
        Ok(Box::new(move || listener(value)))
    }

    fn fail(&self, error: Error) -> DeliveryFn {
        let listener = Arc::clone(&self.on_error);
        Box::new(move || listener(error))
    }
}

/// The unit of work owned by the queues and dispatchers.
///
/// A request belongs to at most one queue at a time; ownership moves with it.
/// Only the dispatcher currently holding the request writes its mutable
/// fields; the shared flags live on the [`RequestHandle`].
pub(crate) struct QueuedRequest {
    pub(crate) network: NetworkRequest,
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
    pub(crate) cache_key: String,
    pub(crate) should_cache: bool,
    pub(crate) cache_entry: Option<Entry>,
    pub(crate) retry: Box<dyn RetryPolicy>,
    pub(crate) handle: Arc<RequestHandle>,
    pub(crate) handler: Arc<dyn ResponseHandler>,
}
