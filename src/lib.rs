#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! A prioritized HTTP request queue with transparent response caching.
//!
//! Requests are admitted to a [`RequestQueue`] and flow through a two-tier
//! dispatcher: a single cache dispatcher triages every cacheable request
//! against a pluggable on-disk [`Cache`] honoring HTTP freshness and
//! validator semantics, and a fixed pool of network dispatchers drives the
//! replaceable [`Transport`] with retries, backoff, and token refresh.
//! Results are decoded on the worker threads and delivered on a
//! caller-designated executor.
//!
//! - Fresh cache entries are served without touching the network.
//! - Soft-expired entries are served immediately *and* revalidated in the
//!   background with `If-None-Match`/`If-Modified-Since`; a `304` means no
//!   second delivery.
//! - Duplicate cacheable requests coalesce onto one transport exchange.
//! - Priorities order dispatch; requests of equal priority run in admission
//!   order.
//!
//! ## Basic usage
//!
//! ```no_run
//! use http_dispatch::{DiskCache, JsonConverter, Priority, Request, RequestQueue};
//!
//! #[derive(serde::Deserialize)]
//! struct Weather {
//!     temperature: f32,
//! }
//!
//! let queue = RequestQueue::builder()
//!     .cache(DiskCache::new("./http-cache"))
//!     .network_threads(4)
//!     .build();
//! queue.start();
//!
//! let url = url::Url::parse("https://api.example.com/weather")?;
//! let handle = queue.add(
//!     Request::get(url, JsonConverter::<Weather>::new())
//!         .with_priority(Priority::High)
//!         .with_tag("weather")
//!         .on_success(|w: Weather| println!("{}°", w.temperature))
//!         .on_error(|err| eprintln!("request failed: {err}")),
//! );
//!
//! // later: cancel it, or everything sharing its tag
//! handle.cancel();
//! queue.cancel_all_with_tag("weather");
//! # Ok::<(), url::ParseError>(())
//! ```
//!
//! ## Features
//!
//! - `json` (default): [`JsonConverter`] and
//!   [`RequestBody::json`] via [serde_json](https://docs.rs/serde_json).
//! - `transport-ureq` (default): a ready-made blocking
//!   [`UreqTransport`] driver. Disable it to bring your own [`Transport`].
//!
//! ## Threading model
//!
//! `start` spawns one cache dispatcher plus N network dispatchers (default
//! 4); `stop` shuts them down. Cancellation is cooperative: an attempt
//! already on the wire runs to completion and its result is dropped at the
//! delivery gate. Every admitted request ends with exactly one success or
//! error callback — unless it was canceled first, in which case it ends
//! silently.

mod auth;
mod cache;
mod converters;
mod delivery;
mod dispatch;
mod error;
mod headers;
mod network;
mod pool;
mod queue;
mod request;
mod retry;
mod transport;

pub use auth::Authenticator;
pub use cache::{
    parse_cache_headers, parse_charset, Cache, DiskCache, Entry, NoCache,
    DEFAULT_CHARSET, DEFAULT_DISK_CACHE_BYTES, DEFAULT_HYSTERESIS_FACTOR,
};
#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub use converters::JsonConverter;
pub use converters::{BytesConverter, StringConverter};
pub use delivery::{DeliveryExecutor, ImmediateExecutor, SingleThreadExecutor};
pub use error::{Error, ErrorKind, Result};
pub use headers::Headers;
pub use network::DEFAULT_SLOW_THRESHOLD;
pub use pool::{BufferPool, PooledBuffer, DEFAULT_POOL_BYTES};
pub use queue::{RequestQueue, RequestQueueBuilder, DEFAULT_NETWORK_THREADS};
pub use request::{
    NetworkRequest, Priority, Request, RequestBody, RequestHandle,
    ResponseConverter,
};
pub use retry::{
    DefaultRetryPolicy, RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER,
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
};
#[cfg(feature = "transport-ureq")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport-ureq")))]
pub use transport::UreqTransport;
pub use transport::{NetworkResponse, Transport, TransportError};
