use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::StatusCode;

use crate::headers::Headers;
use crate::transport::NetworkResponse;

mod disk;
mod policy;

pub use disk::{
    DiskCache, DEFAULT_DISK_CACHE_BYTES, DEFAULT_HYSTERESIS_FACTOR,
};
pub use policy::{parse_cache_headers, parse_charset, DEFAULT_CHARSET};

pub(crate) use policy::format_epoch_millis;

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A cached HTTP response with its validators and expiries.
///
/// All instants are milliseconds since the Unix epoch. The invariant
/// `soft_ttl <= ttl` holds for every entry produced by
/// [`parse_cache_headers`]; an entry is *fresh* before `soft_ttl`,
/// *usable while refreshing* between `soft_ttl` and `ttl`, and *expired*
/// from `ttl` on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The response body.
    pub data: Bytes,
    /// `ETag` validator, if the server sent one.
    pub etag: Option<String>,
    /// Server `Date` at the time of the exchange.
    pub server_date: u64,
    /// `Last-Modified` validator, 0 when absent.
    pub last_modified: u64,
    /// Hard expiry: the entry must not be served past this instant.
    pub ttl: u64,
    /// Soft expiry: the entry must be revalidated past this instant, but may
    /// still be served while the revalidation runs.
    pub soft_ttl: u64,
    /// The response headers the entry was created from.
    pub headers: Headers,
}

impl Entry {
    /// Whether the entry is past its hard expiry.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.ttl <= now_ms
    }

    /// Whether the entry is past its soft expiry and needs revalidation.
    pub fn needs_refresh(&self, now_ms: u64) -> bool {
        self.soft_ttl <= now_ms
    }

    /// Synthesizes the `200 OK` response a cache hit is decoded from.
    pub fn to_response(&self) -> NetworkResponse {
        NetworkResponse::new(
            StatusCode::OK,
            self.data.clone(),
            self.headers.clone(),
        )
    }
}

/// A persistent key→[`Entry`] store.
///
/// Implementations are shared across the dispatcher threads and must
/// serialize internally. The contract is intentionally infallible: storage
/// failures are logged and degrade to cache misses rather than failing the
/// request that triggered them.
pub trait Cache: Send + Sync + 'static {
    /// Prepares the store for use. Called once, on the cache dispatcher
    /// thread, before any other access.
    fn initialize(&self);

    /// Retrieves an entry, or `None` on miss or unreadable data.
    fn get(&self, key: &str) -> Option<Entry>;

    /// Stores an entry, evicting older entries if needed.
    fn put(&self, key: &str, entry: Entry);

    /// Forces revalidation of an entry on its next access: zeroes the soft
    /// expiry, and the hard expiry as well when `full_expire` is set.
    fn invalidate(&self, key: &str, full_expire: bool) {
        if let Some(mut entry) = self.get(key) {
            entry.soft_ttl = 0;
            if full_expire {
                entry.ttl = 0;
            }
            self.put(key, entry);
        }
    }

    /// Deletes an entry.
    fn remove(&self, key: &str);

    /// Deletes every entry.
    fn clear(&self);
}

/// A [`Cache`] that never stores anything.
///
/// Useful for queues that must not touch disk; every request takes the
/// network path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn initialize(&self) {}

    fn get(&self, _key: &str) -> Option<Entry> {
        None
    }

    fn put(&self, _key: &str, _entry: Entry) {}

    fn invalidate(&self, _key: &str, _full_expire: bool) {}

    fn remove(&self, _key: &str) {}

    fn clear(&self) {}
}
