use std::time::UNIX_EPOCH;

use crate::cache::{epoch_millis, Entry};
use crate::headers::Headers;
use crate::transport::NetworkResponse;

/// Charset assumed for `text/*` responses without an explicit one, per
/// RFC 2616 section 3.7.1.
pub const DEFAULT_CHARSET: &str = "ISO-8859-1";

/// Extracts a cache [`Entry`] from a network response, honoring
/// `Cache-Control` and `Expires`.
///
/// Returns `None` when the response must not be cached (`no-cache`,
/// `no-store`). Under `Cache-Control`, the soft expiry is `now + max-age`;
/// `stale-while-revalidate` pushes the hard expiry further out, while
/// `must-revalidate`/`proxy-revalidate` pin it to the soft expiry. Without
/// `Cache-Control`, the lifetime is `Expires - Date`. Responses carrying
/// neither still produce an entry — immediately stale, but with validators
/// usable for conditional requests.
pub fn parse_cache_headers(response: &NetworkResponse) -> Option<Entry> {
    let now = epoch_millis();
    let headers = &response.headers;

    let server_date = headers
        .get("date")
        .and_then(parse_date_as_epoch_millis)
        .unwrap_or(now);
    let last_modified = headers
        .get("last-modified")
        .and_then(parse_date_as_epoch_millis)
        .unwrap_or(0);
    let server_expires =
        headers.get("expires").and_then(parse_date_as_epoch_millis).unwrap_or(0);
    let etag = headers.get("etag").map(str::to_string);

    let mut has_cache_control = false;
    let mut must_revalidate = false;
    let mut max_age_secs: u64 = 0;
    let mut stale_while_revalidate_secs: u64 = 0;
    if let Some(value) = headers.get("cache-control") {
        has_cache_control = true;
        for directive in value.to_ascii_lowercase().split(',') {
            let directive = directive.trim();
            if directive == "no-cache" || directive == "no-store" {
                return None;
            } else if let Some(secs) = directive.strip_prefix("max-age=") {
                max_age_secs = secs.parse().unwrap_or(0);
            } else if let Some(secs) =
                directive.strip_prefix("stale-while-revalidate=")
            {
                stale_while_revalidate_secs = secs.parse().unwrap_or(0);
            } else if directive == "must-revalidate"
                || directive == "proxy-revalidate"
            {
                must_revalidate = true;
            }
        }
    }

    let (soft_ttl, ttl) = if has_cache_control {
        let soft = now.saturating_add(max_age_secs.saturating_mul(1000));
        let hard = if must_revalidate {
            soft
        } else {
            soft.saturating_add(
                stale_while_revalidate_secs.saturating_mul(1000),
            )
        };
        (soft, hard)
    } else if server_date > 0 && server_expires >= server_date {
        let soft = now.saturating_add(server_expires - server_date);
        (soft, soft)
    } else {
        (0, 0)
    };

    Some(Entry {
        data: response.data.clone(),
        etag,
        server_date,
        last_modified,
        ttl,
        soft_ttl,
        headers: response.headers.clone(),
    })
}

/// Returns the charset declared in `Content-Type`, or [`DEFAULT_CHARSET`].
pub fn parse_charset(headers: &Headers) -> String {
    if let Some(content_type) = headers.get("content-type") {
        for param in content_type.split(';').skip(1) {
            let param = param.trim();
            if let Some(charset) = param
                .strip_prefix("charset=")
                .or_else(|| param.strip_prefix("CHARSET="))
            {
                return charset.trim_matches('"').to_string();
            }
        }
    }
    DEFAULT_CHARSET.to_string()
}

/// Parses an RFC 1123 date into epoch milliseconds. Malformed dates yield
/// `None`.
pub(crate) fn parse_date_as_epoch_millis(value: &str) -> Option<u64> {
    let parsed = httpdate::parse_http_date(value).ok()?;
    parsed
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

/// Formats epoch milliseconds as an RFC 1123 date for `If-Modified-Since`.
pub(crate) fn format_epoch_millis(epoch_ms: u64) -> String {
    let time = UNIX_EPOCH + std::time::Duration::from_millis(epoch_ms);
    httpdate::fmt_http_date(time)
}
