mod common;

use std::io::Write;

use bytes::Bytes;
use common::{entry_with_offsets, now_ms};
use http_dispatch::{Cache, DiskCache, Entry, Headers};

fn sample(body: &'static [u8]) -> Entry {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/plain; charset=utf-8");
    headers.insert("X-Origin", "disk-test");
    Entry {
        data: Bytes::from_static(body),
        etag: Some("\"tag-1\"".to_string()),
        server_date: 1_700_000_000_000,
        last_modified: 1_690_000_000_000,
        ttl: now_ms() + 120_000,
        soft_ttl: now_ms() + 60_000,
        headers,
    }
}

#[test]
fn entries_survive_a_full_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path());
    cache.initialize();

    let entry = sample(b"the body");
    cache.put("GET https://example.com/a", entry.clone());
    let loaded = cache.get("GET https://example.com/a").unwrap();
    assert_eq!(loaded, entry);
    assert_eq!(loaded.headers.get("x-origin"), Some("disk-test"));
}

#[test]
fn the_index_is_rebuilt_from_disk_on_initialize() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = DiskCache::new(dir.path());
        cache.initialize();
        cache.put("GET https://example.com/persisted", sample(b"still here"));
    }
    let cache = DiskCache::new(dir.path());
    cache.initialize();
    let loaded = cache.get("GET https://example.com/persisted").unwrap();
    assert_eq!(loaded.data, Bytes::from_static(b"still here"));
}

#[test]
fn garbage_files_are_dropped_during_initialize() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = DiskCache::new(dir.path());
        cache.initialize();
        cache.put("GET https://example.com/good", sample(b"good"));
    }
    let junk = dir.path().join("0123456789abcdef");
    std::fs::File::create(&junk)
        .unwrap()
        .write_all(b"not a cache file")
        .unwrap();

    let cache = DiskCache::new(dir.path());
    cache.initialize();
    assert!(!junk.exists());
    assert!(cache.get("GET https://example.com/good").is_some());
}

#[test]
fn truncated_files_degrade_to_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path());
    cache.initialize();
    cache.put("GET https://example.com/t", sample(b"whole"));

    // corrupt the one file on disk
    let file = std::fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let bytes = std::fs::read(&file).unwrap();
    std::fs::write(&file, &bytes[..8]).unwrap();

    assert!(cache.get("GET https://example.com/t").is_none());
    assert!(!file.exists());
    // a fresh put works again
    cache.put("GET https://example.com/t", sample(b"rewritten"));
    assert!(cache.get("GET https://example.com/t").is_some());
}

#[test]
fn least_recently_used_entries_are_evicted_under_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::with_max_size(dir.path(), 4096);
    cache.initialize();

    let big_body: &'static [u8] = &[0x5a; 1200];
    for key in ["a", "b", "c"] {
        cache.put(key, entry_with_offsets(big_body, None, 60_000, 60_000));
    }
    // touch "a" so "b" is the eviction candidate
    assert!(cache.get("a").is_some());
    cache.put("d", entry_with_offsets(big_body, None, 60_000, 60_000));

    assert!(cache.total_size() <= 4096);
    assert!(cache.get("b").is_none());
    assert!(cache.get("d").is_some());
}

#[test]
fn invalidate_marks_entries_stale() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path());
    cache.initialize();
    cache.put("k", sample(b"x"));

    cache.invalidate("k", false);
    let soft = cache.get("k").unwrap();
    assert!(soft.needs_refresh(now_ms()));
    assert!(!soft.is_expired(now_ms()));

    cache.invalidate("k", true);
    let full = cache.get("k").unwrap();
    assert!(full.is_expired(now_ms()));
    // validators survive invalidation
    assert_eq!(full.etag.as_deref(), Some("\"tag-1\""));
}

#[test]
fn remove_and_clear_delete_files() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path());
    cache.initialize();
    cache.put("one", sample(b"1"));
    cache.put("two", sample(b"2"));

    cache.remove("one");
    assert!(cache.get("one").is_none());
    assert!(cache.get("two").is_some());

    cache.clear();
    assert!(cache.get("two").is_none());
    assert_eq!(cache.total_size(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn replacing_an_entry_reuses_its_accounting() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path());
    cache.initialize();

    cache.put("k", sample(b"aaaaaaaaaa"));
    let first = cache.total_size();
    cache.put("k", sample(b"bb"));
    assert!(cache.total_size() < first);
    assert_eq!(
        cache.get("k").unwrap().data,
        Bytes::from_static(b"bb")
    );
}
