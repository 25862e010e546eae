mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::{entry_with_offsets, response, MockTransport};
use http_dispatch::{
    Authenticator, BytesConverter, Cache, DefaultRetryPolicy, DiskCache,
    Error, ErrorKind, ImmediateExecutor, Priority, Request, RequestQueue,
    Result, TransportError,
};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(300);

fn url(path: &str) -> Url {
    Url::parse(&format!("https://example.com{path}")).unwrap()
}

fn queue_with(
    transport: &MockTransport,
    cache_dir: Option<&std::path::Path>,
) -> RequestQueue {
    let mut builder = RequestQueue::builder()
        .transport(transport.clone())
        .delivery_executor(ImmediateExecutor)
        .network_threads(2);
    if let Some(dir) = cache_dir {
        builder = builder.cache(DiskCache::new(dir));
    }
    builder.build()
}

fn tracked_get(
    path: &str,
) -> (Request<Bytes>, Receiver<Bytes>, Receiver<Error>) {
    let (success_tx, success_rx) = channel();
    let (error_tx, error_rx) = channel();
    let request = Request::get(url(path), BytesConverter)
        .on_success(move |body| {
            let _ = success_tx.send(body);
        })
        .on_error(move |err| {
            let _ = error_tx.send(err);
        });
    (request, success_rx, error_rx)
}

#[test]
fn fresh_cache_hit_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::always(response(200, b"from-network", &[]));
    let queue = queue_with(&transport, Some(dir.path()));
    queue.cache().initialize();
    queue.cache().put(
        "GET https://example.com/fresh",
        entry_with_offsets(b"from-cache", None, 60_000, 60_000),
    );
    queue.start();

    let (request, success_rx, _error_rx) = tracked_get("/fresh");
    queue.add(request);

    let body = success_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(body, Bytes::from_static(b"from-cache"));
    std::thread::sleep(SETTLE);
    assert_eq!(transport.calls(), 0);
}

#[test]
fn soft_expired_entry_is_served_then_revalidated() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::always(response(304, b"", &[]));
    let queue = queue_with(&transport, Some(dir.path()));
    queue.cache().initialize();
    queue.cache().put(
        "GET https://example.com/stale",
        entry_with_offsets(b"stale-copy", Some("W/\"v1\""), -1_000, 60_000),
    );
    queue.start();

    let (request, success_rx, _error_rx) = tracked_get("/stale");
    queue.add(request);

    // immediate delivery of the stale copy
    let body = success_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(body, Bytes::from_static(b"stale-copy"));

    // one conditional transport call carrying the validator
    transport.wait_for_calls(1, WAIT);
    let seen = transport.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers.get("if-none-match"), Some("W/\"v1\""));

    // the 304 suppresses a second delivery
    assert_eq!(
        success_rx.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );
}

#[test]
fn soft_expired_entry_redelivers_on_changed_data() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new(|_, _, _| {
        Ok(response(
            200,
            b"new-data",
            &[("Cache-Control", "max-age=60")],
        ))
    });
    let queue = queue_with(&transport, Some(dir.path()));
    queue.cache().initialize();
    queue.cache().put(
        "GET https://example.com/changed",
        entry_with_offsets(b"old-data", Some("W/\"v1\""), -1_000, 60_000),
    );
    queue.start();

    let (request, success_rx, _error_rx) = tracked_get("/changed");
    queue.add(request);

    assert_eq!(
        success_rx.recv_timeout(WAIT).unwrap(),
        Bytes::from_static(b"old-data")
    );
    assert_eq!(
        success_rx.recv_timeout(WAIT).unwrap(),
        Bytes::from_static(b"new-data")
    );
    assert_eq!(transport.calls(), 1);
}

#[test]
fn duplicate_requests_coalesce_onto_one_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::new(|_, _, _| {
        std::thread::sleep(Duration::from_millis(50));
        Ok(response(
            200,
            b"shared-body",
            &[("Cache-Control", "max-age=60")],
        ))
    });
    let queue = queue_with(&transport, Some(dir.path()));

    let (first, rx1, _e1) = tracked_get("/popular");
    let (second, rx2, _e2) = tracked_get("/popular");
    let (third, rx3, _e3) = tracked_get("/popular");
    // admit all three before the dispatchers run: one primary, two parked
    queue.add(first);
    queue.add(second);
    queue.add(third);
    queue.start();

    for rx in [&rx1, &rx2, &rx3] {
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Bytes::from_static(b"shared-body")
        );
    }
    assert_eq!(transport.calls(), 1);
}

struct RotatingAuth {
    tokens: Mutex<Vec<&'static str>>,
}

impl Authenticator for RotatingAuth {
    fn token(&self) -> Result<String> {
        Ok(self.tokens.lock().unwrap().first().copied().unwrap().to_string())
    }

    fn invalidate(&self, token: &str) {
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.first().is_some_and(|t| *t == token) {
            tokens.remove(0);
        }
    }
}

#[test]
fn unauthorized_refreshes_the_token_and_retries() {
    let transport = MockTransport::new(|index, _, _| {
        if index == 0 {
            Ok(response(401, b"", &[]))
        } else {
            Ok(response(200, b"authorized", &[]))
        }
    });
    let queue = RequestQueue::builder()
        .transport(transport.clone())
        .delivery_executor(ImmediateExecutor)
        .authenticator(RotatingAuth {
            tokens: Mutex::new(vec!["tokenA", "tokenB"]),
        })
        .build();
    queue.start();

    let (request, success_rx, _error_rx) = tracked_get("/private");
    queue.add(request);

    assert_eq!(
        success_rx.recv_timeout(WAIT).unwrap(),
        Bytes::from_static(b"authorized")
    );
    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].headers.get("authorization"), Some("Bearer tokenA"));
    assert_eq!(seen[1].headers.get("authorization"), Some("Bearer tokenB"));
}

#[test]
fn exhausted_retry_budget_delivers_one_timeout() {
    let transport = MockTransport::new(|_, _, _| Err(TransportError::Timeout));
    let queue = RequestQueue::builder()
        .transport(transport.clone())
        .delivery_executor(ImmediateExecutor)
        .build();
    queue.start();

    let (success_tx, _success_rx) = channel::<Bytes>();
    let (error_tx, error_rx) = channel();
    queue.add(
        Request::get(url("/flaky"), BytesConverter)
            .with_retry_policy(DefaultRetryPolicy::new(
                Duration::from_millis(20),
                1,
                1.0,
            ))
            .on_success(move |body| {
                let _ = success_tx.send(body);
            })
            .on_error(move |err| {
                let _ = error_tx.send(err);
            }),
    );

    let err = error_rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(err.kind, ErrorKind::Timeout));
    assert_eq!(transport.calls(), 2);
    // exactly one error callback
    assert_eq!(
        error_rx.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );
}

#[test]
fn higher_priority_requests_jump_the_queue() {
    let (release_tx, release_rx) = channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let transport = MockTransport::new(move |_, request, _| {
        if request.url.path() == "/blocker" {
            release_rx.lock().unwrap().recv().unwrap();
        }
        Ok(response(200, b"ok", &[]))
    });
    let queue = RequestQueue::builder()
        .transport(transport.clone())
        .delivery_executor(ImmediateExecutor)
        .network_threads(1)
        .build();
    queue.start();

    let mk = |path: &str, priority: Priority| {
        Request::get(url(path), BytesConverter)
            .with_caching(false)
            .with_priority(priority)
    };

    queue.add(mk("/blocker", Priority::Low));
    transport.wait_for_calls(1, WAIT);
    // queued behind the blocked worker
    queue.add(mk("/low", Priority::Low));
    queue.add(mk("/immediate", Priority::Immediate));
    release_tx.send(()).unwrap();

    transport.wait_for_calls(3, WAIT);
    let order: Vec<String> =
        transport.seen().iter().map(|call| call.url.clone()).collect();
    assert_eq!(
        order,
        [
            "https://example.com/blocker",
            "https://example.com/immediate",
            "https://example.com/low"
        ]
    );
}

#[test]
fn canceled_requests_are_never_delivered() {
    let transport = MockTransport::always(response(200, b"ok", &[]));
    let queue = RequestQueue::builder()
        .transport(transport.clone())
        .delivery_executor(ImmediateExecutor)
        .build();

    let (request, success_rx, error_rx) = tracked_get("/doomed");
    let handle = queue.add(request.with_tag("doomed"));
    handle.cancel();
    queue.start();

    std::thread::sleep(SETTLE);
    assert_eq!(
        success_rx.recv_timeout(SETTLE).unwrap_err(),
        RecvTimeoutError::Timeout
    );
    assert_eq!(
        error_rx.recv_timeout(Duration::from_millis(10)).unwrap_err(),
        RecvTimeoutError::Timeout
    );
    assert_eq!(transport.calls(), 0);
}

#[test]
fn cancel_all_with_tag_only_hits_matching_requests() {
    let counted = Arc::new(AtomicUsize::new(0));
    let transport = MockTransport::always(response(200, b"ok", &[]));
    let queue = RequestQueue::builder()
        .transport(transport.clone())
        .delivery_executor(ImmediateExecutor)
        .build();

    let seen = Arc::clone(&counted);
    queue.add(
        Request::get(url("/keep"), BytesConverter)
            .with_tag("keep")
            .on_success(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let (request, success_rx, _error_rx) = tracked_get("/drop");
    queue.add(request.with_tag("drop"));

    queue.cancel_all_with_tag("drop");
    queue.start();

    std::thread::sleep(SETTLE);
    assert_eq!(counted.load(Ordering::SeqCst), 1);
    assert_eq!(
        success_rx.recv_timeout(Duration::from_millis(10)).unwrap_err(),
        RecvTimeoutError::Timeout
    );
}

#[test]
fn invalidated_entries_route_through_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::always(response(
        200,
        b"revalidated",
        &[("Cache-Control", "max-age=60")],
    ));
    let queue = queue_with(&transport, Some(dir.path()));
    queue.cache().initialize();
    queue.cache().put(
        "GET https://example.com/pinned",
        entry_with_offsets(b"pinned", Some("W/\"p\""), 60_000, 60_000),
    );
    queue.cache().invalidate("GET https://example.com/pinned", true);
    queue.start();

    let (request, success_rx, _error_rx) = tracked_get("/pinned");
    queue.add(request);

    assert_eq!(
        success_rx.recv_timeout(WAIT).unwrap(),
        Bytes::from_static(b"revalidated")
    );
    assert_eq!(transport.calls(), 1);
    // the expired entry still contributed its validator
    assert_eq!(
        transport.seen()[0].headers.get("if-none-match"),
        Some("W/\"p\"")
    );
}

#[test]
fn non_cacheable_requests_bypass_the_cache_tier() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::always(response(200, b"posted", &[]));
    let queue = queue_with(&transport, Some(dir.path()));
    queue.start();

    let (success_tx, success_rx) = channel();
    queue.add(
        Request::post(
            url("/submit"),
            http_dispatch::RequestBody::new("text/plain", "payload"),
            BytesConverter,
        )
        .on_success(move |body: Bytes| {
            let _ = success_tx.send(body);
        }),
    );

    assert_eq!(
        success_rx.recv_timeout(WAIT).unwrap(),
        Bytes::from_static(b"posted")
    );
    assert_eq!(transport.calls(), 1);
    std::thread::sleep(SETTLE);
    // nothing was written to the cache for the POST
    assert!(queue
        .cache()
        .get("POST https://example.com/submit")
        .is_none());
}
