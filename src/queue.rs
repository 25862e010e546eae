use std::collections::hash_map::Entry as Slot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

use crate::auth::Authenticator;
use crate::cache::{Cache, NoCache};
use crate::delivery::{
    DeliveryExecutor, ExecutorDelivery, SingleThreadExecutor,
};
use crate::dispatch::{self, DispatchQueue};
use crate::network::{BasicNetwork, DEFAULT_SLOW_THRESHOLD};
use crate::pool::{BufferPool, DEFAULT_POOL_BYTES};
use crate::request::{QueuedRequest, Request, RequestHandle};
use crate::transport::Transport;

/// Default number of network dispatcher threads.
pub const DEFAULT_NETWORK_THREADS: usize = 4;

/// State shared between the queue handle, the dispatcher threads, and the
/// delivery closures.
pub(crate) struct QueueCore {
    pub(crate) cache_queue: DispatchQueue,
    pub(crate) network_queue: DispatchQueue,
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) network: BasicNetwork,
    pub(crate) delivery: ExecutorDelivery,
    sequence: AtomicU64,
    current: Mutex<HashMap<u64, Arc<RequestHandle>>>,
    waiting: Mutex<HashMap<String, Vec<QueuedRequest>>>,
}

impl QueueCore {
    /// Ends a request's life in this queue: drops it from the in-flight set
    /// and, if it was the primary for its cache key, releases every parked
    /// duplicate back onto the cache queue — they will find the entry the
    /// primary just wrote.
    pub(crate) fn finish(&self, request: QueuedRequest, reason: &str) {
        debug!("finished {} seq={} ({reason})", request.cache_key, request.sequence);
        self.current
            .lock()
            .expect("request set poisoned")
            .remove(&request.sequence);
        if !request.should_cache {
            return;
        }
        let drained = self
            .waiting
            .lock()
            .expect("waiter map poisoned")
            .remove(&request.cache_key);
        if let Some(waiters) = drained {
            if !waiters.is_empty() {
                debug!(
                    "releasing {} waiters for {}",
                    waiters.len(),
                    request.cache_key
                );
            }
            for waiter in waiters {
                self.cache_queue.put(waiter);
            }
        }
    }
}

/// The request lifecycle engine.
///
/// A queue owns two priority queues and the dispatcher threads draining
/// them. Cacheable requests are triaged by the cache dispatcher against the
/// configured [`Cache`]; everything else goes straight to the network
/// worker pool. Results are decoded on the worker threads and the listeners
/// run on the configured [`DeliveryExecutor`].
///
/// ```no_run
/// use http_dispatch::{DiskCache, Request, RequestQueue, StringConverter};
///
/// let queue = RequestQueue::builder()
///     .cache(DiskCache::new("./http-cache"))
///     .build();
/// queue.start();
///
/// let url = url::Url::parse("https://example.com/feed")?;
/// queue.add(
///     Request::get(url, StringConverter)
///         .on_success(|text| println!("got {} chars", text.len()))
///         .on_error(|err| eprintln!("failed: {err}")),
/// );
/// # Ok::<(), url::ParseError>(())
/// ```
pub struct RequestQueue {
    core: Arc<QueueCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    network_threads: usize,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("network_threads", &self.network_threads)
            .finish_non_exhaustive()
    }
}

impl RequestQueue {
    /// Starts configuring a queue.
    pub fn builder() -> RequestQueueBuilder {
        RequestQueueBuilder::default()
    }

    /// Spawns the cache dispatcher and the network worker pool. Restarts
    /// from scratch if the queue was already running.
    pub fn start(&self) {
        self.stop();
        self.core.cache_queue.open();
        self.core.network_queue.open();
        let mut workers = self.workers.lock().expect("worker set poisoned");
        let core = Arc::clone(&self.core);
        workers.push(
            std::thread::Builder::new()
                .name("cache-dispatcher".into())
                .spawn(move || dispatch::cache::run(core))
                .expect("failed to spawn cache dispatcher"),
        );
        for index in 0..self.network_threads {
            let core = Arc::clone(&self.core);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("network-dispatcher-{index}"))
                    .spawn(move || dispatch::network::run(core))
                    .expect("failed to spawn network dispatcher"),
            );
        }
        debug!(
            "queue started with {} network dispatchers",
            self.network_threads
        );
    }

    /// Stops every dispatcher. Requests still queued are abandoned;
    /// in-flight transport attempts run to completion first.
    pub fn stop(&self) {
        self.core.cache_queue.close();
        self.core.network_queue.close();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().expect("worker set poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.join();
        }
    }

    /// Admits a request: assigns its sequence number and routes it to the
    /// cache or network queue. Duplicate cacheable requests already in
    /// flight are parked and replayed against the cache once the primary
    /// finishes, so at most one transport exchange runs per cache key.
    ///
    /// The returned handle is the caller's way to cancel the request later.
    pub fn add<T: Send + 'static>(
        &self,
        request: Request<T>,
    ) -> Arc<RequestHandle> {
        let sequence = self.core.sequence.fetch_add(1, Ordering::SeqCst);
        let queued = request.into_queued(sequence);
        let handle = Arc::clone(&queued.handle);
        self.core
            .current
            .lock()
            .expect("request set poisoned")
            .insert(sequence, Arc::clone(&handle));
        debug!("admitted {} seq={sequence}", queued.cache_key);

        if !queued.should_cache {
            self.core.network_queue.put(queued);
            return handle;
        }
        let mut waiting =
            self.core.waiting.lock().expect("waiter map poisoned");
        match waiting.entry(queued.cache_key.clone()) {
            Slot::Occupied(mut parked) => {
                debug!("parking duplicate of {}", queued.cache_key);
                parked.get_mut().push(queued);
            }
            Slot::Vacant(empty) => {
                empty.insert(Vec::new());
                self.core.cache_queue.put(queued);
            }
        }
        handle
    }

    /// Cancels every in-flight request carrying `tag`.
    pub fn cancel_all_with_tag(&self, tag: &str) {
        self.cancel_all_matching(|handle| handle.tag() == Some(tag));
    }

    /// Cancels every in-flight request the filter matches.
    pub fn cancel_all_matching(
        &self,
        filter: impl Fn(&RequestHandle) -> bool,
    ) {
        let current = self.core.current.lock().expect("request set poisoned");
        for handle in current.values() {
            if filter(handle) {
                handle.cancel();
            }
        }
    }

    /// The cache this queue consults.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.core.cache
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Configures and builds a [`RequestQueue`].
///
/// Unset collaborators fall back to: a [`NoCache`], a
/// [`SingleThreadExecutor`] delivery thread, no authenticator, and — with
/// the `transport-ureq` feature — a [`UreqTransport`](crate::UreqTransport)
/// sharing the queue's buffer pool.
pub struct RequestQueueBuilder {
    cache: Option<Arc<dyn Cache>>,
    transport: Option<Arc<dyn Transport>>,
    delivery: Option<Arc<dyn DeliveryExecutor>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    network_threads: usize,
    pool_bytes: usize,
    slow_threshold: Duration,
}

impl Default for RequestQueueBuilder {
    fn default() -> Self {
        Self {
            cache: None,
            transport: None,
            delivery: None,
            authenticator: None,
            network_threads: DEFAULT_NETWORK_THREADS,
            pool_bytes: DEFAULT_POOL_BYTES,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

impl std::fmt::Debug for RequestQueueBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueueBuilder")
            .field("network_threads", &self.network_threads)
            .field("pool_bytes", &self.pool_bytes)
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

impl RequestQueueBuilder {
    /// Sets the response cache.
    pub fn cache(mut self, cache: impl Cache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Sets the transport driver.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the executor listeners are invoked on.
    pub fn delivery_executor(
        mut self,
        executor: impl DeliveryExecutor,
    ) -> Self {
        self.delivery = Some(Arc::new(executor));
        self
    }

    /// Sets the bearer-token provider consulted by the network layer.
    pub fn authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Number of network dispatcher threads (default 4).
    pub fn network_threads(mut self, count: usize) -> Self {
        self.network_threads = count.max(1);
        self
    }

    /// Byte budget of the shared buffer pool (default 4096).
    pub fn buffer_pool_bytes(mut self, bytes: usize) -> Self {
        self.pool_bytes = bytes;
        self
    }

    /// Lifetime above which a completed request is logged as slow
    /// (default 3000 ms).
    pub fn slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Builds the queue. Call [`RequestQueue::start`] to spawn the
    /// dispatchers.
    ///
    /// # Panics
    ///
    /// Panics when no transport was configured and the `transport-ureq`
    /// feature is disabled.
    pub fn build(self) -> RequestQueue {
        let pool = Arc::new(BufferPool::new(self.pool_bytes));
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(pool),
        };
        let cache: Arc<dyn Cache> =
            self.cache.unwrap_or_else(|| Arc::new(NoCache));
        let delivery: Arc<dyn DeliveryExecutor> = self.delivery.unwrap_or_else(|| {
            Arc::new(SingleThreadExecutor::new())
        });
        let core = Arc::new(QueueCore {
            cache_queue: DispatchQueue::new(),
            network_queue: DispatchQueue::new(),
            cache,
            network: BasicNetwork::new(
                transport,
                self.authenticator,
                self.slow_threshold,
            ),
            delivery: ExecutorDelivery::new(delivery),
            sequence: AtomicU64::new(0),
            current: Mutex::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
        });
        RequestQueue {
            core,
            workers: Mutex::new(Vec::new()),
            network_threads: self.network_threads,
        }
    }
}

#[cfg(feature = "transport-ureq")]
fn default_transport(pool: Arc<BufferPool>) -> Arc<dyn Transport> {
    Arc::new(crate::transport::UreqTransport::new(pool))
}

#[cfg(not(feature = "transport-ureq"))]
fn default_transport(_pool: Arc<BufferPool>) -> Arc<dyn Transport> {
    panic!(
        "no transport configured; call RequestQueueBuilder::transport or \
         enable the transport-ureq feature"
    )
}
