use std::sync::Arc;

use log::debug;

use crate::cache::epoch_millis;
use crate::delivery::Followup;
use crate::queue::QueueCore;

/// The single thread serving the cache queue.
///
/// Triages every cacheable request: fresh entries are decoded and delivered
/// without touching the network; entries past their soft expiry are
/// delivered immediately *and* requeued for revalidation once the listener
/// has run; expired entries and misses fall through to the network queue
/// (an expired entry still rides along for its validators).
pub(crate) fn run(core: Arc<QueueCore>) {
    debug!("cache dispatcher started");
    core.cache.initialize();
    while let Some(mut request) = core.cache_queue.take() {
        if request.handle.is_canceled() {
            core.finish(request, "cache-discard-canceled");
            continue;
        }
        let Some(entry) = core.cache.get(&request.cache_key) else {
            debug!("cache miss for {}", request.cache_key);
            core.network_queue.put(request);
            continue;
        };
        let now = epoch_millis();
        if entry.is_expired(now) {
            debug!("cache entry expired for {}", request.cache_key);
            request.cache_entry = Some(entry);
            core.network_queue.put(request);
            continue;
        }

        let response = entry.to_response();
        match request.handler.respond(&response) {
            Err(error) => core.delivery.post_error(&core, request, error),
            Ok(work) => {
                if !entry.needs_refresh(now) {
                    debug!("cache hit for {}", request.cache_key);
                    core.delivery.post_response(
                        &core,
                        request,
                        work,
                        Followup::Finish,
                    );
                } else {
                    // serve the stale copy now, revalidate right after
                    debug!("cache hit needs refresh for {}", request.cache_key);
                    request.cache_entry = Some(entry);
                    core.delivery.post_response(
                        &core,
                        request,
                        work,
                        Followup::Revalidate,
                    );
                }
            }
        }
    }
    debug!("cache dispatcher exiting");
}
