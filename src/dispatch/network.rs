use std::sync::Arc;

use log::debug;

use crate::cache::parse_cache_headers;
use crate::delivery::Followup;
use crate::queue::QueueCore;

/// One worker of the fixed-size pool serving the network queue.
///
/// Performs the transport exchange (with retries), writes the cache entry
/// for cacheable responses, and posts the decoded result. A `304` answering
/// a revalidation whose stale data was already delivered produces no second
/// delivery.
pub(crate) fn run(core: Arc<QueueCore>) {
    debug!("network dispatcher started");
    while let Some(mut request) = core.network_queue.take() {
        if request.handle.is_canceled() {
            core.finish(request, "network-discard-canceled");
            continue;
        }
        match core.network.perform_request(&mut request) {
            Ok(response) => {
                if response.not_modified && request.handle.was_delivered() {
                    // the soft-expired delivery already covered this data
                    core.finish(request, "not-modified");
                    continue;
                }
                if request.should_cache {
                    if let Some(entry) = parse_cache_headers(&response) {
                        core.cache.put(&request.cache_key, entry);
                    }
                }
                match request.handler.respond(&response) {
                    Ok(work) => core.delivery.post_response(
                        &core,
                        request,
                        work,
                        Followup::Finish,
                    ),
                    Err(error) => {
                        core.delivery.post_error(&core, request, error)
                    }
                }
            }
            Err(error) => core.delivery.post_error(&core, request, error),
        }
    }
    debug!("network dispatcher exiting");
}
