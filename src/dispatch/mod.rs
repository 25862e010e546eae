use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};

use log::{debug, error};

use crate::request::QueuedRequest;

pub(crate) mod cache;
pub(crate) mod network;

/// A blocking queue ordered by priority (descending), then admission
/// sequence (ascending).
///
/// `take` blocks until a request is available or the queue is closed;
/// closing wakes every blocked dispatcher immediately, even if requests
/// remain queued. A closed queue can be reopened by [`open`](Self::open)
/// before dispatchers are restarted.
pub(crate) struct DispatchQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    heap: BinaryHeap<Ranked>,
    closed: bool,
}

struct Ranked(QueuedRequest);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then earlier admission
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn put(&self, request: QueuedRequest) {
        let mut state = self.state.lock().expect("dispatch queue poisoned");
        if state.closed {
            error!(
                "queue is stopped; dropping request {}",
                request.cache_key
            );
            return;
        }
        state.heap.push(Ranked(request));
        self.available.notify_one();
    }

    pub(crate) fn take(&self) -> Option<QueuedRequest> {
        let mut state = self.state.lock().expect("dispatch queue poisoned");
        loop {
            if state.closed {
                return None;
            }
            if let Some(ranked) = state.heap.pop() {
                return Some(ranked.0);
            }
            state = self
                .available
                .wait(state)
                .expect("dispatch queue poisoned");
        }
    }

    pub(crate) fn open(&self) {
        self.state.lock().expect("dispatch queue poisoned").closed = false;
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock().expect("dispatch queue poisoned");
        state.closed = true;
        let abandoned = state.heap.len();
        if abandoned > 0 {
            debug!("queue closed with {abandoned} requests still waiting");
        }
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Priority, Request};
    use bytes::Bytes;
    use crate::transport::NetworkResponse;
    use url::Url;

    fn queued(priority: Priority, sequence: u64) -> QueuedRequest {
        let url = Url::parse("https://example.com/q").unwrap();
        Request::get(url, |r: &NetworkResponse| {
            Ok::<Bytes, crate::Error>(r.data.clone())
        })
        .with_priority(priority)
        .into_queued(sequence)
    }

    #[test]
    fn orders_by_priority_then_sequence() {
        let queue = DispatchQueue::new();
        queue.put(queued(Priority::Low, 1));
        queue.put(queued(Priority::Immediate, 4));
        queue.put(queued(Priority::Normal, 2));
        queue.put(queued(Priority::Normal, 3));

        let order: Vec<u64> =
            (0..4).map(|_| queue.take().unwrap().sequence).collect();
        assert_eq!(order, [4, 2, 3, 1]);
    }

    #[test]
    fn close_unblocks_takers() {
        let queue = std::sync::Arc::new(DispatchQueue::new());
        let taker = {
            let queue = std::sync::Arc::clone(&queue);
            std::thread::spawn(move || queue.take())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        queue.close();
        assert!(taker.join().unwrap().is_none());
    }

    #[test]
    fn closed_queue_drops_new_requests() {
        let queue = DispatchQueue::new();
        queue.close();
        queue.put(queued(Priority::Normal, 1));
        queue.open();
        // nothing was retained while closed
        queue.put(queued(Priority::Normal, 2));
        assert_eq!(queue.take().unwrap().sequence, 2);
    }
}
