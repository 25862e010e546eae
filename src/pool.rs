use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use log::trace;

/// Default byte budget for a [`BufferPool`].
pub const DEFAULT_POOL_BYTES: usize = 4096;

/// A size-bucketed pool of reusable byte buffers.
///
/// Streaming a response body needs a small scratch buffer and a growable body
/// sink on every attempt; the pool keeps those allocations alive between
/// requests instead of churning the allocator. Buffers are stored sorted by
/// capacity, `get` hands out the smallest one that fits, and the pool trims
/// its oldest buffers first once the configured byte budget is exceeded.
///
/// The pool is safe to share between the network worker threads; a buffer is
/// owned by exactly one caller between `get` and `return_buf`.
#[derive(Debug)]
pub struct BufferPool {
    state: Mutex<PoolState>,
    max_pooled_bytes: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Pooled buffers sorted by capacity, ascending.
    by_size: Vec<(u64, Vec<u8>)>,
    /// Insertion order, oldest first. Trimming evicts from the front.
    by_age: VecDeque<u64>,
    pooled_bytes: usize,
    next_id: u64,
}

impl BufferPool {
    /// Creates a pool that retains at most `max_pooled_bytes` of buffer
    /// capacity.
    pub fn new(max_pooled_bytes: usize) -> Self {
        Self { state: Mutex::new(PoolState::default()), max_pooled_bytes }
    }

    /// Returns a buffer with capacity of at least `len`, reusing a pooled one
    /// when possible. The buffer comes back empty (`len() == 0`).
    pub fn get(&self, len: usize) -> Vec<u8> {
        let mut state = self.state.lock().expect("buffer pool poisoned");
        let idx = state.by_size.partition_point(|(_, b)| b.capacity() < len);
        if idx < state.by_size.len() {
            let (id, buf) = state.by_size.remove(idx);
            state.by_age.retain(|&aged| aged != id);
            state.pooled_bytes -= buf.capacity();
            return buf;
        }
        Vec::with_capacity(len)
    }

    /// Returns a buffer to the pool. Buffers larger than the pool budget are
    /// discarded outright; the oldest pooled buffers are evicted if the
    /// budget is exceeded afterwards.
    pub fn return_buf(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_pooled_bytes {
            return;
        }
        buf.clear();
        let mut state = self.state.lock().expect("buffer pool poisoned");
        let id = state.next_id;
        state.next_id += 1;
        let idx = state
            .by_size
            .partition_point(|(_, b)| b.capacity() <= buf.capacity());
        state.pooled_bytes += buf.capacity();
        state.by_size.insert(idx, (id, buf));
        state.by_age.push_back(id);
        while state.pooled_bytes > self.max_pooled_bytes {
            let Some(oldest) = state.by_age.pop_front() else { break };
            let Some(pos) =
                state.by_size.iter().position(|(id, _)| *id == oldest)
            else {
                break;
            };
            let (_, evicted) = state.by_size.remove(pos);
            state.pooled_bytes -= evicted.capacity();
            trace!("pool evicted buffer of {} bytes", evicted.capacity());
        }
    }

    #[cfg(test)]
    fn pooled_bytes(&self) -> usize {
        self.state.lock().unwrap().pooled_bytes
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_BYTES)
    }
}

/// A growable byte sink whose backing storage is rented from a [`BufferPool`].
///
/// On overflow the sink rents the next power-of-two sized buffer, copies the
/// accumulated bytes across, and returns the old buffer to the pool. Dropping
/// the sink returns the live buffer as well.
#[derive(Debug)]
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    buf: Option<Vec<u8>>,
}

impl PooledBuffer {
    /// Creates a sink with room for `size_hint` bytes up front.
    pub fn with_capacity(pool: Arc<BufferPool>, size_hint: usize) -> Self {
        let buf = pool.get(size_hint.max(256));
        Self { pool, buf: Some(buf) }
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Yields an independent copy of the accumulated bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    fn expand(&mut self, additional: usize) {
        let buf = self.buf.as_mut().expect("buffer already released");
        let needed = buf.len() + additional;
        if needed <= buf.capacity() {
            return;
        }
        let mut grown = self.pool.get(needed.next_power_of_two());
        grown.extend_from_slice(buf);
        let old = std::mem::replace(buf, grown);
        self.pool.return_buf(old);
    }
}

impl Write for PooledBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.expand(data.len());
        self.buf
            .as_mut()
            .expect("buffer already released")
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.return_buf(buf);
        }
    }
}
