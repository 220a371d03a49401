//! Pooled staging buffers.
use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crate::common::verbose;

/// Lock free pool of staging buffers shared by every connection.
///
/// Used to assemble BLOB segments before they become a single value.
#[derive(Debug)]
pub struct BufferPool {
    queue: ArrayQueue<BytesMut>,
    buffer_size: usize,
}

impl BufferPool {
    /// Pool keeping at most `capacity` idle buffers of `buffer_size` initial capacity.
    pub fn new(capacity: usize, buffer_size: usize) -> Arc<BufferPool> {
        Arc::new(Self { queue: ArrayQueue::new(capacity.max(1)), buffer_size })
    }

    /// Take an idle buffer, or allocate when the pool is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledBuf {
        let buf = match self.queue.pop() {
            Some(buf) => buf,
            None => {
                verbose!(size = self.buffer_size, "staging buffer allocated");
                BytesMut::with_capacity(self.buffer_size)
            }
        };
        PooledBuf { buf, pool: Arc::clone(self) }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.queue.len()
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        // full pool drops the buffer
        let _ = self.queue.push(buf);
    }
}

/// Buffer returned to its [`BufferPool`] on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new(2, 64);
        assert_eq!(pool.idle(), 0);
        {
            let mut a = pool.acquire();
            a.put_slice(b"segment");
            let _b = pool.acquire();
        }
        assert_eq!(pool.idle(), 2);
        let a = pool.acquire();
        assert!(a.is_empty());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn full_pool_drops_buffer() {
        let pool = BufferPool::new(1, 8);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
