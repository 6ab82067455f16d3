//! Byte-buffer pools for the proxy loops
//!
//! The copy brokers run one read/write per iteration for the lifetime of a
//! flow; buffers are checked out once per broker and returned when the
//! guard drops.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Buffer size for TCP copy brokers.
pub const TCP_BUFFER_SIZE: usize = 32 * 1024;

/// Buffer size for UDP copy brokers: a maximum datagram plus its 2-byte
/// length prefix.
pub const UDP_BUFFER_SIZE: usize = 65536 + 2;

/// A pool of fixed-size byte buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `size` bytes.
    pub fn new(size: usize) -> Self {
        BufferPool {
            inner: Arc::new(Inner {
                size,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Check out a buffer; allocates when the free list is empty.
    pub fn get(&self) -> PooledBuf {
        let buf = self
            .inner
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.size]);
        PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A checked-out buffer; returns itself to the pool on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<Inner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_ref().unwrap()
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().unwrap()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().unwrap().push(buf);
        }
    }
}
