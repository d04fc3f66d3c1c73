//! Byte Buffer Pool
//! 
//! Fixed-size pool of reusable `BytesMut` buffers with an explicit
//! acquire/release contract and an explicit teardown.
//!
//! A buffer handed out by [`BufferPool::acquire`] is usually filled and then
//! split off with `BytesMut::split().freeze()`. Releasing the (now empty)
//! handle returns it to the pool; the next `reserve` on it reclaims the
//! original allocation once every frozen `Bytes` view has been dropped.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Pool errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("Buffer pool exhausted ({capacity} buffers in use)")]
    Exhausted { capacity: usize },

    #[error("Buffer pool has been torn down")]
    TornDown,
}

/// Pool usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently handed out
    pub outstanding: usize,
    /// Highest number of buffers handed out at once
    pub high_water: usize,
    /// Failed acquisitions
    pub exhausted: usize,
}

/// Pool of reusable byte buffers
pub struct BufferPool {
    name: String,
    buffer_size: usize,
    capacity: usize,
    free: Mutex<Option<Vec<BytesMut>>>,
    outstanding: AtomicUsize,
    high_water: AtomicUsize,
    exhausted: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each
    pub fn new(name: impl Into<String>, capacity: usize, buffer_size: usize) -> Self {
        let free = (0..capacity)
            .map(|_| BytesMut::with_capacity(buffer_size))
            .collect();
        let name = name.into();
        debug!("Created buffer pool {}: {} x {} bytes", name, capacity, buffer_size);

        Self {
            name,
            buffer_size,
            capacity,
            free: Mutex::new(Some(free)),
            outstanding: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            exhausted: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer with at least `buffer_size` bytes of capacity
    pub fn acquire(&self) -> Result<BytesMut, PoolError> {
        let mut guard = self.free.lock();
        let free = guard.as_mut().ok_or(PoolError::TornDown)?;

        let Some(mut buf) = free.pop() else {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Exhausted { capacity: self.capacity });
        };
        drop(guard);

        buf.clear();
        buf.reserve(self.buffer_size);

        let outstanding = self.outstanding.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water.fetch_max(outstanding, Ordering::Relaxed);
        Ok(buf)
    }

    /// Give a buffer back to the pool
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut guard = self.free.lock();
        match guard.as_mut() {
            Some(free) if free.len() < self.capacity => {
                free.push(buf);
                self.outstanding.fetch_sub(1, Ordering::Relaxed);
            }
            Some(_) => warn!("Buffer pool {}: release of foreign buffer ignored", self.name),
            None => {
                self.outstanding.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Current usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding: self.outstanding.load(Ordering::Relaxed),
            high_water: self.high_water.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Free all pooled memory. Returns the number of buffers never released.
    pub fn teardown(&self) -> usize {
        self.free.lock().take();
        let leaked = self.outstanding.load(Ordering::Relaxed);
        if leaked > 0 {
            warn!("Buffer pool {} torn down with {} buffers outstanding", self.name, leaked);
        } else {
            debug!("Buffer pool {} torn down", self.name);
        }
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_acquire_release_cycle() {
        let pool = BufferPool::new("test", 2, 64);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(a.capacity() >= 64);
        assert_eq!(pool.acquire(), Err(PoolError::Exhausted { capacity: 2 }));
        assert_eq!(pool.stats().outstanding, 2);

        pool.release(a);
        pool.release(b);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.high_water, 2);
        assert_eq!(stats.exhausted, 1);
    }

    #[test]
    fn test_split_freeze_and_reuse() {
        let pool = BufferPool::new("test", 1, 16);
        let mut buf = pool.acquire().unwrap();
        buf.put_slice(b"hello");
        let frozen = buf.split().freeze();
        pool.release(buf);
        assert_eq!(&frozen[..], b"hello");

        let again = pool.acquire().unwrap();
        assert!(again.is_empty());
        assert!(again.capacity() >= 16);
    }

    #[test]
    fn test_teardown_reports_leaks() {
        let pool = BufferPool::new("test", 2, 8);
        let held = pool.acquire().unwrap();
        assert_eq!(pool.teardown(), 1);
        assert_eq!(pool.acquire(), Err(PoolError::TornDown));
        pool.release(held);
        assert_eq!(pool.stats().outstanding, 0);
    }
}
