use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::Notify;

use crate::{CrawlError, CrawlResult};

/// A single bounded FIFO channel inside a [`Pool`].
#[derive(Debug)]
pub struct Buffer<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> Buffer<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            items: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    /// Hands the item back when the buffer is full.
    pub fn put(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn get(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

/// Why a non-blocking put did not enqueue; the item is handed back.
pub enum PutError<T> {
    Full(T),
    Closed(T),
}

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Closed(item) => item,
        }
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutError::Full(_) => f.write_str("PutError::Full(..)"),
            PutError::Closed(_) => f.write_str("PutError::Closed(..)"),
        }
    }
}

struct PoolState<T> {
    buffers: Vec<Buffer<T>>,
    total: usize,
    cursor: usize,
    closed: bool,
}

/// Bounded, closable multi-producer multi-consumer queue made of up to
/// `max_buffer_number` buffers of `buffer_cap` items each.
///
/// Buffers are added while producers outpace consumers and dropped again once
/// they drain, so an idle pool holds a single buffer. `put` waits while the
/// pool holds `buffer_cap * max_buffer_number` items; `get` waits while it is
/// empty. Both fail with a capacity error once the pool is closed.
pub struct Pool<T> {
    buffer_cap: usize,
    max_buffer_number: usize,
    state: Mutex<PoolState<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> Pool<T> {
    pub fn new(buffer_cap: u32, max_buffer_number: u32) -> CrawlResult<Self> {
        if buffer_cap == 0 {
            return Err(CrawlError::Argument("zero buffer capacity".to_string()));
        }
        if max_buffer_number == 0 {
            return Err(CrawlError::Argument("zero max buffer number".to_string()));
        }
        let buffer_cap = buffer_cap as usize;
        Ok(Self {
            buffer_cap,
            max_buffer_number: max_buffer_number as usize,
            state: Mutex::new(PoolState {
                buffers: vec![Buffer::new(buffer_cap)],
                total: 0,
                cursor: 0,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        })
    }

    pub fn buffer_cap(&self) -> usize {
        self.buffer_cap
    }

    pub fn max_buffer_number(&self) -> usize {
        self.max_buffer_number
    }

    pub fn buffer_number(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn total(&self) -> usize {
        self.state.lock().total
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ceiling(&self) -> usize {
        self.buffer_cap.saturating_mul(self.max_buffer_number)
    }

    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PutError::Closed(item));
        }
        if state.total >= self.ceiling() {
            return Err(PutError::Full(item));
        }
        let item = match state.buffers.iter_mut().find(|b| !b.is_full()) {
            Some(buffer) => buffer.put(item),
            None => {
                let mut buffer = Buffer::new(self.buffer_cap);
                let result = buffer.put(item);
                state.buffers.push(buffer);
                result
            }
        };
        match item {
            Ok(()) => {
                state.total += 1;
                drop(state);
                self.not_empty.notify_one();
                Ok(())
            }
            Err(item) => Err(PutError::Full(item)),
        }
    }

    /// Enqueues the item, waiting while the pool is at its ceiling.
    pub async fn put(&self, item: T) -> CrawlResult<()> {
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_put(item) {
                Ok(()) => return Ok(()),
                Err(PutError::Closed(_)) => {
                    return Err(CrawlError::Capacity("put into a closed pool".to_string()))
                }
                Err(PutError::Full(back)) => item = back,
            }
            notified.await;
        }
    }

    /// Dequeues an item if one is available.
    pub fn try_get(&self) -> CrawlResult<Option<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CrawlError::Capacity("get from a closed pool".to_string()));
        }
        if state.total == 0 {
            return Ok(None);
        }
        let count = state.buffers.len();
        let start = state.cursor % count;
        let mut found = None;
        for offset in 0..count {
            let index = (start + offset) % count;
            if let Some(item) = state.buffers[index].get() {
                found = Some((index, item));
                break;
            }
        }
        let Some((index, item)) = found else {
            return Ok(None);
        };
        state.total -= 1;
        if state.buffers[index].is_empty() && state.buffers.len() > 1 {
            state.buffers.remove(index);
            state.cursor = index;
        } else {
            state.cursor = index + 1;
        }
        drop(state);
        self.not_full.notify_one();
        Ok(Some(item))
    }

    /// Dequeues an item, waiting while the pool is empty.
    pub async fn get(&self) -> CrawlResult<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_get()? {
                return Ok(item);
            }
            notified.await;
        }
    }

    /// Closes the pool and wakes every waiter. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.buffers.iter_mut().for_each(|b| b.items.clear());
        state.total = 0;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        true
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Pool")
            .field("buffer_cap", &self.buffer_cap)
            .field("max_buffer_number", &self.max_buffer_number)
            .field("buffer_number", &state.buffers.len())
            .field("total", &state.total)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_new_rejects_zero() {
        assert!(Pool::<u32>::new(0, 1).is_err());
        assert!(Pool::<u32>::new(1, 0).is_err());
    }

    #[tokio::test]
    async fn test_grows_and_shrinks() {
        let pool = Pool::new(2, 3).unwrap();
        for i in 0..6 {
            pool.put(i).await.unwrap();
        }
        assert_eq!(pool.total(), 6);
        assert_eq!(pool.buffer_number(), 3);
        assert!(matches!(pool.try_put(6), Err(PutError::Full(6))));

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(pool.get().await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pool.buffer_number(), 1);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_put_waits_at_ceiling() {
        let pool = Arc::new(Pool::new(1, 1).unwrap());
        pool.put(1).await.unwrap();
        assert!(timeout(Duration::from_millis(50), pool.put(2)).await.is_err());

        let producer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.put(3).await })
        };
        assert_eq!(pool.get().await.unwrap(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(pool.get().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let pool = Arc::new(Pool::<u32>::new(4, 1).unwrap());
        let getter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.close());
        assert!(!pool.close());

        let result = timeout(Duration::from_secs(1), getter).await.unwrap().unwrap();
        assert!(matches!(result, Err(CrawlError::Capacity(_))));
        assert!(pool.put(1).await.is_err());
        assert!(matches!(pool.try_put(1), Err(PutError::Closed(1))));
    }

    #[tokio::test]
    async fn test_concurrent_producers_and_consumers() {
        let pool = Arc::new(Pool::new(5, 2).unwrap());
        let mut producers = Vec::new();
        for p in 0..4u32 {
            let pool = Arc::clone(&pool);
            producers.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    pool.put(p * 1000 + i).await.unwrap();
                }
            }));
        }
        let consumer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let mut count = 0;
                while count < 200 {
                    pool.get().await.unwrap();
                    count += 1;
                }
                count
            })
        };
        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(consumer.await.unwrap(), 200);
        assert_eq!(pool.total(), 0);
    }
}
