//! Fixed-size client pool with bounded acquisition.
//!
//! Borrowed handles are returned on every exit path via the RAII guard;
//! acquisition past the bound surfaces as a transient error so callers
//! retry rather than queue unboundedly.

use crate::error::{ClientError, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default number of pooled handles.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default bound on pool acquisition.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// A fixed-size pool of client handles.
#[derive(Debug)]
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    semaphore: Semaphore,
    acquire_timeout: Duration,
}

impl<T> Pool<T> {
    /// Build a pool over pre-constructed handles.
    pub fn new(items: Vec<T>, acquire_timeout: Duration) -> Self {
        let permits = items.len();
        Pool {
            items: Mutex::new(items),
            semaphore: Semaphore::new(permits),
            acquire_timeout,
        }
    }

    /// Borrow a handle, waiting at most the configured bound.
    pub async fn acquire(&self) -> Result<PoolGuard<'_, T>> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| ClientError::PoolTimeout(self.acquire_timeout))?
            .map_err(|_| ClientError::other("pool closed"))?;
        permit.forget();

        let item = {
            let mut items = self.items.lock().expect("pool mutex poisoned");
            items.pop().expect("pool invariant: permit implies an item")
        };

        Ok(PoolGuard {
            pool: self,
            item: Some(item),
        })
    }

    fn release(&self, item: T) {
        self.items.lock().expect("pool mutex poisoned").push(item);
        self.semaphore.add_permits(1);
    }
}

/// RAII borrow of a pooled handle.
#[derive(Debug)]
pub struct PoolGuard<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> std::ops::Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pool item taken")
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = Pool::new(vec![1u32, 2], Duration::from_millis(100));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(*a, *b);

        drop(a);
        let c = pool.acquire().await.unwrap();
        assert!(*c == 1 || *c == 2);
    }

    #[tokio::test]
    async fn test_exhaustion_times_out_as_transient() {
        let pool = Pool::new(vec![1u32], Duration::from_millis(20));

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ClientError::PoolTimeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_release_on_drop_unblocks_waiter() {
        let pool = std::sync::Arc::new(Pool::new(vec![1u32], Duration::from_secs(1)));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|g| *g) })
        };

        tokio::task::yield_now().await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
    }
}
