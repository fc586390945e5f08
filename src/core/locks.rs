//! Per-product mutation locks.
//!
//! Every stock read-modify-write for a product runs while holding that
//! product's lock, so two mutations of the same product are serialized while
//! mutations of different products proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of async locks keyed by product id. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ProductLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl ProductLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock of `product_id`. Released when the guard drops.
    ///
    /// Entries nobody holds or waits on are dropped first, so the registry only
    /// tracks products with a mutation in flight.
    pub async fn acquire(&self, product_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(product_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of products currently tracked by the registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when the registry tracks no product.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_product_is_exclusive() {
        let locks = ProductLocks::new();
        let guard = locks.acquire(1).await;

        let contended = tokio::time::timeout(Duration::from_millis(20), locks.acquire(1)).await;
        assert!(contended.is_err());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(20), locks.acquire(1)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_products_do_not_block() {
        let locks = ProductLocks::new();
        let _first = locks.acquire(1).await;

        let other = tokio::time::timeout(Duration::from_millis(20), locks.acquire(2)).await;
        assert!(other.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_locks_are_evicted() {
        let locks = ProductLocks::new();
        for product_id in 1..=50 {
            drop(locks.acquire(product_id).await);
        }
        // Only the most recently taken entry survives the last sweep of the map.
        assert_eq!(locks.len(), 1);

        let held = locks.acquire(7).await;
        drop(locks.acquire(8).await);
        assert_eq!(locks.len(), 2);

        drop(held);
        drop(locks.acquire(9).await);
        assert_eq!(locks.len(), 1);
    }
}
