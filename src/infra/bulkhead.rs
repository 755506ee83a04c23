use std::sync::Arc;

use log::warn;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Workload classes isolated from each other by fixed concurrency pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkheadCategory {
    Mint,
    Wallet,
    Query,
    Admin,
}

impl BulkheadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkheadCategory::Mint => "mint",
            BulkheadCategory::Wallet => "wallet",
            BulkheadCategory::Query => "query",
            BulkheadCategory::Admin => "admin",
        }
    }
}

impl std::fmt::Display for BulkheadCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub mint: usize,
    pub wallet: usize,
    pub query: usize,
    pub admin: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            mint: 10,
            wallet: 20,
            query: 50,
            admin: 5,
        }
    }
}

/// Rejection carrying the data the HTTP layer turns into `Retry-After`
/// and the `X-Bulkhead-*` headers.
#[derive(Debug, Error)]
#[error("Bulkhead '{category}' exhausted ({in_flight}/{capacity} slots in use)")]
pub struct BulkheadFull {
    pub category: BulkheadCategory,
    pub capacity: usize,
    pub in_flight: usize,
    pub retry_after_secs: u64,
}

/// Slot holder; dropping it (response completion or premature close) frees
/// the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

struct Pool {
    category: BulkheadCategory,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl Pool {
    fn new(category: BulkheadCategory, capacity: usize) -> Self {
        Self {
            category,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    fn try_acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(BulkheadPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                let in_flight = self.capacity - self.semaphore.available_permits();
                Err(BulkheadFull {
                    category: self.category,
                    capacity: self.capacity,
                    in_flight,
                    retry_after_secs: retry_after_secs(in_flight, self.capacity),
                })
            },
        }
    }
}

/// `queue_depth / capacity * 2 s`, clamped to [1, 60].
fn retry_after_secs(depth: usize, capacity: usize) -> u64 {
    let capacity = capacity.max(1) as u64;
    let estimate = (depth as u64 * 2) / capacity;
    estimate.clamp(1, 60)
}

/// Per-category concurrency caps for the request surface.
pub struct Bulkhead {
    mint: Pool,
    wallet: Pool,
    query: Pool,
    admin: Pool,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            mint: Pool::new(BulkheadCategory::Mint, config.mint),
            wallet: Pool::new(BulkheadCategory::Wallet, config.wallet),
            query: Pool::new(BulkheadCategory::Query, config.query),
            admin: Pool::new(BulkheadCategory::Admin, config.admin),
        }
    }

    fn pool(&self, category: BulkheadCategory) -> &Pool {
        match category {
            BulkheadCategory::Mint => &self.mint,
            BulkheadCategory::Wallet => &self.wallet,
            BulkheadCategory::Query => &self.query,
            BulkheadCategory::Admin => &self.admin,
        }
    }

    pub fn try_acquire(&self, category: BulkheadCategory) -> Result<BulkheadPermit, BulkheadFull> {
        let result = self.pool(category).try_acquire();
        if let Err(full) = &result {
            warn!(
                category = category.as_str(),
                in_flight = full.in_flight,
                capacity = full.capacity;
                "Bulkhead rejecting request"
            );
        }
        result
    }

    pub fn in_flight(&self, category: BulkheadCategory) -> usize {
        let pool = self.pool(category);
        pool.capacity - pool.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_release_on_drop() {
        let bulkhead = Bulkhead::new(BulkheadConfig {
            mint: 2,
            wallet: 1,
            query: 1,
            admin: 1,
        });

        let a = bulkhead.try_acquire(BulkheadCategory::Mint).unwrap();
        let _b = bulkhead.try_acquire(BulkheadCategory::Mint).unwrap();
        assert_eq!(bulkhead.in_flight(BulkheadCategory::Mint), 2);

        let full = bulkhead.try_acquire(BulkheadCategory::Mint).unwrap_err();
        assert_eq!(full.capacity, 2);
        assert_eq!(full.in_flight, 2);

        drop(a);
        assert!(bulkhead.try_acquire(BulkheadCategory::Mint).is_ok());
    }

    #[test]
    fn test_categories_are_isolated() {
        let bulkhead = Bulkhead::new(BulkheadConfig {
            mint: 1,
            wallet: 1,
            query: 1,
            admin: 1,
        });

        let _mint = bulkhead.try_acquire(BulkheadCategory::Mint).unwrap();
        assert!(bulkhead.try_acquire(BulkheadCategory::Mint).is_err());
        // Exhausting mint must not starve queries.
        assert!(bulkhead.try_acquire(BulkheadCategory::Query).is_ok());
    }

    #[test]
    fn test_retry_after_bounds() {
        assert_eq!(retry_after_secs(0, 10), 1);
        assert_eq!(retry_after_secs(10, 10), 2);
        assert_eq!(retry_after_secs(600, 10), 60);
    }
}
