use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::infra::kv::{KvError, KvStore};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock '{0}' is held by another owner")]
    Contended(String),

    #[error("Timed out after {0:?} waiting for lock '{1}'")]
    AcquireTimeout(Duration, String),

    #[error("KV error during lock operation: {0}")]
    Kv(#[from] KvError),
}

/// Single-holder lock over the shared KV.
///
/// The stored value is a caller-unique token; release only deletes when the
/// stored token still matches, so an expired-and-reacquired lock is never
/// released by the previous holder.
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
}

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Single attempt. Returns the owner token on success.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> Result<String, LockError> {
        let token = Uuid::new_v4().to_string();
        if self.kv.set_if_absent(key, &token, ttl)? {
            debug!(key = key; "Lock acquired");
            Ok(token)
        } else {
            Err(LockError::Contended(key.to_string()))
        }
    }

    /// Polls until the lock is acquired or `timeout` elapses.
    pub async fn acquire(&self, key: &str, ttl: Duration, timeout: Duration) -> Result<String, LockError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.try_acquire(key, ttl) {
                Ok(token) => return Ok(token),
                Err(LockError::Contended(_)) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(LockError::AcquireTimeout(timeout, key.to_string()));
                    }
                    tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Releases only when `token` still owns the key.
    pub fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        match self.kv.get(key)? {
            Some(stored) if stored == token => {
                self.kv.delete(key)?;
                debug!(key = key; "Lock released");
                Ok(())
            },
            Some(_) => {
                warn!(key = key; "Refusing to release lock owned by another token");
                Ok(())
            },
            None => Ok(()),
        }
    }

    /// Extends the TTL of a lock this token still holds.
    pub fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        match self.kv.get(key)? {
            Some(stored) if stored == token => {
                self.kv.expire_in(key, ttl)?;
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::kv::InMemoryKv;

    fn lock() -> DistributedLock {
        DistributedLock::new(Arc::new(InMemoryKv::new()))
    }

    #[test]
    fn test_single_holder() {
        let lock = lock();
        let token = lock.try_acquire("mint:t-1:tk-1", Duration::from_secs(300)).unwrap();

        let err = lock.try_acquire("mint:t-1:tk-1", Duration::from_secs(300)).unwrap_err();
        assert!(matches!(err, LockError::Contended(_)));

        lock.release("mint:t-1:tk-1", &token).unwrap();
        lock.try_acquire("mint:t-1:tk-1", Duration::from_secs(300)).unwrap();
    }

    #[test]
    fn test_release_requires_matching_token() {
        let lock = lock();
        let token = lock.try_acquire("k", Duration::from_secs(300)).unwrap();

        // A stale or forged token must not free the lock.
        lock.release("k", "not-the-token").unwrap();
        assert!(matches!(
            lock.try_acquire("k", Duration::from_secs(300)),
            Err(LockError::Contended(_))
        ));

        lock.release("k", &token).unwrap();
        assert!(lock.try_acquire("k", Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn test_expired_lock_is_reacquirable() {
        let lock = lock();
        lock.try_acquire("k", Duration::from_millis(20)).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(lock.try_acquire("k", Duration::from_secs(300)).is_ok());
    }

    #[tokio::test]
    async fn test_acquire_times_out_under_contention() {
        let lock = lock();
        lock.try_acquire("k", Duration::from_secs(300)).unwrap();

        let err = lock
            .acquire("k", Duration::from_secs(300), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::AcquireTimeout(_, _)));
    }

    #[test]
    fn test_extend_only_for_owner() {
        let lock = lock();
        let token = lock.try_acquire("k", Duration::from_secs(1)).unwrap();
        assert!(lock.extend("k", &token, Duration::from_secs(300)).unwrap());
        assert!(!lock.extend("k", "other", Duration::from_secs(300)).unwrap());
    }
}
