use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("KV store unavailable: {0}")]
    Unavailable(String),

    #[error("KV operation failed: {0}")]
    Operation(String),
}

/// Capability set expected from the fast shared KV.
///
/// Production wiring implements this over the platform's Redis; tests and the
/// degraded mode use [`InMemoryKv`]. Calls are synchronous by design — like
/// the SQLite layer they run on blocking threads when called from async code.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Atomic set-if-absent. Returns `true` when this caller claimed the key.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    fn delete(&self, key: &str) -> Result<(), KvError>;

    fn expire_in(&self, key: &str, ttl: Duration) -> Result<(), KvError>;
}

#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(deadline: &Option<Instant>) -> bool {
        matches!(deadline, Some(d) if *d <= Instant::now())
    }
}

impl KvStore for InMemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if let Some((_, deadline)) = entries.get(key) {
            if Self::is_expired(deadline) {
                entries.remove(key);
                return Ok(None);
            }
        }
        Ok(entries.get(key).map(|(v, _)| v.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let deadline = ttl.map(|t| Instant::now() + t);
        self.entries
            .lock()
            .expect("kv mutex poisoned")
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if let Some((_, deadline)) = entries.get(key) {
            if !Self::is_expired(deadline) {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().expect("kv mutex poisoned").remove(key);
        Ok(())
    }

    fn expire_in(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.1 = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

/// Wraps a primary KV and falls back to an in-process map when the primary
/// reports itself unavailable.
///
/// In degraded mode process-local correctness is preserved but cross-instance
/// correctness is lost; callers that care (the lock, primarily) read
/// [`FallbackKv::is_degraded`] and log accordingly.
pub struct FallbackKv {
    primary: Box<dyn KvStore>,
    local: InMemoryKv,
    degraded: AtomicBool,
}

impl FallbackKv {
    pub fn new(primary: Box<dyn KvStore>) -> Self {
        Self {
            primary,
            local: InMemoryKv::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn note_degraded(&self, op: &str, e: &KvError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(op = op, error:% = e; "KV unavailable, degrading to in-process store");
        }
    }

    fn recovered(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            warn!("KV recovered, leaving in-process degraded mode");
        }
    }
}

impl KvStore for FallbackKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.primary.get(key) {
            Ok(v) => {
                self.recovered();
                Ok(v)
            },
            Err(e @ KvError::Unavailable(_)) => {
                self.note_degraded("get", &e);
                self.local.get(key)
            },
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        match self.primary.set(key, value, ttl) {
            Ok(()) => {
                self.recovered();
                Ok(())
            },
            Err(e @ KvError::Unavailable(_)) => {
                self.note_degraded("set", &e);
                self.local.set(key, value, ttl)
            },
            Err(e) => Err(e),
        }
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        match self.primary.set_if_absent(key, value, ttl) {
            Ok(claimed) => {
                self.recovered();
                Ok(claimed)
            },
            Err(e @ KvError::Unavailable(_)) => {
                self.note_degraded("set_if_absent", &e);
                self.local.set_if_absent(key, value, ttl)
            },
            Err(e) => Err(e),
        }
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        match self.primary.delete(key) {
            Ok(()) => {
                self.recovered();
                Ok(())
            },
            Err(e @ KvError::Unavailable(_)) => {
                self.note_degraded("delete", &e);
                self.local.delete(key)
            },
            Err(e) => Err(e),
        }
    }

    fn expire_in(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        match self.primary.expire_in(key, ttl) {
            Ok(()) => {
                self.recovered();
                Ok(())
            },
            Err(e @ KvError::Unavailable(_)) => {
                self.note_degraded("expire_in", &e);
                self.local.expire_in(key, ttl)
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A primary that always reports itself down.
    struct DeadKv;

    impl KvStore for DeadKv {
        fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
            Err(KvError::Unavailable("connection refused".into()))
        }

        fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), KvError> {
            Err(KvError::Unavailable("connection refused".into()))
        }

        fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, KvError> {
            Err(KvError::Unavailable("connection refused".into()))
        }

        fn delete(&self, _key: &str) -> Result<(), KvError> {
            Err(KvError::Unavailable("connection refused".into()))
        }

        fn expire_in(&self, _key: &str, _ttl: Duration) -> Result<(), KvError> {
            Err(KvError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_in_memory_ttl_expiry() {
        let kv = InMemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(30))).unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("v"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(kv.get("k").unwrap().is_none());
    }

    #[test]
    fn test_set_if_absent_single_claimant() {
        let kv = InMemoryKv::new();
        assert!(kv.set_if_absent("nonce", "a", Duration::from_secs(60)).unwrap());
        assert!(!kv.set_if_absent("nonce", "b", Duration::from_secs(60)).unwrap());
        assert_eq!(kv.get("nonce").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_set_if_absent_reclaims_expired_key() {
        let kv = InMemoryKv::new();
        assert!(kv.set_if_absent("k", "a", Duration::from_millis(20)).unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(kv.set_if_absent("k", "b", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_fallback_degrades_and_stays_consistent() {
        let kv = FallbackKv::new(Box::new(DeadKv));
        assert!(!kv.is_degraded());

        kv.set("k", "v", None).unwrap();
        assert!(kv.is_degraded());
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("v"));

        assert!(kv.set_if_absent("lock", "token", Duration::from_secs(10)).unwrap());
        assert!(!kv.set_if_absent("lock", "other", Duration::from_secs(10)).unwrap());
    }
}
