use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::chain::rpc::ChainRpc;
use crate::chain::types::ChainError;

pub const DEFAULT_MAX_FAILURES: u32 = 3;
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const RETRY_SPACING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub healthy: bool,
    pub latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_check: Option<Instant>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            latency: None,
            consecutive_failures: 0,
            last_check: None,
        }
    }
}

struct Endpoint {
    name: String,
    rpc: Arc<dyn ChainRpc>,
    health: Mutex<EndpointHealth>,
}

/// Ordered set of RPC endpoints with per-endpoint health tracking.
///
/// Requests go to the first healthy endpoint; repeated failures mark an
/// endpoint unhealthy until the background probe sees it answer again. When
/// every endpoint is unhealthy the primary is still attempted rather than
/// failing outright.
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    max_failures: u32,
    retry_spacing: Duration,
    rotations: AtomicUsize,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<(String, Arc<dyn ChainRpc>)>) -> Self {
        Self::with_config(endpoints, DEFAULT_MAX_FAILURES, RETRY_SPACING)
    }

    pub fn with_config(
        endpoints: Vec<(String, Arc<dyn ChainRpc>)>,
        max_failures: u32,
        retry_spacing: Duration,
    ) -> Self {
        assert!(!endpoints.is_empty(), "EndpointPool requires at least one endpoint");
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|(name, rpc)| Endpoint {
                    name,
                    rpc,
                    health: Mutex::new(EndpointHealth::default()),
                })
                .collect(),
            max_failures,
            retry_spacing,
            rotations: AtomicUsize::new(0),
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn rotation_count(&self) -> usize {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn health_of(&self, index: usize) -> EndpointHealth {
        self.endpoints[index].health.lock().expect("health mutex poisoned").clone()
    }

    /// Index of the endpoint the next request should use: first healthy, or
    /// the primary when none are.
    fn pick(&self) -> usize {
        self.endpoints
            .iter()
            .position(|e| e.health.lock().expect("health mutex poisoned").healthy)
            .unwrap_or(0)
    }

    fn record_success(&self, index: usize, latency: Duration) {
        let mut health = self.endpoints[index].health.lock().expect("health mutex poisoned");
        if !health.healthy {
            info!(endpoint = &*self.endpoints[index].name; "RPC endpoint recovered");
        }
        health.healthy = true;
        health.consecutive_failures = 0;
        health.latency = Some(latency);
        health.last_check = Some(Instant::now());
    }

    fn record_failure(&self, index: usize) {
        let mut health = self.endpoints[index].health.lock().expect("health mutex poisoned");
        health.consecutive_failures += 1;
        health.last_check = Some(Instant::now());
        if health.healthy && health.consecutive_failures >= self.max_failures {
            warn!(
                endpoint = &*self.endpoints[index].name,
                failures = health.consecutive_failures;
                "RPC endpoint marked unhealthy"
            );
            health.healthy = false;
        }
    }

    /// Runs `op` against the pool, rotating to the next endpoint on failure.
    /// Tries at most `endpoint_count()` endpoints with spacing between
    /// attempts, and surfaces the last error when everything failed.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, ChainError>
    where
        F: FnMut(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut last_error: Option<ChainError> = None;
        let start_index = self.pick();

        for attempt in 0..self.endpoints.len() {
            let index = (start_index + attempt) % self.endpoints.len();
            if attempt > 0 {
                self.rotations.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(self.retry_spacing).await;
            }

            let started = Instant::now();
            match op(self.endpoints[index].rpc.clone()).await {
                Ok(value) => {
                    self.record_success(index, started.elapsed());
                    return Ok(value);
                },
                Err(e) => {
                    debug!(endpoint = &*self.endpoints[index].name, error:% = e; "RPC attempt failed");
                    self.record_failure(index);
                    last_error = Some(e);
                },
            }
        }

        Err(ChainError::AllEndpointsFailed(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "no endpoints".to_string()),
        ))
    }

    /// One probing pass: a cheap read against every endpoint; success resets
    /// its failure counters.
    pub async fn probe_all(&self) {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let started = Instant::now();
            match endpoint.rpc.get_slot().await {
                Ok(_) => self.record_success(index, started.elapsed()),
                Err(e) => {
                    debug!(endpoint = &*endpoint.name, error:% = e; "Health probe failed");
                    self.record_failure(index);
                },
            }
        }
    }

    /// Background prober in the shared worker shape: a fixed interval tick
    /// racing a shutdown signal.
    pub fn run_prober(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("RPC endpoint prober started.");
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.probe_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("RPC endpoint prober received shutdown signal.");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::rpc::MockChain;

    fn pool_of(chains: Vec<Arc<MockChain>>) -> EndpointPool {
        let endpoints = chains
            .into_iter()
            .enumerate()
            .map(|(i, c)| (format!("rpc-{}", i), c as Arc<dyn ChainRpc>))
            .collect();
        EndpointPool::with_config(endpoints, 3, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_rotation_on_failure() {
        let primary = Arc::new(MockChain::new());
        let backup = Arc::new(MockChain::new());
        primary.fail_all(true);

        let pool = pool_of(vec![primary.clone(), backup]);
        let slot = pool.execute(|rpc| async move { rpc.get_slot().await }).await.unwrap();
        assert!(slot > 0);
        assert_eq!(pool.rotation_count(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_after_max_failures_then_recovery() {
        let primary = Arc::new(MockChain::new());
        let backup = Arc::new(MockChain::new());
        primary.fail_all(true);

        let pool = pool_of(vec![primary.clone(), backup]);
        for _ in 0..3 {
            pool.execute(|rpc| async move { rpc.get_slot().await }).await.unwrap();
        }
        assert!(!pool.health_of(0).healthy);

        // Once unhealthy, requests start at the backup without rotating.
        let before = pool.rotation_count();
        pool.execute(|rpc| async move { rpc.get_slot().await }).await.unwrap();
        assert_eq!(pool.rotation_count(), before);

        // The probe brings the primary back.
        primary.fail_all(false);
        pool.probe_all().await;
        assert!(pool.health_of(0).healthy);
        assert_eq!(pool.health_of(0).consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_all_unhealthy_still_attempts_primary() {
        let only = Arc::new(MockChain::new());
        only.fail_all(true);
        let pool = pool_of(vec![only.clone()]);

        for _ in 0..4 {
            let _ = pool.execute(|rpc| async move { rpc.get_slot().await }).await;
        }
        assert!(!pool.health_of(0).healthy);

        // The primary is attempted anyway, and succeeds once it is back.
        only.fail_all(false);
        let slot = pool.execute(|rpc| async move { rpc.get_slot().await }).await.unwrap();
        assert!(slot > 0);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let a = Arc::new(MockChain::new());
        let b = Arc::new(MockChain::new());
        a.fail_all(true);
        b.fail_all(true);

        let pool = pool_of(vec![a, b]);
        let err = pool.execute(|rpc| async move { rpc.get_slot().await }).await.unwrap_err();
        assert!(matches!(err, ChainError::AllEndpointsFailed(_)));
    }
}
