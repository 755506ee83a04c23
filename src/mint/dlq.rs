use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::db::{self, SqlitePool};
use crate::models::{DlqCategory, DlqItem, TenantId};

pub const PROCESSOR_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MAX_RETRIES: i64 = 5;
const BASE_BACKOFF_MS: u64 = 30_000;
const MAX_BACKOFF_MS: u64 = 3_600_000;
const ARCHIVE_AFTER_DAYS: i64 = 7;
const BATCH_SIZE: i64 = 20;

/// Errors worth retrying: transient transport and capacity conditions.
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econnreset",
    "connection reset",
    "econnrefused",
    "socket hang up",
    "429",
    "too many requests",
    "502",
    "bad gateway",
    "503",
    "service unavailable",
    "blockhash not found",
    "blockhash expired",
    "expired blockhash",
    "node is behind",
    "rate limit",
];

/// Errors no amount of retrying will fix.
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "invalid address",
    "invalid public key",
    "insufficient funds",
    "insufficient lamports",
    "duplicate",
    "already minted",
    "already in use",
    "401",
    "unauthorized",
    "403",
    "forbidden",
    "400",
    "invalid request",
    "signature verification",
];

/// Classifies an error message against the ordered pattern sets; anything
/// matching neither is UNKNOWN and waits for a human.
pub fn classify(error: &str) -> DlqCategory {
    let lowered = error.to_lowercase();
    if RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return DlqCategory::Retryable;
    }
    if NON_RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return DlqCategory::NonRetryable;
    }
    DlqCategory::Unknown
}

/// `min(30s · 2^retry_count, 1h)` in milliseconds.
pub fn backoff_ms(retry_count: u32) -> u64 {
    BASE_BACKOFF_MS
        .saturating_mul(2u64.saturating_pow(retry_count))
        .min(MAX_BACKOFF_MS)
}

/// Re-executes a dead-lettered job. The mint orchestrator and the sync
/// consumer both implement this for their own job shapes.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn retry(&self, item: &DlqItem) -> Result<(), String>;
}

/// Write side of the dead-letter queue.
#[derive(Clone)]
pub struct DeadLetterQueue {
    db_pool: SqlitePool,
}

impl DeadLetterQueue {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Classifies and persists a failed job. RETRYABLE items get their first
    /// retry slot immediately scheduled.
    pub async fn enqueue(
        &self,
        tenant: &TenantId,
        job_id: &str,
        ticket_id: &str,
        error: &str,
        payload: Option<&str>,
    ) -> Result<DlqCategory, db::CoreDbError> {
        let category = classify(error);
        let next_retry_at = match category {
            DlqCategory::Retryable => {
                Some(Utc::now().naive_utc() + chrono::Duration::milliseconds(backoff_ms(0) as i64))
            },
            DlqCategory::NonRetryable | DlqCategory::Unknown => None,
        };

        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let job_id = job_id.to_string();
        let ticket_id = ticket_id.to_string();
        let error = error.to_string();
        let payload = payload.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::insert_dlq_item(
                &conn,
                &tenant,
                &job_id,
                &ticket_id,
                category,
                &error,
                payload.as_deref(),
                next_retry_at,
            )
        })
        .await
        .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??;

        Ok(category)
    }
}

/// Background worker executing due retries and archiving stale items.
pub struct DlqProcessor {
    db_pool: SqlitePool,
    handler: Arc<dyn RetryHandler>,
    interval: Duration,
}

impl DlqProcessor {
    pub fn new(db_pool: SqlitePool, handler: Arc<dyn RetryHandler>) -> Self {
        Self {
            db_pool,
            handler,
            interval: PROCESSOR_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("DLQ processor started.");
            // The interval lives inside this loop and is dropped with it, so
            // shutdown cancels the timer along with the task.
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.process_batch().await {
                            error!(error:% = e; "Error processing DLQ batch");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("DLQ processor received shutdown signal.");
                        break;
                    }
                }
            }
            info!("DLQ processor has shut down.");
        })
    }

    pub async fn process_batch(&self) -> Result<(), db::CoreDbError> {
        let now = Utc::now().naive_utc();

        let due = {
            let pool = self.db_pool.clone();
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                db::fetch_due_retries(&conn, now, BATCH_SIZE)
            })
            .await
            .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??
        };

        for item in due {
            self.process_item(item).await?;
        }

        // Archival pass: NON_RETRYABLE items older than a week.
        let cutoff = now - chrono::Duration::days(ARCHIVE_AFTER_DAYS);
        let pool = self.db_pool.clone();
        let archived = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            db::archive_non_retryable_older_than(&conn, cutoff)
        })
        .await
        .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??;
        if archived > 0 {
            info!(count = archived; "Archived stale DLQ items");
        }

        Ok(())
    }

    async fn process_item(&self, item: DlqItem) -> Result<(), db::CoreDbError> {
        info!(job_id = &*item.job_id, retry = item.retry_count + 1; "Retrying dead-lettered job");

        let outcome = self.handler.retry(&item).await;
        let pool = self.db_pool.clone();

        match outcome {
            Ok(()) => {
                tokio::task::spawn_blocking(move || {
                    let conn = pool.get()?;
                    db::resolve_dlq_item(&conn, item.id)
                })
                .await
                .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??;
            },
            Err(retry_error) => {
                let retry_count = item.retry_count + 1;
                if retry_count >= MAX_RETRIES {
                    tokio::task::spawn_blocking(move || {
                        let conn = pool.get()?;
                        db::promote_to_non_retryable(
                            &conn,
                            item.id,
                            &format!("{} (retries exhausted)", retry_error),
                        )
                    })
                    .await
                    .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??;
                } else {
                    let next = Utc::now().naive_utc()
                        + chrono::Duration::milliseconds(backoff_ms(retry_count as u32) as i64);
                    warn!(
                        job_id = &*item.job_id,
                        retry_count = retry_count,
                        error = &*retry_error;
                        "DLQ retry failed, rescheduling"
                    );
                    tokio::task::spawn_blocking(move || {
                        let conn = pool.get()?;
                        db::reschedule_retry(&conn, item.id, retry_count, next, &retry_error)
                    })
                    .await
                    .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??;
                }
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_classification() {
        assert_eq!(classify("ECONNRESET"), DlqCategory::Retryable);
        assert_eq!(classify("request timed out after 30s"), DlqCategory::Retryable);
        assert_eq!(classify("HTTP 503 Service Unavailable"), DlqCategory::Retryable);
        assert_eq!(classify("Blockhash expired"), DlqCategory::Retryable);

        assert_eq!(classify("insufficient funds for rent"), DlqCategory::NonRetryable);
        assert_eq!(classify("Invalid address: not base58"), DlqCategory::NonRetryable);
        assert_eq!(classify("401 Unauthorized"), DlqCategory::NonRetryable);
        assert_eq!(classify("duplicate transaction"), DlqCategory::NonRetryable);

        assert_eq!(classify("some novel failure mode"), DlqCategory::Unknown);
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_ms(0), 30_000);
        assert_eq!(backoff_ms(1), 60_000);
        assert_eq!(backoff_ms(2), 120_000);
        assert_eq!(backoff_ms(6), 1_920_000);
        // Capped at one hour.
        assert_eq!(backoff_ms(7), 3_600_000);
        assert_eq!(backoff_ms(30), 3_600_000);
    }

    struct ScriptedHandler {
        succeed: AtomicBool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RetryHandler for ScriptedHandler {
        async fn retry(&self, item: &DlqItem) -> Result<(), String> {
            self.seen.lock().unwrap().push(item.job_id.clone());
            if self.succeed.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("503 still down".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_enqueue_classifies_and_schedules() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        let dlq = DeadLetterQueue::new(pool.clone());

        let category = dlq.enqueue(&tenant, "job-1", "tk-1", "ECONNRESET", None).await.unwrap();
        assert_eq!(category, DlqCategory::Retryable);

        let category = dlq
            .enqueue(&tenant, "job-2", "tk-2", "insufficient funds", None)
            .await
            .unwrap();
        assert_eq!(category, DlqCategory::NonRetryable);

        let conn = pool.get().unwrap();
        let item = db::get_dlq_item(&conn, 1).unwrap().unwrap();
        // First retry lands ~30s out.
        let delta = item.next_retry_at.unwrap() - Utc::now().naive_utc();
        assert!((25..=35).contains(&delta.num_seconds()), "delta was {}", delta.num_seconds());

        // Non-retryable items never get a slot.
        let item = db::get_dlq_item(&conn, 2).unwrap().unwrap();
        assert!(item.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_processor_resolves_successful_retry() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            db::insert_dlq_item(
                &conn, &tenant, "job-1", "tk-1", DlqCategory::Retryable, "timeout", None,
                Some(Utc::now().naive_utc() - chrono::Duration::seconds(1)),
            )
            .unwrap();
        }

        let handler = Arc::new(ScriptedHandler {
            succeed: AtomicBool::new(true),
            seen: Mutex::new(Vec::new()),
        });
        let processor = DlqProcessor::new(pool.clone(), handler.clone());
        processor.process_batch().await.unwrap();

        assert_eq!(handler.seen.lock().unwrap().as_slice(), ["job-1"]);
        let conn = pool.get().unwrap();
        assert!(db::get_dlq_item(&conn, 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_processor_promotes_after_max_retries() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            let id = db::insert_dlq_item(
                &conn, &tenant, "job-1", "tk-1", DlqCategory::Retryable, "timeout", None,
                Some(Utc::now().naive_utc() - chrono::Duration::seconds(1)),
            )
            .unwrap();
            // Already burned four retries; the next failure is the fifth.
            db::reschedule_retry(&conn, id, 4, Utc::now().naive_utc() - chrono::Duration::seconds(1), "timeout")
                .unwrap();
        }

        let handler = Arc::new(ScriptedHandler {
            succeed: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        });
        let processor = DlqProcessor::new(pool.clone(), handler);
        processor.process_batch().await.unwrap();

        let conn = pool.get().unwrap();
        let item = db::get_dlq_item(&conn, 1).unwrap().unwrap();
        assert_eq!(item.category, DlqCategory::NonRetryable);
        assert!(item.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_processor_shutdown_cancels_timer() {
        let (pool, _dir) = test_pool();
        let handler = Arc::new(ScriptedHandler {
            succeed: AtomicBool::new(true),
            seen: Mutex::new(Vec::new()),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let processor =
            DlqProcessor::new(pool, handler).with_interval(Duration::from_millis(10));
        let handle = processor.run(shutdown_tx.subscribe());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        // The task must terminate promptly; a leaked interval would hang this.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("processor did not stop")
            .expect("processor panicked");
    }
}
