//! Post-scan anomaly detection.
//!
//! After every ALLOW/DENY decision four heuristics run concurrently, each
//! yielding at most one finding. The findings are folded into a single risk
//! score; high scores are persisted and escalated to the log.

use chrono::{Duration, Timelike, Utc};
use log::{error, warn};

use crate::db::{self, SqlitePool};
use crate::models::{Detector, Severity, TenantId};

/// Scores above this threshold are persisted and escalated.
pub const RISK_PERSIST_THRESHOLD: u32 = 70;

const RAPID_RESCAN_WINDOW_SECS: i64 = 5;
const RAPID_RESCAN_MAX_SCANS: i64 = 3;
const MULTI_DEVICE_WINDOW_SECS: i64 = 60;
const MULTI_DEVICE_MAX_DEVICES: i64 = 2;
const PATTERN_WINDOW_MINS: i64 = 60;
const PATTERN_MIN_SCANS: i64 = 10;

/// One heuristic's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub detector: Detector,
    pub severity: Severity,
    pub details: String,
}

/// The folded outcome of one analysis pass.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u32,
    pub findings: Vec<Finding>,
}

/// `round(0.7·max + 0.3·mean)` over the findings' severity weights, capped
/// at 100.
pub fn risk_score(findings: &[Finding]) -> u32 {
    if findings.is_empty() {
        return 0;
    }
    let weights: Vec<f64> = findings.iter().map(|f| f.severity.score() as f64).collect();
    let max = weights.iter().cloned().fold(0.0_f64, f64::max);
    let mean = weights.iter().sum::<f64>() / weights.len() as f64;
    ((0.7 * max + 0.3 * mean).round() as u32).min(100)
}

/// Runs the four detectors against the scan history and records anything
/// risky enough to matter.
pub struct AnomalyDetector {
    db_pool: SqlitePool,
}

impl AnomalyDetector {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Analyzes one just-decided scan. Detector failures are logged, never
    /// propagated — anomaly detection must not break the scan path.
    pub async fn analyze(&self, tenant: &TenantId, ticket_id: &str, device_id: &str) -> Option<RiskAssessment> {
        let (rapid, multi, pattern) = tokio::join!(
            self.rapid_rescan(tenant, ticket_id),
            self.multi_device(tenant, ticket_id),
            self.denial_pattern(tenant, device_id),
        );
        let off_hours = Self::off_hours();

        let findings: Vec<Finding> = [flatten(rapid), flatten(multi), off_hours, flatten(pattern)]
            .into_iter()
            .flatten()
            .collect();

        if findings.is_empty() {
            return None;
        }

        let score = risk_score(&findings);
        let assessment = RiskAssessment {
            score,
            findings: findings.clone(),
        };

        if score > RISK_PERSIST_THRESHOLD {
            warn!(
                ticket_id = ticket_id,
                device_id = device_id,
                risk_score = score;
                "High-risk scan activity detected"
            );
            self.persist(tenant, ticket_id, device_id, score, &findings).await;
        }

        Some(assessment)
    }

    async fn persist(&self, tenant: &TenantId, ticket_id: &str, device_id: &str, score: u32, findings: &[Finding]) {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();
        let device_id = device_id.to_string();
        let findings = findings.to_vec();

        let result = tokio::task::spawn_blocking(move || -> Result<(), db::CoreDbError> {
            let conn = pool.get()?;
            for finding in &findings {
                db::insert_finding(
                    &conn,
                    &tenant,
                    &ticket_id,
                    &device_id,
                    finding.detector,
                    finding.severity,
                    score,
                    Some(&finding.details),
                )?;
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!(error:% = e; "Failed to persist anomaly findings"),
            Err(e) => error!(error:% = e; "Anomaly persistence task panicked"),
        }
    }

    /// More than three scans of the same ticket inside five seconds;
    /// critical when more than one device is involved.
    async fn rapid_rescan(&self, tenant: &TenantId, ticket_id: &str) -> Result<Option<Finding>, db::CoreDbError> {
        let (total, devices) = self
            .ticket_counts(tenant, ticket_id, Duration::seconds(RAPID_RESCAN_WINDOW_SECS))
            .await?;

        if total <= RAPID_RESCAN_MAX_SCANS {
            return Ok(None);
        }

        let severity = if devices > 1 { Severity::Critical } else { Severity::High };
        Ok(Some(Finding {
            detector: Detector::RapidRescan,
            severity,
            details: format!("{} scans in {}s across {} device(s)", total, RAPID_RESCAN_WINDOW_SECS, devices),
        }))
    }

    /// The same ticket on more than two devices inside a minute.
    async fn multi_device(&self, tenant: &TenantId, ticket_id: &str) -> Result<Option<Finding>, db::CoreDbError> {
        let (_, devices) = self
            .ticket_counts(tenant, ticket_id, Duration::seconds(MULTI_DEVICE_WINDOW_SECS))
            .await?;

        if devices <= MULTI_DEVICE_MAX_DEVICES {
            return Ok(None);
        }

        Ok(Some(Finding {
            detector: Detector::MultiDevice,
            severity: Severity::High,
            details: format!("ticket seen on {} devices within {}s", devices, MULTI_DEVICE_WINDOW_SECS),
        }))
    }

    /// Scans between 02:00 and 05:00 local time are unusual for live events.
    fn off_hours() -> Option<Finding> {
        let hour = chrono::Local::now().hour();
        if (2..5).contains(&hour) {
            Some(Finding {
                detector: Detector::OffHours,
                severity: Severity::Low,
                details: format!("scan at local hour {}", hour),
            })
        } else {
            None
        }
    }

    /// A device denying more than half of at least ten scans in the last
    /// hour.
    async fn denial_pattern(&self, tenant: &TenantId, device_id: &str) -> Result<Option<Finding>, db::CoreDbError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let device_id = device_id.to_string();

        let (total, denied) = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let since = Utc::now().naive_utc() - Duration::minutes(PATTERN_WINDOW_MINS);
            db::count_device_scans_since(&conn, &tenant, &device_id, since)
        })
        .await
        .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))??;

        if total < PATTERN_MIN_SCANS || denied * 2 <= total {
            return Ok(None);
        }

        Ok(Some(Finding {
            detector: Detector::DenialPattern,
            severity: Severity::Medium,
            details: format!("{} of {} scans denied in the last hour", denied, total),
        }))
    }

    async fn ticket_counts(
        &self,
        tenant: &TenantId,
        ticket_id: &str,
        window: Duration,
    ) -> Result<(i64, i64), db::CoreDbError> {
        let pool = self.db_pool.clone();
        let tenant = tenant.clone();
        let ticket_id = ticket_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let since = Utc::now().naive_utc() - window;
            db::count_ticket_scans_since(&conn, &tenant, &ticket_id, since)
        })
        .await
        .map_err(|e| db::CoreDbError::Unexpected(e.to_string()))?
    }
}

fn flatten(result: Result<Option<Finding>, db::CoreDbError>) -> Option<Finding> {
    match result {
        Ok(f) => f,
        Err(e) => {
            error!(error:% = e; "Anomaly detector failed");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::models::{ScanReason, ScanResult};

    #[test]
    fn test_risk_score_formula() {
        let finding = |severity| Finding {
            detector: Detector::RapidRescan,
            severity,
            details: String::new(),
        };

        assert_eq!(risk_score(&[]), 0);
        // Single high: 0.7*60 + 0.3*60 = 60.
        assert_eq!(risk_score(&[finding(Severity::High)]), 60);
        // Critical + low: 0.7*100 + 0.3*55 = 86.5 → 87 (rounded).
        assert_eq!(risk_score(&[finding(Severity::Critical), finding(Severity::Low)]), 87);
        // Capped at 100.
        assert_eq!(risk_score(&[finding(Severity::Critical), finding(Severity::Critical)]), 100);
    }

    fn burst(conn: &rusqlite::Connection, tenant: &TenantId, ticket: &str, device: &str, n: usize) {
        let now = Utc::now().naive_utc();
        for _ in 0..n {
            db::insert_scan_event(conn, tenant, ticket, device, ScanResult::Allow, ScanReason::FirstEntry, now)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_rapid_rescan_detection() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            burst(&conn, &tenant, "tk-1", "dev-1", 4);
        }

        let detector = AnomalyDetector::new(pool);
        let assessment = detector.analyze(&tenant, "tk-1", "dev-1").await.expect("expected findings");

        let rapid = assessment
            .findings
            .iter()
            .find(|f| f.detector == Detector::RapidRescan)
            .expect("rapid rescan finding missing");
        assert_eq!(rapid.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_rapid_rescan_multi_device_is_critical_and_persisted() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            burst(&conn, &tenant, "tk-1", "dev-1", 2);
            burst(&conn, &tenant, "tk-1", "dev-2", 2);
            burst(&conn, &tenant, "tk-1", "dev-3", 1);
        }

        let detector = AnomalyDetector::new(pool.clone());
        let assessment = detector.analyze(&tenant, "tk-1", "dev-1").await.expect("expected findings");

        let rapid = assessment
            .findings
            .iter()
            .find(|f| f.detector == Detector::RapidRescan)
            .expect("rapid rescan finding missing");
        assert_eq!(rapid.severity, Severity::Critical);

        // Multi-device fires as well (3 devices > 2).
        assert!(assessment.findings.iter().any(|f| f.detector == Detector::MultiDevice));
        assert!(assessment.score > RISK_PERSIST_THRESHOLD);

        let conn = pool.get().unwrap();
        let findings = db::get_findings_for_tenant(&conn, &tenant, 10).unwrap();
        assert!(!findings.is_empty());
        assert!(findings.iter().all(|f| f.risk_score == assessment.score));
    }

    #[tokio::test]
    async fn test_denial_pattern_detection() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            let now = Utc::now().naive_utc();
            // 12 scans on unique tickets so per-ticket detectors stay quiet;
            // 7 of 12 denied.
            for i in 0..12 {
                let (result, reason) = if i < 7 {
                    (ScanResult::Deny, ScanReason::InvalidQr)
                } else {
                    (ScanResult::Allow, ScanReason::FirstEntry)
                };
                db::insert_scan_event(
                    &conn, &tenant, &format!("tk-{}", i), "dev-1", result, reason,
                    now - Duration::minutes(i),
                )
                .unwrap();
            }
        }

        let detector = AnomalyDetector::new(pool);
        let assessment = detector.analyze(&tenant, "tk-0", "dev-1").await.expect("expected findings");
        let pattern = assessment
            .findings
            .iter()
            .find(|f| f.detector == Detector::DenialPattern)
            .expect("denial pattern finding missing");
        assert_eq!(pattern.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_quiet_history_yields_nothing() {
        let (pool, _dir) = test_pool();
        let tenant = TenantId::new("t-1");
        {
            let conn = pool.get().unwrap();
            let old = Utc::now().naive_utc() - Duration::hours(3);
            db::insert_scan_event(&conn, &tenant, "tk-1", "dev-1", ScanResult::Allow, ScanReason::FirstEntry, old)
                .unwrap();
        }

        let detector = AnomalyDetector::new(pool);
        let assessment = detector.analyze(&tenant, "tk-1", "dev-1").await;
        // Either nothing at all, or only the off-hours finding if the test
        // happens to run between 02:00 and 05:00 local time.
        if let Some(assessment) = assessment {
            assert!(assessment.findings.iter().all(|f| f.detector == Detector::OffHours));
        }
    }
}
