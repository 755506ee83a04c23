use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use hmac::{Hmac, Mac};
use log::warn;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const MAX_DRIFT_MS: i64 = 60_000;

#[derive(Debug, Error)]
pub enum InternalAuthError {
    #[error("Service '{0}' is not on the internal allow-list")]
    UnknownService(String),

    #[error("Timestamp drift {0} ms exceeds the permitted window")]
    ExcessiveDrift(i64),

    #[error("Invalid timestamp: {0}")]
    BadTimestamp(String),

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Signing error: {0}")]
    Signing(String),
}

/// Header triple carried on every internal service-to-service call.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub service: String,
    pub timestamp_ms: i64,
    pub signature: String,
}

/// Rolling histogram of observed clock drift between services, in fixed
/// millisecond buckets. Cheap enough to sit behind a mutex on the hot path.
#[derive(Debug, Default)]
pub struct DriftHistogram {
    buckets: [u64; 6],
}

impl DriftHistogram {
    const BOUNDS_MS: [i64; 5] = [1_000, 5_000, 15_000, 30_000, 60_000];

    pub fn record(&mut self, drift_ms: i64) {
        let drift = drift_ms.abs();
        let idx = Self::BOUNDS_MS.iter().position(|&b| drift < b).unwrap_or(5);
        self.buckets[idx] += 1;
    }

    pub fn snapshot(&self) -> [u64; 6] {
        self.buckets
    }
}

/// HMAC-SHA256 authenticator for internal RPC.
///
/// Signature input is `service:timestamp:body_json`; verification rejects
/// unknown services and stale timestamps before touching the MAC, and the MAC
/// comparison itself is constant-time.
pub struct InternalAuth {
    secret: Vec<u8>,
    allowed_services: HashSet<String>,
    drift: Mutex<DriftHistogram>,
}

impl InternalAuth {
    pub fn new(secret: &str, allowed_services: impl IntoIterator<Item = String>) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            allowed_services: allowed_services.into_iter().collect(),
            drift: Mutex::new(DriftHistogram::default()),
        }
    }

    fn mac(&self) -> Result<HmacSha256, InternalAuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| InternalAuthError::Signing("invalid key length".into()))
    }

    /// Produces the header triple for an outbound call.
    pub fn sign(&self, service: &str, body_json: &str) -> Result<SignedHeaders, InternalAuthError> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let signature = self.compute(service, timestamp_ms, body_json)?;
        Ok(SignedHeaders {
            service: service.to_string(),
            timestamp_ms,
            signature,
        })
    }

    fn compute(&self, service: &str, timestamp_ms: i64, body_json: &str) -> Result<String, InternalAuthError> {
        let mut mac = self.mac()?;
        mac.update(format!("{}:{}:{}", service, timestamp_ms, body_json).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verifies an inbound header triple against the request body.
    pub fn verify(&self, headers: &SignedHeaders, body_json: &str) -> Result<(), InternalAuthError> {
        if !self.allowed_services.contains(&headers.service) {
            warn!(target: "audit", service = &*headers.service; "Internal call from unlisted service");
            return Err(InternalAuthError::UnknownService(headers.service.clone()));
        }

        let drift_ms = Utc::now().timestamp_millis() - headers.timestamp_ms;
        self.drift.lock().expect("drift mutex poisoned").record(drift_ms);
        if drift_ms.abs() > MAX_DRIFT_MS {
            warn!(
                target: "audit",
                service = &*headers.service,
                drift_ms = drift_ms;
                "Internal call outside timestamp window"
            );
            return Err(InternalAuthError::ExcessiveDrift(drift_ms));
        }

        let expected = hex::decode(&headers.signature).map_err(|_| InternalAuthError::BadSignature)?;
        let mut mac = self.mac()?;
        mac.update(format!("{}:{}:{}", headers.service, headers.timestamp_ms, body_json).as_bytes());
        mac.verify_slice(&expected).map_err(|_| {
            warn!(target: "audit", service = &*headers.service; "Internal call signature mismatch");
            InternalAuthError::BadSignature
        })
    }

    pub fn drift_snapshot(&self) -> [u64; 6] {
        self.drift.lock().expect("drift mutex poisoned").snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> InternalAuth {
        InternalAuth::new(
            "an-internal-secret-of-decent-length",
            ["minting-service".to_string(), "event-service".to_string()],
        )
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let auth = auth();
        let body = r#"{"event_id":"ev-1","status":"completed"}"#;

        let headers = auth.sign("minting-service", body).unwrap();
        auth.verify(&headers, body).unwrap();
    }

    #[test]
    fn test_tampered_body_rejected() {
        let auth = auth();
        let headers = auth.sign("minting-service", r#"{"a":1}"#).unwrap();

        let err = auth.verify(&headers, r#"{"a":2}"#).unwrap_err();
        assert!(matches!(err, InternalAuthError::BadSignature));
    }

    #[test]
    fn test_unknown_service_rejected() {
        let auth = auth();
        let headers = auth.sign("rogue-service", "{}").unwrap();

        let err = auth.verify(&headers, "{}").unwrap_err();
        assert!(matches!(err, InternalAuthError::UnknownService(_)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let auth = auth();
        let body = "{}";
        let stale_ts = Utc::now().timestamp_millis() - 120_000;

        let mut mac = HmacSha256::new_from_slice(b"an-internal-secret-of-decent-length").unwrap();
        mac.update(format!("minting-service:{}:{}", stale_ts, body).as_bytes());
        let headers = SignedHeaders {
            service: "minting-service".to_string(),
            timestamp_ms: stale_ts,
            signature: hex::encode(mac.finalize().into_bytes()),
        };

        let err = auth.verify(&headers, body).unwrap_err();
        assert!(matches!(err, InternalAuthError::ExcessiveDrift(_)));
    }

    #[test]
    fn test_drift_histogram_buckets() {
        let mut histogram = DriftHistogram::default();
        histogram.record(100);
        histogram.record(-3_000);
        histogram.record(20_000);
        histogram.record(500_000);

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot[0], 1);
        assert_eq!(snapshot[1], 1);
        assert_eq!(snapshot[3], 1);
        assert_eq!(snapshot[5], 1);
    }
}
