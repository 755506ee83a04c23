use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrParseError {
    #[error("QR payload must have exactly four fields")]
    WrongFieldCount,

    #[error("QR timestamp is not an integer")]
    BadTimestamp,

    #[error("QR payload has an empty field")]
    EmptyField,
}

/// Parsed form of the canonical QR payload
/// `ticket_id:timestamp_ms:nonce:hex_hmac`.
#[derive(Debug, Clone)]
pub struct QrPayload {
    pub ticket_id: String,
    pub timestamp_ms: i64,
    pub nonce: String,
    pub signature_hex: String,
}

impl QrPayload {
    pub fn parse(raw: &str) -> Result<Self, QrParseError> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 {
            return Err(QrParseError::WrongFieldCount);
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(QrParseError::EmptyField);
        }

        let timestamp_ms: i64 = parts[1].parse().map_err(|_| QrParseError::BadTimestamp)?;

        Ok(Self {
            ticket_id: parts[0].to_string(),
            timestamp_ms,
            nonce: parts[2].to_string(),
            signature_hex: parts[3].to_string(),
        })
    }

    /// Whether the embedded timestamp is within the rotation window of `now`.
    /// Future-dated payloads beyond the window are just as stale.
    pub fn is_fresh(&self, now_ms: i64, rotation_window_ms: i64) -> bool {
        (now_ms - self.timestamp_ms).abs() <= rotation_window_ms
    }

    /// Constant-time verification of the HMAC-SHA256 over
    /// `ticket_id:timestamp_ms:nonce` with the ticket's per-ticket secret.
    pub fn verify_signature(&self, qr_hmac_secret: &[u8]) -> bool {
        let Ok(expected) = hex::decode(&self.signature_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(qr_hmac_secret) else {
            return false;
        };
        mac.update(self.signing_input().as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn signing_input(&self) -> String {
        format!("{}:{}:{}", self.ticket_id, self.timestamp_ms, self.nonce)
    }
}

/// Builds a well-formed payload for a ticket. Production QR generation lives
/// in the wallet service; this is used by manifests, tooling, and tests.
pub fn encode_qr(ticket_id: &str, timestamp_ms: i64, nonce: &str, qr_hmac_secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(qr_hmac_secret).expect("HMAC accepts any key length");
    mac.update(format!("{}:{}:{}", ticket_id, timestamp_ms, nonce).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("{}:{}:{}:{}", ticket_id, timestamp_ms, nonce, signature)
}
