use std::collections::HashSet;
use std::path::Path;

use log::{info, warn};
use thiserror::Error;

/// Program and system addresses every deployment may pay.
const BUILTIN_ADDRESSES: &[&str] = &[
    // System program.
    "11111111111111111111111111111111",
    // Compute budget program.
    "ComputeBudget111111111111111111111111111111",
    // The platform's ticket mint program.
    "TickMint1111111111111111111111111111111111",
];

#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error("Destination '{0}' is not on the treasury whitelist")]
    DestinationNotWhitelisted(String),

    #[error("Whitelist file error: {0}")]
    WhitelistLoad(#[from] std::io::Error),
}

/// Pre-transfer destination whitelist: the hardcoded program addresses plus
/// operator-curated entries loaded once at startup.
pub struct TreasuryGuard {
    whitelist: HashSet<String>,
}

impl TreasuryGuard {
    pub fn new(extra: impl IntoIterator<Item = String>) -> Self {
        let mut whitelist: HashSet<String> = BUILTIN_ADDRESSES.iter().map(|s| s.to_string()).collect();
        whitelist.extend(extra);
        Self { whitelist }
    }

    /// Startup loader: `TREASURY_WHITELIST` (comma-separated) wins over the
    /// optional whitelist file; both absent means builtins only.
    pub fn from_env_or_file(env_value: Option<&str>, file_path: Option<&Path>) -> Result<Self, TreasuryError> {
        let mut entries = Vec::new();

        if let Some(raw) = env_value {
            entries.extend(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
        } else if let Some(path) = file_path {
            let contents = std::fs::read_to_string(path)?;
            entries.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string),
            );
        }

        info!(operator_entries = entries.len(); "Treasury whitelist loaded");
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty()
    }

    /// Rejects any destination the operator has not explicitly sanctioned.
    pub fn validate_destination(&self, address: &str) -> Result<(), TreasuryError> {
        if self.whitelist.contains(address) {
            return Ok(());
        }
        warn!(
            target: "audit",
            destination = &*crate::log::mask_string(address);
            "Treasury transfer to unlisted destination blocked"
        );
        Err(TreasuryError::DestinationNotWhitelisted(address.to_string()))
    }
}
