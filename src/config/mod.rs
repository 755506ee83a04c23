//! Layered configuration and startup secret validation.
//!
//! Tunables come from `config/config.toml` plus a `TURNSTILE_*` environment
//! overlay; secrets come only from the environment and are validated before
//! anything else starts. In production a missing or weak secret aborts
//! startup with one diagnostic line per problem.

mod loader;

use std::path::PathBuf;

use log::warn;
use serde::Deserialize;
use zeroize::Zeroizing;

pub use loader::{get_default_config, load_configuration, write_config_to};

const MIN_SECRET_LEN: usize = 32;

/// Secrets that must never appear in production; caught even at valid
/// lengths.
const COMMON_WEAK_SECRETS: &[&str] = &[
    "password",
    "secret",
    "changeme",
    "default",
    "00000000000000000000000000000000",
    "12345678901234567890123456789012",
    "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,
    #[serde(default = "default_rotation_window_secs")]
    pub rotation_window_secs: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_rpc_endpoints")]
    pub rpc_endpoints: Vec<String>,
    #[serde(default = "default_treasury_address")]
    pub treasury_address: String,
    #[serde(default)]
    pub treasury_webhook_url: Option<String>,
    #[serde(default)]
    pub treasury_whitelist_file: Option<PathBuf>,
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_allowed_services")]
    pub allowed_internal_services: Vec<String>,
    #[serde(default)]
    pub bulkhead: BulkheadSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkheadSettings {
    #[serde(default = "default_bulkhead_mint")]
    pub mint: usize,
    #[serde(default = "default_bulkhead_wallet")]
    pub wallet: usize,
    #[serde(default = "default_bulkhead_query")]
    pub query: usize,
    #[serde(default = "default_bulkhead_admin")]
    pub admin: usize,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            mint: default_bulkhead_mint(),
            wallet: default_bulkhead_wallet(),
            query: default_bulkhead_query(),
            admin: default_bulkhead_admin(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}
fn default_api_port() -> u16 {
    3000
}
fn default_database_file() -> PathBuf {
    PathBuf::from("data/turnstile.db")
}
fn default_rotation_window_secs() -> u64 {
    30
}
fn default_confirm_timeout_secs() -> u64 {
    60
}
fn default_commitment() -> String {
    "confirmed".to_string()
}
fn default_rpc_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:8899".to_string()]
}
fn default_treasury_address() -> String {
    "11111111111111111111111111111111".to_string()
}
fn default_callback_base_url() -> String {
    "http://127.0.0.1:4000".to_string()
}
fn default_service_name() -> String {
    "minting-service".to_string()
}
fn default_allowed_services() -> Vec<String> {
    vec!["event-service".to_string(), "payment-service".to_string()]
}
fn default_bulkhead_mint() -> usize {
    10
}
fn default_bulkhead_wallet() -> usize {
    20
}
fn default_bulkhead_query() -> usize {
    50
}
fn default_bulkhead_admin() -> usize {
    5
}

impl Settings {
    pub fn from_config(cfg: config::Config) -> anyhow::Result<Self> {
        Ok(cfg.try_deserialize()?)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Required secrets, read from the environment only. Values are zeroized on
/// drop.
pub struct Secrets {
    pub hmac_secret: Zeroizing<String>,
    pub jwt_secret: Zeroizing<String>,
    pub internal_service_secret: Zeroizing<String>,
    pub kms_key_id: String,
}

/// Validates one secret; returns a single-line diagnostic when unacceptable.
fn check_secret(name: &str, value: Option<&str>) -> Result<(), String> {
    let Some(value) = value else {
        return Err(format!("missing required secret {}", name));
    };
    if value.len() < MIN_SECRET_LEN {
        return Err(format!(
            "{} must be at least {} characters (got {})",
            name,
            MIN_SECRET_LEN,
            value.len()
        ));
    }
    let lowered = value.to_lowercase();
    if COMMON_WEAK_SECRETS.iter().any(|weak| lowered.contains(weak)) {
        return Err(format!("{} matches a known-weak pattern", name));
    }
    Ok(())
}

/// Loads and validates the required secrets.
///
/// In production every problem is fatal; the caller prints the diagnostics
/// and exits non-zero. Elsewhere problems are logged as warnings and a
/// development fallback is substituted so local runs still work.
pub fn load_secrets(production: bool) -> Result<Secrets, Vec<String>> {
    let read = |name: &str| std::env::var(name).ok();

    let mut problems = Vec::new();
    for name in ["HMAC_SECRET", "JWT_SECRET", "INTERNAL_SERVICE_SECRET"] {
        if let Err(problem) = check_secret(name, read(name).as_deref()) {
            problems.push(problem);
        }
    }
    if read("KMS_KEY_ID").map(|v| v.is_empty()).unwrap_or(true) {
        problems.push("missing required secret KMS_KEY_ID".to_string());
    }

    if !problems.is_empty() {
        if production {
            return Err(problems);
        }
        for problem in &problems {
            warn!(problem = problem.as_str(); "Secret validation problem (development fallback in use)");
        }
    }

    let fallback = |name: &str| format!("dev-only-{}-{}", name.to_lowercase(), "0".repeat(MIN_SECRET_LEN));

    Ok(Secrets {
        hmac_secret: Zeroizing::new(read("HMAC_SECRET").unwrap_or_else(|| fallback("hmac"))),
        jwt_secret: Zeroizing::new(read("JWT_SECRET").unwrap_or_else(|| fallback("jwt"))),
        internal_service_secret: Zeroizing::new(
            read("INTERNAL_SERVICE_SECRET").unwrap_or_else(|| fallback("internal")),
        ),
        kms_key_id: read("KMS_KEY_ID").unwrap_or_else(|| "dev-local-kms".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_checks() {
        assert!(check_secret("HMAC_SECRET", None).is_err());
        assert!(check_secret("HMAC_SECRET", Some("short")).is_err());
        assert!(
            check_secret("HMAC_SECRET", Some("password-padded-to-thirty-two-chars!!")).is_err(),
            "weak pattern must be rejected even at valid length"
        );
        assert!(check_secret("HMAC_SECRET", Some("dGhpcyBpcyBhIHByb3Blcmx5IHJhbmRvbSBrZXk=")).is_ok());
    }

    #[test]
    fn test_settings_defaults() {
        let cfg = config::Config::builder().build().unwrap();
        let settings = Settings::from_config(cfg).unwrap();

        assert_eq!(settings.environment, "development");
        assert!(!settings.is_production());
        assert_eq!(settings.api_port, 3000);
        assert_eq!(settings.rotation_window_secs, 30);
        assert_eq!(settings.bulkhead.mint, 10);
        assert_eq!(settings.bulkhead.query, 50);
        assert_eq!(settings.rpc_endpoints.len(), 1);
    }

    #[test]
    fn test_default_config_file_parses() {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(get_default_config(), config::FileFormat::Toml))
            .build()
            .unwrap();
        let settings = Settings::from_config(cfg).unwrap();
        assert_eq!(settings.commitment, "confirmed");
    }
}
