//! Outbound HTTP clients for sibling platform services.
//!
//! Inbound routing lives in [`crate::api`]; this module owns the calls this
//! core makes to the rest of the platform, signed with the internal HMAC
//! scheme and retried with exponential backoff.

mod error;
mod internal_client;

pub use error::HttpError;
pub use internal_client::InternalServiceClient;
