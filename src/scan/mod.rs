//! Scan validation: the per-scan decision engine and its supporting pieces.
//!
//! # Architecture Overview
//!
//! - **[`ScanDecider`]**: The main entry point. One call runs QR verification,
//!   tenant/venue isolation, ticket-state and temporal checks, zone policy,
//!   and the duplicate/re-entry rules inside a single database transaction,
//!   persisting a scan event on every path.
//!
//! - **[`QrPayload`]**: Parsing and constant-time HMAC verification of the
//!   canonical `ticket_id:timestamp_ms:nonce:hex_hmac` payload.
//!
//! - **[`NonceRegistry`]**: Replay protection over the shared KV; the first
//!   claimant of a nonce wins, everyone else is a replay.
//!
//! - **Policy evaluation**: The [`policy`] submodule turns a ticket, its most
//!   recent admitted scan, and the event's re-entry policy into a verdict.
//!
//! - **[`ManifestBuilder`]**: Offline manifests for scanners that must keep
//!   working without a backend connection, with time-boxed HMAC tokens.
//!
//! # Decision Ordering
//!
//! Rules run in a fixed order and the first failure is terminal: payload
//! parse, rotation window, nonce, device, staff isolation, ticket lookup
//! (cross-tenant hits are masked as not-found), venue, QR signature, ticket
//! state, event and ticket validity windows, zone, duplicate/re-entry.

pub mod decider;
pub mod manifest;
pub mod nonce;
pub mod policy;
pub mod qr;
pub mod types;

pub use decider::{DEFAULT_ROTATION_WINDOW, ScanDecider};
pub use manifest::{ManifestBuilder, ManifestEntry, ManifestError, OfflineManifest};
pub use nonce::NonceRegistry;
pub use qr::{QrPayload, QrParseError, encode_qr};
pub use types::{ScanDecision, TicketSummary};
