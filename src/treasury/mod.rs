//! Treasury protection: a destination whitelist consulted before any
//! outgoing transfer, and a monitor watching balance and drain rates.

pub mod guard;
pub mod monitor;

pub use guard::{TreasuryError, TreasuryGuard};
pub use monitor::{LAMPORTS_PER_SOL, TreasuryAlert, TreasuryMonitor, TreasuryThresholds};
