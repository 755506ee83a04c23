//! Chain adapter: everything between the mint pipeline and the chain's RPC
//! surface.
//!
//! - [`ChainRpc`] is the opaque endpoint contract; [`HttpChainClient`] speaks
//!   JSON-RPC with retrying middleware, [`MockChain`] is the scriptable
//!   in-memory fake the tests drive.
//! - [`EndpointPool`] fails over across an ordered endpoint list with health
//!   tracking and a background probe.
//! - [`fees`] turns simulations and the recent fee market into a compute
//!   budget and priority fee.
//! - [`ChainAdapter`] composes the above into estimate/build/submit/confirm
//!   plus the balance and signature-status reads other modules need.

pub mod adapter;
pub mod client;
pub mod failover;
pub mod fees;
pub mod rpc;
pub mod types;

pub use adapter::{ChainAdapter, ChainAdapterConfig};
pub use client::HttpChainClient;
pub use failover::{EndpointHealth, EndpointPool};
pub use rpc::{ChainRpc, MockChain};
pub use types::{
    BuiltTransaction, ChainError, ChainInstruction, Commitment, FeeEstimate, SignatureStatus,
    SignedTransaction, SimulationResult, Urgency,
};
