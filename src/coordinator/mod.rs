//! Coordinator service
//!
//! Request/response binding of the registry: an axum server in front of
//! any [`crate::registry::WorkRegistry`], and a reqwest client that speaks
//! the same protocol from the worker side.

mod client;
pub mod protocol;
mod server;

pub use client::CoordinatorClient;
pub use protocol::{Answer, ClaimResponse, ErrorKind, ErrorResponse};
pub use server::{build_router, Coordinator, CoordinatorState, SWEEP_INTERVAL};
