//! CodeOps Vault HTTP surface
//!
//! Thin translation layer between the wire protocol and the core services:
//! DTOs, bearer-token middleware, error-to-status mapping, and the router.
//! The binary in `main.rs` adds configuration loading and the scheduler
//! harness on top.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
