//! HTTP front door: the MCP-style dispatcher endpoint plus health, readiness
//! and metrics routes (spec §6).

pub mod app;
pub mod middleware;
pub mod routes;

pub use app::{build_app, AppState};
