//! Coordination core for multi-agent workspaces: threads, the append-only
//! message log, participant cursors, the session/runtime registry, and the
//! trigger job pipeline that gets a dormant participant's attention.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod ids;
pub mod metrics;
pub mod server;
pub mod store;
pub mod worker;
