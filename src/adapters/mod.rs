//! Adapter seams to things outside the database: PTY delivery, runtime
//! process launching, and (for tests/dev) a static bearer-token verifier.
//! Verification of real tokens against a JWKS endpoint is a Non-goal; the
//! trait here is the only thing the dispatcher depends on.

pub mod auth_verifier;
pub mod callback;
pub mod launcher;
pub mod pty;
pub mod tmux_launcher;
pub mod tmux_pty;
