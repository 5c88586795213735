//! Background tick loop: unread reconciliation, auto-trigger scheduling,
//! trigger queue processing, and fallback-run reconciliation (spec §4.5
//! through §4.9).

pub mod auto_trigger_scheduler;
pub mod callback;
pub mod fallback_executor;
pub mod fallback_reconciler;
pub mod runtime_executor;
pub mod supervisor;
pub mod trigger_processor;
pub mod unread_reconciler;

pub use supervisor::Supervisor;
