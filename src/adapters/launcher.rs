//! Runtime process launcher seam (spec §4.8). Spawning and resuming real
//! agent runtimes is environment-specific; the fallback executor only
//! depends on this trait.

use crate::ids::{AgentId, SessionId, ThreadId};
use async_trait::async_trait;

pub enum LaunchOutcome {
    /// The launcher returned once the child pid was known (detached) or
    /// once the child exited cleanly (blocking).
    Started { pid: i32, detached: bool },
    Failed { error_code: &'static str, message: String },
}

#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    /// Resume an existing session's runtime. `session_id` identifies the
    /// process to resume.
    async fn resume(&self, agent_id: &AgentId, session_id: &SessionId) -> LaunchOutcome;

    /// Spawn a fresh runtime for `agent_id`, seeded with a thread-summary
    /// prompt so the new session has context.
    async fn spawn(&self, agent_id: &AgentId, thread_id: &ThreadId, seed_prompt: &str) -> LaunchOutcome;
}
