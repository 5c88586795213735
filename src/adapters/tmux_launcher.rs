//! Resume/spawn a per-agent tmux session (spec §4.8). The spawned window
//! runs `command_template`; resume just checks the session is still alive
//! and reads its pane pid back out so the fallback reconciler can signal it.

use crate::adapters::launcher::{LaunchOutcome, RuntimeLauncher};
use crate::ids::{AgentId, SessionId, ThreadId};
use async_trait::async_trait;
use tokio::process::Command;

pub struct TmuxLauncher {
    command_template: String,
}

impl TmuxLauncher {
    pub fn new(command_template: String) -> Self {
        Self { command_template }
    }

    fn session_name(agent_id: &AgentId) -> String {
        format!("agent-{agent_id}")
    }

    async fn pane_pid(session: &str) -> Option<i32> {
        let output = Command::new("tmux").args(["list-panes", "-t", session, "-F", "#{pane_pid}"]).output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).lines().next()?.trim().parse().ok()
    }
}

#[async_trait]
impl RuntimeLauncher for TmuxLauncher {
    async fn resume(&self, agent_id: &AgentId, session_id: &SessionId) -> LaunchOutcome {
        let session = Self::session_name(agent_id);
        match Command::new("tmux").args(["has-session", "-t", &session]).status().await {
            Ok(status) if status.success() => match Self::pane_pid(&session).await {
                Some(pid) => LaunchOutcome::Started { pid, detached: true },
                None => LaunchOutcome::Failed {
                    error_code: "RESUME_SESSION_MISSING",
                    message: format!("could not read pane pid for session {session_id}"),
                },
            },
            _ => LaunchOutcome::Failed {
                error_code: "RESUME_SESSION_MISSING",
                message: format!("no tmux session for {session_id}"),
            },
        }
    }

    async fn spawn(&self, agent_id: &AgentId, thread_id: &ThreadId, seed_prompt: &str) -> LaunchOutcome {
        let session = Self::session_name(agent_id);
        let created = Command::new("tmux").args(["new-session", "-d", "-s", &session, &self.command_template]).status().await;

        match created {
            Ok(status) if status.success() => {
                let _ = Command::new("tmux").args(["send-keys", "-t", &session, seed_prompt, "Enter"]).status().await;
                match Self::pane_pid(&session).await {
                    Some(pid) => LaunchOutcome::Started { pid, detached: true },
                    None => LaunchOutcome::Failed {
                        error_code: "SPAWN_FAILED",
                        message: "tmux session created without a discoverable pane pid".into(),
                    },
                }
            }
            _ => LaunchOutcome::Failed {
                error_code: "SPAWN_FAILED",
                message: format!("tmux new-session failed for thread {thread_id}"),
            },
        }
    }
}
