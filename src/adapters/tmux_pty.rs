//! A `tmux send-keys`-backed `PtyAdapter` (spec §4.7, §6: `runtime` values
//! of the form `tmux:<target>`). Driving arbitrary terminal emulators is a
//! stated non-goal; this is the one concrete delivery path the binary
//! actually ships with.

use crate::adapters::pty::{DeliverOutcome, DeliverRequest, PtyAdapter};
use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

pub struct TmuxPtyAdapter;

impl TmuxPtyAdapter {
    pub fn new() -> Self {
        Self
    }

    fn target(runtime: &str) -> Option<&str> {
        runtime.strip_prefix("tmux:")
    }
}

impl Default for TmuxPtyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PtyAdapter for TmuxPtyAdapter {
    async fn deliver(&self, request: DeliverRequest) -> DeliverOutcome {
        let Some(target) = Self::target(&request.runtime) else {
            return DeliverOutcome::Failed { error_code: "TARGET_NOT_FOUND", details: None };
        };

        match Command::new("tmux").args(["has-session", "-t", target]).status().await {
            Ok(status) if status.success() => {}
            Ok(_) => return DeliverOutcome::Failed { error_code: "TARGET_NOT_FOUND", details: None },
            Err(e) => {
                return DeliverOutcome::Failed {
                    error_code: "SEND_KEYS_ERROR",
                    details: Some(json!({ "error": e.to_string() })),
                }
            }
        }

        match Command::new("tmux").args(["send-keys", "-t", target, &request.prompt, "Enter"]).status().await {
            Ok(status) if status.success() => DeliverOutcome::Delivered { details: None },
            Ok(_) => DeliverOutcome::Failed { error_code: "PANE_DEAD", details: None },
            Err(e) => DeliverOutcome::Failed {
                error_code: "SEND_KEYS_ERROR",
                details: Some(json!({ "error": e.to_string() })),
            },
        }
    }
}
