//! Completion callback delivery (spec §4.6 step 6): post a synthesized
//! event message, then deliver the completion callback and map its
//! outcome onto the job's next status.

use crate::adapters::callback::{CallbackOutcome, CallbackSink};
use crate::config::Config;
use crate::domain::message::{normalize_metadata, MessageKind, PostMessagePayload};
use crate::domain::trigger::TriggerJob;
use crate::ids::MessageId;
use crate::store::Stores;
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub enum CallbackStepOutcome {
    Delivered,
    Retry { next_retry_at: chrono::DateTime<Utc> },
    Failed,
}

pub struct CallbackWorker {
    stores: Stores,
    sink: Option<Arc<dyn CallbackSink>>,
    config: Arc<Config>,
}

impl CallbackWorker {
    pub fn new(stores: Stores, sink: Option<Arc<dyn CallbackSink>>, config: Arc<Config>) -> Self {
        Self { stores, sink, config }
    }

    pub async fn run(&self, job: &TriggerJob, event_type: &'static str) -> Result<CallbackStepOutcome> {
        let metadata = normalize_metadata(
            MessageKind::Event,
            json!({ "event_type": event_type, "trigger_id": job.trigger_id, "suppress_auto_trigger": true }),
        )
        .expect("event_type is always present above");

        let payload = PostMessagePayload {
            schema_version: 1,
            kind: MessageKind::Event,
            body: json!({ "trigger_id": job.trigger_id, "target_agent_id": job.target_agent_id, "status": job.status.as_str() }),
            metadata,
            in_reply_to: None,
        };

        let message_id = MessageId(format!("msg_{}", Uuid::new_v4().simple()));
        let latest_seq = self.stores.messages.latest_seq(&job.thread_id).await?;
        let now = Utc::now();
        self.stores
            .messages
            .try_insert(&message_id, &job.thread_id, latest_seq + 1, &job.target_agent_id, None, &payload, None, now)
            .await?;

        let Some(sink) = &self.sink else {
            return Ok(CallbackStepOutcome::Delivered);
        };

        let callback_payload = json!({
            "trigger_id": job.trigger_id,
            "thread_id": job.thread_id,
            "target_agent_id": job.target_agent_id,
            "event_type": event_type,
            "status": job.status.as_str(),
        });

        match sink.post(callback_payload).await {
            CallbackOutcome::Delivered => Ok(CallbackStepOutcome::Delivered),
            CallbackOutcome::Retry { retry_after_ms } => {
                let delay_ms = retry_after_ms.unwrap_or_else(|| {
                    crate::domain::trigger::compute_backoff_ms(self.config.backoff_base_ms, job.attempts + 1, self.config.max_backoff_ms)
                });
                Ok(CallbackStepOutcome::Retry { next_retry_at: now + chrono::Duration::milliseconds(delay_ms) })
            }
            CallbackOutcome::Failed => Ok(CallbackStepOutcome::Failed),
        }
    }
}
