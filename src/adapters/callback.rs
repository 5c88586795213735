//! Completion-callback delivery (spec §4.6 step 6). The data model has no
//! wire-level callback URL, so delivery is abstracted behind this trait;
//! `HttpCallbackSink` posts to the single configured `CALLBACK_URL`.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub enum CallbackOutcome {
    Delivered,
    Retry { retry_after_ms: Option<i64> },
    Failed,
}

#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn post(&self, payload: Value) -> CallbackOutcome;
}

pub struct HttpCallbackSink {
    client: reqwest::Client,
    url: String,
}

impl HttpCallbackSink {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with static config");
        Self { client, url }
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn post(&self, payload: Value) -> CallbackOutcome {
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    CallbackOutcome::Delivered
                } else if status.as_u16() == 408
                    || status.as_u16() == 409
                    || status.as_u16() == 429
                    || status.is_server_error()
                {
                    let retry_after_ms = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<i64>().ok())
                        .map(|secs| secs * 1000);
                    CallbackOutcome::Retry { retry_after_ms }
                } else {
                    CallbackOutcome::Failed
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() => CallbackOutcome::Retry { retry_after_ms: None },
            Err(_) => CallbackOutcome::Failed,
        }
    }
}
