//! Configuration loaded from environment variables (spec §6 configuration
//! table). Every tunable the dispatcher/worker consult lives here so a
//! deployment can override it without a code change.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub workspace_id: String,
    pub database_url: String,
    pub auth_issuer: String,
    pub auth_audience: String,
    pub auth_jwks_url: String,
    pub callback_url: Option<String>,

    pub session_stale_after_hours: i64,
    pub trigger_max_retries: i32,
    pub post_message_max_attempts: u32,

    pub supervisor_tick_interval_ms: u64,
    pub max_jobs_per_tick: i64,

    pub unread_max_triggers_per_window: i64,
    pub unread_window_ms: i64,
    pub unread_min_interval_ms: i64,
    pub breaker_backlog_threshold: i64,
    pub breaker_cooldown_ms: i64,

    pub quiet_window_ms: i64,
    pub recheck_ms: i64,
    pub max_defer_ms: i64,

    pub lease_timeout_ms: i64,
    pub executor_timeout_ms: i64,
    pub backoff_base_ms: i64,
    pub max_backoff_ms: i64,
    pub rate_limit_per_minute: i64,
    pub loop_max_turns: i64,
    pub loop_max_repeated_findings: i64,
    pub callback_max_attempts: i32,

    pub crash_loop_threshold: i64,
    pub crash_loop_window_ms: i64,
    pub resume_max_attempts: i32,
    pub fallback_deadline_ms: i64,
    pub grace_ms: u64,
    pub orphan_grace_ms: i64,

    pub pty_max_payload_bytes: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env_or("API_PORT", 8080u16)?,
            workspace_id: env::var("WORKSPACE_ID").context("WORKSPACE_ID must be set")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            auth_issuer: env::var("AUTH_ISSUER").context("AUTH_ISSUER must be set")?,
            auth_audience: env::var("AUTH_AUDIENCE").context("AUTH_AUDIENCE must be set")?,
            auth_jwks_url: env::var("AUTH_JWKS_URL").context("AUTH_JWKS_URL must be set")?,
            callback_url: env::var("CALLBACK_URL").ok(),

            session_stale_after_hours: env_or("SESSION_STALE_AFTER_HOURS", 12)?,
            trigger_max_retries: env_or("TRIGGER_MAX_RETRIES", 2)?,
            post_message_max_attempts: env_or("POST_MESSAGE_MAX_ATTEMPTS", 3)?,

            supervisor_tick_interval_ms: env_or("SUPERVISOR_TICK_INTERVAL_MS", 5_000)?,
            max_jobs_per_tick: env_or("MAX_JOBS_PER_TICK", 25)?,

            unread_max_triggers_per_window: env_or("UNREAD_MAX_TRIGGERS_PER_WINDOW", 3)?,
            unread_window_ms: env_or("UNREAD_WINDOW_MS", 5 * 60_000)?,
            unread_min_interval_ms: env_or("UNREAD_MIN_INTERVAL_MS", 30_000)?,
            breaker_backlog_threshold: env_or("BREAKER_BACKLOG_THRESHOLD", 50)?,
            breaker_cooldown_ms: env_or("BREAKER_COOLDOWN_MS", 60_000)?,

            quiet_window_ms: env_or("QUIET_WINDOW_MS", 20_000)?,
            recheck_ms: env_or("RECHECK_MS", 5_000)?,
            max_defer_ms: env_or("MAX_DEFER_MS", 60_000)?,

            lease_timeout_ms: env_or("LEASE_TIMEOUT_MS", 45_000)?,
            executor_timeout_ms: env_or("EXECUTOR_TIMEOUT_MS", 60_000)?,
            backoff_base_ms: env_or("BACKOFF_BASE_MS", 2_000)?,
            max_backoff_ms: env_or("MAX_BACKOFF_MS", 5 * 60_000)?,
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", 10)?,
            loop_max_turns: env_or("LOOP_MAX_TURNS", 20)?,
            loop_max_repeated_findings: env_or("LOOP_MAX_REPEATED_FINDINGS", 3)?,
            callback_max_attempts: env_or("CALLBACK_MAX_ATTEMPTS", 3)?,

            crash_loop_threshold: env_or("CRASH_LOOP_THRESHOLD", 3)?,
            crash_loop_window_ms: env_or("CRASH_LOOP_WINDOW_MS", 15 * 60_000)?,
            resume_max_attempts: env_or("RESUME_MAX_ATTEMPTS", 2)?,
            fallback_deadline_ms: env_or("FALLBACK_DEADLINE_MS", 2 * 60_000)?,
            grace_ms: env_or("GRACE_MS", 5_000)?,
            orphan_grace_ms: env_or("ORPHAN_GRACE_MS", 30_000)?,

            pty_max_payload_bytes: env_or("PTY_MAX_PAYLOAD_BYTES", 8 * 1024usize)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_when_unset() {
        env::remove_var("BRIDGE_TEST_UNSET_KEY");
        let v: u16 = env_or("BRIDGE_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(v, 42);
    }
}
