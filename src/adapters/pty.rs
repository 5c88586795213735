//! PTY delivery contract (spec §4.7/§6). Driving a real terminal is out of
//! scope (escape-sequence handling is a stated non-goal); this module owns
//! the payload encoder, which is part of the testable contract, and the
//! trait boundary a real terminal driver plugs into.

use crate::ids::{ThreadId, TriggerId};
use async_trait::async_trait;
use serde_json::Value;

pub struct DeliverRequest {
    pub runtime: String,
    pub trigger_id: TriggerId,
    pub thread_id: ThreadId,
    pub reason: String,
    pub prompt: String,
    pub force_override: bool,
}

pub enum DeliverOutcome {
    Delivered { details: Option<Value> },
    Failed { error_code: &'static str, details: Option<Value> },
}

#[async_trait]
pub trait PtyAdapter: Send + Sync {
    async fn deliver(&self, request: DeliverRequest) -> DeliverOutcome;
}

/// Errors the encoder itself can raise, before any delivery attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum EncodeError {
    EmptyPrompt,
    PayloadTooLarge { len: usize, max: usize },
}

impl EncodeError {
    pub fn code(&self) -> &'static str {
        match self {
            EncodeError::EmptyPrompt => "EMPTY_PROMPT",
            EncodeError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        }
    }
}

/// Escape non-printable control characters and wrap `prompt` in the
/// `[BRIDGE_TRIGGER ...]` / `[/BRIDGE_TRIGGER]` header/footer (§6).
pub fn encode_payload(
    trigger_id: &TriggerId,
    thread_id: &ThreadId,
    reason: &str,
    prompt: &str,
    max_payload_bytes: usize,
) -> Result<String, EncodeError> {
    let sanitized = sanitize_control_chars(prompt);
    if sanitized.trim().is_empty() {
        return Err(EncodeError::EmptyPrompt);
    }

    let header = format!("[BRIDGE_TRIGGER id={trigger_id} thread={thread_id} reason={reason}]");
    let footer = "[/BRIDGE_TRIGGER]";
    let full = format!("{header}\n{sanitized}\n{footer}");

    if full.len() > max_payload_bytes {
        return Err(EncodeError::PayloadTooLarge { len: full.len(), max: max_payload_bytes });
    }

    Ok(full)
}

/// Replace non-printable control characters (everything below 0x20 except
/// newline and tab, plus DEL) with their `^X` caret notation so a pasted
/// payload can't smuggle terminal escape sequences.
fn sanitize_control_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let code = ch as u32;
        if ch == '\n' || ch == '\t' {
            out.push(ch);
        } else if code < 0x20 || code == 0x7f {
            out.push('^');
            out.push(char::from_u32(code ^ 0x40).unwrap_or('?'));
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_footer_wrap_the_sanitized_prompt() {
        let trigger = TriggerId::from("trg_1");
        let thread = ThreadId::from("thr_1");
        let encoded = encode_payload(&trigger, &thread, "routine", "hello", 8192).unwrap();
        assert!(encoded.starts_with("[BRIDGE_TRIGGER id=trg_1 thread=thr_1 reason=routine]"));
        assert!(encoded.ends_with("[/BRIDGE_TRIGGER]"));
        assert!(encoded.contains("hello"));
    }

    #[test]
    fn control_characters_are_escaped() {
        let escaped = sanitize_control_chars("abc\x07def");
        assert_eq!(escaped, "abc^Gdef");
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let trigger = TriggerId::from("trg_1");
        let thread = ThreadId::from("thr_1");
        let err = encode_payload(&trigger, &thread, "routine", "   ", 8192).unwrap_err();
        assert_eq!(err, EncodeError::EmptyPrompt);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let trigger = TriggerId::from("trg_1");
        let thread = ThreadId::from("thr_1");
        let huge = "x".repeat(100);
        let err = encode_payload(&trigger, &thread, "routine", &huge, 32).unwrap_err();
        assert!(matches!(err, EncodeError::PayloadTooLarge { .. }));
    }
}
