//! Typed opaque-string identifiers.
//!
//! Every entity identifier in the bridge is, per the data model, an opaque
//! string. We still want the compiler to stop us from passing a
//! `SessionId` where a `ThreadId` is expected, so each identifier is a
//! distinct newtype over `String` rather than a bare `String` alias.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(Self(s))
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

string_id!(WorkspaceId);
string_id!(ThreadId);
string_id!(MessageId);
string_id!(AgentId);
string_id!(SessionId);
string_id!(TriggerId);

/// Derive a deterministic trigger id from a caller-supplied correlation
/// string (the HTTP `x-request-id` for `trigger_participant`, or an
/// `auto_unread_...` fingerprint for the scheduler). Same input always
/// yields the same id, which is what makes the upsert-and-reread idiom in
/// §4.4/§4.5 idempotent.
pub fn build_trigger_id(correlation: &str) -> TriggerId {
    let mut hasher = Sha256::new();
    hasher.update(b"trigger:");
    hasher.update(correlation.as_bytes());
    let digest = hasher.finalize();
    TriggerId(format!("trg_{}", hex::encode(&digest[..16])))
}

/// Fingerprint used as the correlation string for auto-unread triggers.
/// `sha256(workspace|thread|agent|latest_seq)[:24]` per §4.5, prefixed so
/// it can't collide with a request-id-derived trigger.
pub fn auto_unread_fingerprint(
    workspace_id: &WorkspaceId,
    thread_id: &ThreadId,
    agent_id: &AgentId,
    latest_seq: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(thread_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(agent_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(latest_seq.to_string().as_bytes());
    let digest = hasher.finalize();
    let short = &hex::encode(digest)[..24];
    format!("auto_unread_{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_id_is_deterministic() {
        let a = build_trigger_id("req_A");
        let b = build_trigger_id("req_A");
        assert_eq!(a, b);
    }

    #[test]
    fn trigger_id_differs_by_correlation() {
        let a = build_trigger_id("req_A");
        let b = build_trigger_id("req_B");
        assert_ne!(a, b);
    }

    #[test]
    fn auto_unread_fingerprint_is_deterministic_and_bounded() {
        let w = WorkspaceId::from("ws_1");
        let t = ThreadId::from("th_1");
        let a = AgentId::from("ag_1");
        let f1 = auto_unread_fingerprint(&w, &t, &a, 5);
        let f2 = auto_unread_fingerprint(&w, &t, &a, 5);
        let f3 = auto_unread_fingerprint(&w, &t, &a, 6);
        assert_eq!(f1, f2);
        assert_ne!(f1, f3);
        assert!(f1.starts_with("auto_unread_"));
    }
}
