use serde::{Deserialize, Serialize};

use super::UnixMillis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Start,
    Success,
    Error,
}

/// Tagged record handed to the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_ms: UnixMillis,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl AuditEvent {
    pub fn new(at_ms: UnixMillis, action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            at_ms,
            action: action.into(),
            outcome,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
