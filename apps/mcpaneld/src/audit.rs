use mcpanel_core::proto::{AuditEvent, AuditOutcome};
use tracing::{error, info};

/// Receives audit events. Implementations must not fail back into callers.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each audit event as a structured `tracing` event.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let detail = event.detail.to_string();
        match event.outcome {
            AuditOutcome::Error => error!(
                target: "audit",
                action = %event.action,
                at_ms = event.at_ms,
                detail = %detail,
                "audit error"
            ),
            outcome => info!(
                target: "audit",
                action = %event.action,
                at_ms = event.at_ms,
                outcome = ?outcome,
                detail = %detail,
                "audit"
            ),
        }
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

#[cfg(test)]
impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit lock poisoned").clone()
    }

    pub fn outcomes(&self, action: &str) -> Vec<AuditOutcome> {
        self.events()
            .into_iter()
            .filter(|event| event.action == action)
            .map(|event| event.outcome)
            .collect()
    }
}

#[cfg(test)]
impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().expect("audit lock poisoned").push(event);
    }
}
