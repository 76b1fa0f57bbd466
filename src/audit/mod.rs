//! Structured audit events on the `audit` tracing target

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    /// Fraud-relevant, routed to alerting
    Warn,
    /// Store faults
    Error,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: &'static str,
    pub ip_hash: String,
    pub resource: String,
    pub action: &'static str,
    pub success: bool,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(event_type: &'static str, action: &'static str) -> Self {
        Self {
            event_type,
            ip_hash: String::new(),
            resource: String::new(),
            action,
            success: false,
            details: Value::Null,
        }
    }

    pub fn ip_hash(mut self, ip_hash: impl Into<String>) -> Self {
        self.ip_hash = ip_hash.into();
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn emit(&self, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(
                target: "audit",
                event_type = self.event_type,
                ip_hash = %self.ip_hash,
                resource = %self.resource,
                action = self.action,
                success = self.success,
                details = %self.details,
                "audit event"
            ),
            Severity::Warn => tracing::warn!(
                target: "audit",
                event_type = self.event_type,
                ip_hash = %self.ip_hash,
                resource = %self.resource,
                action = self.action,
                success = self.success,
                details = %self.details,
                "audit event"
            ),
            Severity::Error => tracing::error!(
                target: "audit",
                event_type = self.event_type,
                ip_hash = %self.ip_hash,
                resource = %self.resource,
                action = self.action,
                success = self.success,
                details = %self.details,
                "audit event"
            ),
        }
    }
}
