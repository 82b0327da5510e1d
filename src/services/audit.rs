use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// One audit record describing an order mutation.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub description: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl AuditEntry {
    pub fn new(order_id: Uuid, action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            order_id,
            user_id: None,
            action: action.into(),
            description: description.into(),
            old_value: None,
            new_value: None,
        }
    }

    pub fn by(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_change(mut self, old_value: Value, new_value: Value) -> Self {
        self.old_value = Some(old_value);
        self.new_value = Some(new_value);
        self
    }
}

/// Destination for audit records. Storage is a collaborator concern; sink
/// failures are downgraded to warnings by callers and never escalate.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), ServiceError>;
}

/// Default sink that emits audit records into the trace stream.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), ServiceError> {
        info!(
            order_id = %entry.order_id,
            user_id = ?entry.user_id,
            action = %entry.action,
            old_value = ?entry.old_value,
            new_value = ?entry.new_value,
            "{}",
            entry.description
        );
        Ok(())
    }
}

/// Fire-and-forget write: a failing sink must never abort the mutation
/// that produced the entry.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    if let Err(e) = sink.record(entry).await {
        warn!(error = %e, action = %action, "audit sink failed, continuing");
    }
}
