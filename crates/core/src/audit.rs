//! Audit collaborator.
//!
//! Audit writes never affect the operation that produced them: records are handed to the
//! sink on a spawned task and failures are only logged.

use crate::model::RequestMeta;
use crate::LaudoResult;
use async_trait::async_trait;
use laudo_ids::{TenantId, UserId};
use serde::Serialize;
use std::sync::Arc;

/// Collection name recorded for report events.
pub const REPORT_COLLECTION: &str = "laudos";

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub actor_id: UserId,
    pub action: String,
    pub description: String,
    pub collection: String,
    pub document_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub request_meta: RequestMeta,
    pub tenant_id: TenantId,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> LaudoResult<()>;
}

/// Writes audit records to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> LaudoResult<()> {
        tracing::info!(
            target: "audit",
            actor_id = %record.actor_id,
            tenant_id = %record.tenant_id,
            action = %record.action,
            collection = %record.collection,
            document_id = %record.document_id,
            "{}",
            record.description
        );
        Ok(())
    }
}

/// Hands `record` to `sink` without waiting for it.
pub(crate) fn dispatch(sink: &Arc<dyn AuditSink>, record: AuditRecord) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        let document_id = record.document_id.clone();
        if let Err(e) = sink.record(record).await {
            tracing::warn!(document_id = %document_id, error = %e, "audit record dropped");
        }
    });
}
