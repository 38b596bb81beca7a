use std::sync::Arc;

use tracing::error;

use crate::domain::{
    entities::audit_record::AuditRecord, repositories::entity_store::EntityStore,
};

/// Writes business events to the audit store.
///
/// A failed write never fails the operation being audited; it is logged and
/// dropped.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn EntityStore<AuditRecord>>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn EntityStore<AuditRecord>>) -> Self {
        Self { store }
    }

    pub async fn record(&self, record: AuditRecord) {
        let event = record.event;
        if let Err(e) = self.store.create(record).await {
            error!(?event, error = %e, "failed to write audit record");
        }
    }
}
