use std::sync::Arc;

use crate::domain::{
    entities::{
        audit_record::AuditRecord, entitlement::Entitlement,
        notification_log_entry::NotificationLogEntry, pending_receipt::PendingReceipt, plan::Plan,
        subscription::Subscription,
    },
    repositories::entity_store::EntityStore,
};

pub mod in_memory_store;
pub mod plan_catalog_seed;

use in_memory_store::InMemoryStore;

/// One store per entity kind, shared by every service.
#[derive(Clone)]
pub struct Storage {
    pub subscriptions: Arc<dyn EntityStore<Subscription>>,
    pub plans: Arc<dyn EntityStore<Plan>>,
    pub entitlements: Arc<dyn EntityStore<Entitlement>>,
    pub notifications: Arc<dyn EntityStore<NotificationLogEntry>>,
    pub receipts: Arc<dyn EntityStore<PendingReceipt>>,
    pub audit_records: Arc<dyn EntityStore<AuditRecord>>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            subscriptions: Arc::new(InMemoryStore::new()),
            plans: Arc::new(InMemoryStore::new()),
            entitlements: Arc::new(InMemoryStore::new()),
            notifications: Arc::new(InMemoryStore::new()),
            receipts: Arc::new(InMemoryStore::new()),
            audit_records: Arc::new(InMemoryStore::new()),
        }
    }
}
