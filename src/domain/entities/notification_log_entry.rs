use serde::{Deserialize, Serialize};

use crate::domain::repositories::entity_store::{
    Entity, EntityFilter, EntityId, EntityPatch, FieldFilter, Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Received,
    Processed,
    Failed,
    FailedVerification,
    Duplicate,
}

/// One record per received webhook delivery, written before the payload is
/// verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLogEntry {
    /// Raw request body as delivered. Never patched.
    pub raw_signed_payload: String,
    pub processing_status: ProcessingStatus,
    pub notification_uuid: Option<String>,
    pub notification_type: Option<String>,
    pub subtype: Option<String>,
    pub original_transaction_id: Option<String>,
    pub transaction_info: Option<serde_json::Value>,
    pub subscription_id: Option<EntityId>,
}

impl NotificationLogEntry {
    pub fn received(raw_signed_payload: impl Into<String>) -> Self {
        Self {
            raw_signed_payload: raw_signed_payload.into(),
            processing_status: ProcessingStatus::Received,
            notification_uuid: None,
            notification_type: None,
            subtype: None,
            original_transaction_id: None,
            transaction_info: None,
            subscription_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationLogEntryFilter {
    pub id: FieldFilter<EntityId>,
    pub notification_uuid: FieldFilter<Option<String>>,
    pub processing_status: FieldFilter<ProcessingStatus>,
    pub original_transaction_id: FieldFilter<Option<String>>,
}

impl EntityFilter<NotificationLogEntry> for NotificationLogEntryFilter {
    fn matches(&self, record: &Record<NotificationLogEntry>) -> bool {
        self.id.matches(&record.id)
            && self.notification_uuid.matches(&record.notification_uuid)
            && self.processing_status.matches(&record.processing_status)
            && self
                .original_transaction_id
                .matches(&record.original_transaction_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationLogEntryPatch {
    pub processing_status: Option<ProcessingStatus>,
    pub notification_uuid: Option<String>,
    pub notification_type: Option<String>,
    pub subtype: Option<String>,
    pub original_transaction_id: Option<String>,
    pub transaction_info: Option<serde_json::Value>,
    pub subscription_id: Option<EntityId>,
}

impl NotificationLogEntryPatch {
    pub fn status(processing_status: ProcessingStatus) -> Self {
        Self {
            processing_status: Some(processing_status),
            ..Default::default()
        }
    }
}

impl EntityPatch<NotificationLogEntry> for NotificationLogEntryPatch {
    fn apply(self, e: &mut NotificationLogEntry) {
        if let Some(v) = self.processing_status {
            e.processing_status = v;
        }
        if self.notification_uuid.is_some() {
            e.notification_uuid = self.notification_uuid;
        }
        if self.notification_type.is_some() {
            e.notification_type = self.notification_type;
        }
        if self.subtype.is_some() {
            e.subtype = self.subtype;
        }
        if self.original_transaction_id.is_some() {
            e.original_transaction_id = self.original_transaction_id;
        }
        if self.transaction_info.is_some() {
            e.transaction_info = self.transaction_info;
        }
        if self.subscription_id.is_some() {
            e.subscription_id = self.subscription_id;
        }
    }
}

impl Entity for NotificationLogEntry {
    const KIND: &'static str = "apple-notification";
    type Filter = NotificationLogEntryFilter;
    type Patch = NotificationLogEntryPatch;
}
