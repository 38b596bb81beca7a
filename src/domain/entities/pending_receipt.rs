use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::repositories::entity_store::{
    Entity, EntityFilter, EntityId, EntityPatch, FieldFilter, Record,
};

use super::subscription::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    PendingVerification,
    Verified,
    FailedVerification,
}

/// A client-submitted receipt, trusted on its local signature check and
/// awaiting confirmation from the App Store Server API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReceipt {
    pub transaction_id: String,
    pub user_id: UserId,
    pub raw_receipt: String,
    pub status: ReceiptStatus,
    pub verification_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingReceipt {
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: UserId,
        raw_receipt: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            user_id,
            raw_receipt: raw_receipt.into(),
            status: ReceiptStatus::PendingVerification,
            verification_attempts: 0,
            last_attempt_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PendingReceiptFilter {
    pub id: FieldFilter<EntityId>,
    pub transaction_id: FieldFilter<String>,
    pub user_id: FieldFilter<UserId>,
    pub status: FieldFilter<ReceiptStatus>,
    pub verification_attempts: FieldFilter<u32>,
}

impl EntityFilter<PendingReceipt> for PendingReceiptFilter {
    fn matches(&self, record: &Record<PendingReceipt>) -> bool {
        self.id.matches(&record.id)
            && self.transaction_id.matches(&record.transaction_id)
            && self.user_id.matches(&record.user_id)
            && self.status.matches(&record.status)
            && self
                .verification_attempts
                .matches(&record.verification_attempts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PendingReceiptPatch {
    pub status: Option<ReceiptStatus>,
    /// Increments `verification_attempts` and stamps `last_attempt_at`. The
    /// increment happens inside the store update, so concurrent runs cannot
    /// lose one.
    pub record_attempt_at: Option<DateTime<Utc>>,
}

impl PendingReceiptPatch {
    pub fn status(status: ReceiptStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn attempt(at: DateTime<Utc>) -> Self {
        Self {
            record_attempt_at: Some(at),
            ..Default::default()
        }
    }
}

impl EntityPatch<PendingReceipt> for PendingReceiptPatch {
    fn apply(self, r: &mut PendingReceipt) {
        if let Some(v) = self.status {
            r.status = v;
        }
        if let Some(at) = self.record_attempt_at {
            r.verification_attempts = r.verification_attempts.saturating_add(1);
            r.last_attempt_at = Some(at);
        }
    }
}

impl Entity for PendingReceipt {
    const KIND: &'static str = "pending-receipt";
    type Filter = PendingReceiptFilter;
    type Patch = PendingReceiptPatch;

    fn unique_key(&self) -> Option<String> {
        Some(self.transaction_id.clone())
    }
}
