use serde::{Deserialize, Serialize};

use crate::domain::repositories::entity_store::{
    Entity, EntityFilter, EntityId, EntityPatch, FieldFilter, Record,
};

use super::subscription::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
    Warning,
    Info,
}

/// Business events recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    // SUBSCRIBED
    SubscriptionConfirmed,
    SubscriptionCreatedByFallback,
    SubscribedFailurePlanMissing,
    SubscribedFailureUnlinkable,
    // DID_RENEW
    UserSubscriptionRenewed,
    RenewalFailureSubscriptionMissing,
    RenewalFailurePlanMissing,
    // DID_CHANGE_RENEWAL_PREF
    PlanChanged,
    PlanChangeFailureSubMissing,
    PlanChangeFailurePlanMissing,
    // DID_CHANGE_RENEWAL_STATUS
    UserDisabledAutorenew,
    UserEnabledAutorenew,
    RenewalStatusChangeFailureSubMissing,
    RenewalStatusChangeUnrecognized,
    // DID_FAIL_TO_RENEW
    UserSubscriptionRenewalFailed,
    RenewalFailureSubMissing,
    // EXPIRED
    UserSubscriptionExpired,
    ExpirationWarningSubscriptionMissing,
    FreePlanFallbackActivated,
    FreePlanFallbackSkipped,
    // REFUND / REVOKE
    UserSubscriptionRefunded,
    RefundFailureSubMissing,
    UserSubscriptionRevoked,
    RevokeFailureSubMissing,
    // Informational
    UserRedeemedOffer,
    OfferRedeemedSubMissing,
    UserNotifiedOfPriceIncrease,
    PriceIncreaseWarningSubMissing,
    TestNotificationReceived,
    UnhandledNotificationType,
    // Pipeline
    AppleNotificationVerificationFailure,
    AppleNotificationFailure,
    // Reconciliation
    ReceiptVerificationFailed,
}

/// Append-only business event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub status: AuditStatus,
    pub message: String,
    pub details: serde_json::Value,
    pub user_id: Option<UserId>,
    pub notification_id: Option<EntityId>,
}

impl AuditRecord {
    pub fn new(event: AuditEvent, status: AuditStatus, message: impl Into<String>) -> Self {
        Self {
            event,
            status,
            message: message.into(),
            details: serde_json::Value::Object(Default::default()),
            user_id: None,
            notification_id: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<Option<UserId>>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn notification(mut self, notification_id: impl Into<Option<EntityId>>) -> Self {
        self.notification_id = notification_id.into();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditRecordFilter {
    pub event: FieldFilter<AuditEvent>,
    pub status: FieldFilter<AuditStatus>,
    pub user_id: FieldFilter<Option<UserId>>,
    pub notification_id: FieldFilter<Option<EntityId>>,
}

impl AuditRecordFilter {
    pub fn event(event: AuditEvent) -> Self {
        Self {
            event: FieldFilter::Eq(event),
            ..Default::default()
        }
    }
}

impl EntityFilter<AuditRecord> for AuditRecordFilter {
    fn matches(&self, record: &Record<AuditRecord>) -> bool {
        self.event.matches(&record.event)
            && self.status.matches(&record.status)
            && self.user_id.matches(&record.user_id)
            && self.notification_id.matches(&record.notification_id)
    }
}

/// Audit records are never updated; this patch type has no values.
#[derive(Debug, Clone)]
pub enum AuditRecordPatch {}

impl EntityPatch<AuditRecord> for AuditRecordPatch {
    fn apply(self, _: &mut AuditRecord) {
        match self {}
    }
}

impl Entity for AuditRecord {
    const KIND: &'static str = "audit-log";
    type Filter = AuditRecordFilter;
    type Patch = AuditRecordPatch;
}
