use std::sync::Arc;

use serde_json::json;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, instrument, warn};

use crate::{
    domain::{
        entities::{
            app_store_transaction::AppStoreTransaction,
            audit_record::{AuditEvent, AuditRecord, AuditStatus},
            notification_log_entry::{
                NotificationLogEntry, NotificationLogEntryFilter, NotificationLogEntryPatch,
                ProcessingStatus,
            },
            subscription::{Subscription, SubscriptionFilter, SubscriptionStatus},
        },
        repositories::{
            app_store_repository::AppStoreRepository,
            entity_store::{EntityId, EntityStore, FieldFilter, FindOptions, Record},
        },
    },
    errors::IapSyncError,
};

use super::{
    audit_log::AuditLog,
    notification_handlers::{HandlerContext, NotificationHandlers},
    plan_catalog::PlanCatalog,
    transaction_locks::KeyedLocks,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed { notification_id: EntityId },
    /// The notification UUID was already processed; nothing was applied.
    Duplicate { notification_id: EntityId },
}

/// Webhook entry point for App Store Server Notifications.
///
/// Every delivery is logged before it is verified. An `Err` means the
/// delivery was not applied and the sender should retry it.
pub struct NotificationIngest {
    notifications: Arc<dyn EntityStore<NotificationLogEntry>>,
    subscriptions: Arc<dyn EntityStore<Subscription>>,
    app_store: Arc<dyn AppStoreRepository>,
    handlers: NotificationHandlers,
    catalog: PlanCatalog,
    audit: AuditLog,
    locks: Arc<KeyedLocks>,
}

impl NotificationIngest {
    pub fn new(
        notifications: Arc<dyn EntityStore<NotificationLogEntry>>,
        subscriptions: Arc<dyn EntityStore<Subscription>>,
        app_store: Arc<dyn AppStoreRepository>,
        handlers: NotificationHandlers,
        catalog: PlanCatalog,
        audit: AuditLog,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            notifications,
            subscriptions,
            app_store,
            handlers,
            catalog,
            audit,
            locks,
        }
    }

    #[instrument(skip_all)]
    pub async fn ingest(&self, raw_body: &str) -> Result<IngestOutcome, IapSyncError> {
        let entry = self
            .notifications
            .create(NotificationLogEntry::received(raw_body))
            .await?;

        match self.process(entry.id, raw_body).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_failure(entry.id, &e).await;
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        notification_id: EntityId,
        raw_body: &str,
    ) -> Result<IngestOutcome, IapSyncError> {
        let notification = self.app_store.parse_notification(raw_body)?;
        self.notifications
            .update(
                notification_id,
                NotificationLogEntryPatch {
                    notification_uuid: Some(notification.notification_uuid.clone()),
                    notification_type: Some(notification.notification_type.clone()),
                    subtype: notification.subtype.clone(),
                    ..Default::default()
                },
            )
            .await?;

        let transaction = notification
            .signed_transaction_info
            .as_deref()
            .map(|signed| self.app_store.verify_transaction(signed))
            .transpose()?;
        let renewal_info = notification
            .signed_renewal_info
            .as_deref()
            .map(|signed| self.app_store.verify_renewal_info(signed))
            .transpose()?;

        let original_transaction_id = transaction
            .as_ref()
            .map(|t| t.original_transaction_id.clone());
        let (_guards, subscription) = match &transaction {
            Some(transaction) => self.lock_chain(transaction).await?,
            None => {
                let guard = self
                    .locks
                    .lock(&format!("notification:{}", notification.notification_uuid))
                    .await;
                (vec![guard], None)
            }
        };

        if let Some(previous) = self
            .already_processed(notification_id, &notification.notification_uuid)
            .await?
        {
            self.notifications
                .update(
                    notification_id,
                    NotificationLogEntryPatch::status(ProcessingStatus::Duplicate),
                )
                .await?;
            warn!(
                notification_uuid = %notification.notification_uuid,
                previous,
                "duplicate notification ignored"
            );
            return Ok(IngestOutcome::Duplicate { notification_id });
        }

        let ctx = HandlerContext {
            notification_id,
            notification,
            transaction,
            renewal_info,
            subscription,
        };
        let subscription_id = self.handlers.dispatch(&ctx).await?;

        let transaction_info = ctx
            .transaction
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| IapSyncError::DataInconsistency(format!("transaction info: {e}")))?;
        self.notifications
            .update(
                notification_id,
                NotificationLogEntryPatch {
                    processing_status: Some(ProcessingStatus::Processed),
                    original_transaction_id,
                    transaction_info,
                    subscription_id,
                    ..Default::default()
                },
            )
            .await?;
        info!(
            notification_uuid = %ctx.notification.notification_uuid,
            notification_type = %ctx.notification.notification_type,
            subscription_id,
            "notification processed"
        );
        Ok(IngestOutcome::Processed { notification_id })
    }

    async fn already_processed(
        &self,
        notification_id: EntityId,
        notification_uuid: &str,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let filter = NotificationLogEntryFilter {
            id: FieldFilter::Ne(notification_id),
            notification_uuid: FieldFilter::some(notification_uuid.to_owned()),
            processing_status: FieldFilter::Eq(ProcessingStatus::Processed),
            ..Default::default()
        };
        let found = self
            .notifications
            .find(&filter, FindOptions::default().limit(1))
            .await?;
        Ok(found.first().map(|e| e.id))
    }

    /// Takes the owner's `user:` lock, then the chain's `otid:` lock, and
    /// loads the chain's subscription under both. The owner is read before
    /// locking. A linked chain never changes owner, so one more pass settles
    /// a race with the request that links it.
    async fn lock_chain(
        &self,
        transaction: &AppStoreTransaction,
    ) -> Result<(Vec<OwnedMutexGuard<()>>, Option<Record<Subscription>>), IapSyncError> {
        let otid = &transaction.original_transaction_id;
        let owner = |subscription: &Option<Record<Subscription>>| {
            subscription
                .as_ref()
                .map(|s| s.user_id)
                .or_else(|| transaction.user_id())
        };

        let mut user_id = owner(&self.find_subscription(otid).await?);
        let mut settled = false;
        loop {
            let mut guards = Vec::with_capacity(2);
            if let Some(user_id) = user_id {
                guards.push(self.locks.lock_user(user_id).await);
            }
            guards.push(self.locks.lock_transaction(otid).await);

            let subscription = self.find_subscription(otid).await?;
            let locked_owner = owner(&subscription);
            if locked_owner == user_id || settled {
                return Ok((guards, subscription));
            }
            drop(guards);
            user_id = locked_owner;
            settled = true;
        }
    }

    /// The record a chain notification acts on. The free-tier fallback that
    /// EXPIRED anchors to the chain answers only when the chain has no paid
    /// record, so a late REFUND or REVOKE still reaches the purchase itself.
    /// Within each group the newest active record wins, else the newest.
    async fn find_subscription(
        &self,
        original_transaction_id: &str,
    ) -> Result<Option<Record<Subscription>>, IapSyncError> {
        let free_plan_id = self.catalog.find_free_plan().await?.map(|p| p.id);
        let candidates = self
            .subscriptions
            .find(
                &SubscriptionFilter::by_original_transaction_id(original_transaction_id),
                FindOptions::newest_first(),
            )
            .await?;
        let (paid, fallback): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|s| free_plan_id.is_none() || s.plan_id != free_plan_id);

        let mut candidates = if paid.is_empty() { fallback } else { paid };
        let active = candidates
            .iter()
            .position(|s| s.status == SubscriptionStatus::Active);
        Ok(match active {
            Some(index) => Some(candidates.swap_remove(index)),
            None => candidates.into_iter().next(),
        })
    }

    async fn record_failure(&self, notification_id: EntityId, e: &IapSyncError) {
        let (status, event) = match e {
            IapSyncError::Verification(_) => (
                ProcessingStatus::FailedVerification,
                Some(AuditEvent::AppleNotificationVerificationFailure),
            ),
            // Handlers already wrote a specific FAILURE record.
            e if e.is_audited() => (ProcessingStatus::Failed, None),
            _ => (
                ProcessingStatus::Failed,
                Some(AuditEvent::AppleNotificationFailure),
            ),
        };
        warn!(notification_id, error = %e, ?status, "notification not applied");

        if let Err(update_error) = self
            .notifications
            .update(notification_id, NotificationLogEntryPatch::status(status))
            .await
        {
            error!(
                notification_id,
                error = %update_error,
                "failed to record notification failure"
            );
        }
        if let Some(event) = event {
            self.audit
                .record(
                    AuditRecord::new(event, AuditStatus::Failure, e.to_string())
                        .notification(notification_id)
                        .details(json!({ "error": e.to_string() })),
                )
                .await;
        }
    }
}
