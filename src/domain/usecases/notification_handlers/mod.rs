//! State transitions driven by App Store Server Notifications.
//!
//! Every handler either applies its transition and writes a SUCCESS/INFO
//! audit record, tolerates a missing subscription with a WARNING, or writes a
//! FAILURE audit record and returns an error so the delivery is retried.

mod informational;
mod purchase;
mod renewal;
mod termination;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    domain::{
        entities::{
            app_store_transaction::{AppStoreTransaction, RenewalInfo},
            audit_record::{AuditEvent, AuditRecord, AuditStatus},
            plan::Plan,
            server_notification::{NotificationKind, ServerNotification},
            subscription::{Subscription, UserId},
        },
        repositories::entity_store::{EntityId, EntityStore, Record},
    },
    errors::IapSyncError,
};

use super::{audit_log::AuditLog, plan_catalog::PlanCatalog};

/// Everything a handler may look at, verified and resolved by the pipeline.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub notification_id: EntityId,
    pub notification: ServerNotification,
    pub transaction: Option<AppStoreTransaction>,
    pub renewal_info: Option<RenewalInfo>,
    /// Local subscription matched by original transaction id.
    pub subscription: Option<Record<Subscription>>,
}

impl HandlerContext {
    fn transaction(&self) -> Result<&AppStoreTransaction, IapSyncError> {
        self.transaction.as_ref().ok_or_else(|| {
            IapSyncError::Verification(format!(
                "{} notification carries no signed transaction",
                self.notification.notification_type
            ))
        })
    }

    fn user_id(&self) -> Option<UserId> {
        self.subscription
            .as_ref()
            .map(|s| s.user_id)
            .or_else(|| self.transaction.as_ref().and_then(|t| t.user_id()))
    }

    fn original_transaction_id(&self) -> Option<&str> {
        self.transaction
            .as_ref()
            .map(|t| t.original_transaction_id.as_str())
    }

    fn details(&self) -> Value {
        let mut details = json!({
            "notificationUUID": self.notification.notification_uuid,
            "notificationType": self.notification.notification_type,
            "subtype": self.notification.subtype,
        });
        if let Some(t) = &self.transaction {
            details["originalTransactionId"] = json!(t.original_transaction_id);
            details["transactionId"] = json!(t.transaction_id);
            details["productId"] = json!(t.product_id);
        }
        if let Some(s) = &self.subscription {
            details["subscriptionId"] = json!(s.id);
            details["status"] = json!(s.status);
        }
        details
    }
}

#[derive(Clone)]
pub struct NotificationHandlers {
    subscriptions: Arc<dyn EntityStore<Subscription>>,
    catalog: PlanCatalog,
    audit: AuditLog,
}

impl NotificationHandlers {
    pub fn new(
        subscriptions: Arc<dyn EntityStore<Subscription>>,
        catalog: PlanCatalog,
        audit: AuditLog,
    ) -> Self {
        Self {
            subscriptions,
            catalog,
            audit,
        }
    }

    /// Apply the notification. Returns the id of the subscription it ended up
    /// linked to, if any.
    pub async fn dispatch(&self, ctx: &HandlerContext) -> Result<Option<EntityId>, IapSyncError> {
        match &ctx.notification.kind {
            NotificationKind::Subscribed => self.subscribed(ctx).await,
            NotificationKind::DidRenew => self.did_renew(ctx).await,
            NotificationKind::DidChangeRenewalPref => self.did_change_renewal_pref(ctx).await,
            NotificationKind::DidChangeRenewalStatus { auto_renew } => {
                self.did_change_renewal_status(ctx, *auto_renew).await
            }
            NotificationKind::DidFailToRenew { grace_period } => {
                self.did_fail_to_renew(ctx, *grace_period).await
            }
            NotificationKind::Expired => self.expired(ctx).await,
            NotificationKind::Refund => self.refund(ctx).await,
            NotificationKind::Revoke => self.revoke(ctx).await,
            NotificationKind::OfferRedeemed => self.offer_redeemed(ctx).await,
            NotificationKind::PriceIncrease { accepted } => {
                self.price_increase(ctx, *accepted).await
            }
            NotificationKind::Test => self.test(ctx).await,
            NotificationKind::Unhandled(notification_type) => {
                self.unhandled(ctx, notification_type).await
            }
        }
    }

    async fn audit(
        &self,
        ctx: &HandlerContext,
        event: AuditEvent,
        status: AuditStatus,
        message: impl Into<String>,
    ) {
        self.audit_with(ctx, event, status, message, ctx.details())
            .await
    }

    async fn audit_with(
        &self,
        ctx: &HandlerContext,
        event: AuditEvent,
        status: AuditStatus,
        message: impl Into<String>,
        details: Value,
    ) {
        self.audit
            .record(
                AuditRecord::new(event, status, message)
                    .user(ctx.user_id())
                    .notification(ctx.notification_id)
                    .details(details),
            )
            .await
    }

    /// The matched subscription, or a FAILURE audit record plus
    /// `DataInconsistency` so the sender retries once the record exists.
    async fn require_subscription<'a>(
        &self,
        ctx: &'a HandlerContext,
        missing: AuditEvent,
    ) -> Result<&'a Record<Subscription>, IapSyncError> {
        if let Some(subscription) = &ctx.subscription {
            return Ok(subscription);
        }
        let message = format!(
            "no subscription for original transaction {}",
            ctx.original_transaction_id().unwrap_or("<none>")
        );
        self.audit(ctx, missing, AuditStatus::Failure, message.clone())
            .await;
        Err(IapSyncError::DataInconsistency(message))
    }

    async fn plan_for_product(
        &self,
        ctx: &HandlerContext,
        product_id: &str,
        missing: AuditEvent,
    ) -> Result<Record<Plan>, IapSyncError> {
        if let Some(plan) = self.catalog.find_by_product_id(product_id).await? {
            return Ok(plan);
        }
        let message = format!("no plan for product '{product_id}'");
        self.audit(ctx, missing, AuditStatus::Failure, message.clone())
            .await;
        Err(IapSyncError::Configuration(message))
    }

    /// The plan to switch `subscription` to, or `None` when it already is on
    /// the plan selling `product_id`.
    async fn plan_change(
        &self,
        ctx: &HandlerContext,
        subscription: &Record<Subscription>,
        product_id: &str,
        missing: AuditEvent,
    ) -> Result<Option<Record<Plan>>, IapSyncError> {
        if let Some(current) = subscription.plan_id {
            if let Some(plan) = self.catalog.find_by_id(current).await? {
                if plan.product_id.as_deref() == Some(product_id) {
                    return Ok(None);
                }
            }
        }
        let plan = self.plan_for_product(ctx, product_id, missing).await?;
        Ok((subscription.plan_id != Some(plan.id)).then_some(plan))
    }
}
