use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::{
    domain::{
        entities::{
            app_store_transaction::RevocationReason,
            audit_record::{AuditEvent, AuditStatus},
            subscription::{Subscription, SubscriptionFilter, SubscriptionPatch, SubscriptionStatus},
        },
        repositories::entity_store::{EntityId, FieldFilter, FindOptions},
    },
    errors::IapSyncError,
};

use super::{HandlerContext, NotificationHandlers};

impl NotificationHandlers {
    /// EXPIRED: the subscription ends and the user falls back to the free
    /// tier, anchored to the same original transaction id.
    pub(super) async fn expired(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let Some(subscription) = &ctx.subscription else {
            self.audit(
                ctx,
                AuditEvent::ExpirationWarningSubscriptionMissing,
                AuditStatus::Warning,
                "expired subscription is not known locally",
            )
            .await;
            return Ok(None);
        };

        let free_plan = self.catalog.find_free_plan().await?;
        if free_plan.is_some() && free_plan.as_ref().map(|p| p.id) == subscription.plan_id {
            // Already on the fallback tier.
            self.audit(
                ctx,
                AuditEvent::FreePlanFallbackSkipped,
                AuditStatus::Info,
                format!("subscription {} is on the free plan", subscription.id),
            )
            .await;
            return Ok(Some(subscription.id));
        }

        self.subscriptions
            .update(subscription.id, SubscriptionPatch::status(SubscriptionStatus::Expired))
            .await?;
        self.audit(
            ctx,
            AuditEvent::UserSubscriptionExpired,
            AuditStatus::Success,
            format!("subscription {} expired", subscription.id),
        )
        .await;

        let Some(free_plan) = free_plan else {
            self.audit(
                ctx,
                AuditEvent::FreePlanFallbackSkipped,
                AuditStatus::Info,
                "no free plan configured",
            )
            .await;
            return Ok(Some(subscription.id));
        };

        let still_active = self
            .subscriptions
            .find(
                &SubscriptionFilter {
                    id: FieldFilter::Ne(subscription.id),
                    ..SubscriptionFilter::active_for_user(subscription.user_id)
                },
                FindOptions::default().limit(1),
            )
            .await?;
        if let Some(other) = still_active.first() {
            self.audit(
                ctx,
                AuditEvent::FreePlanFallbackSkipped,
                AuditStatus::Info,
                format!("user already has active subscription {}", other.id),
            )
            .await;
            return Ok(Some(subscription.id));
        }

        let mut fallback = Subscription::active(subscription.user_id, free_plan.id, None, Utc::now());
        fallback.original_transaction_id = subscription.original_transaction_id.clone();
        let fallback = self.subscriptions.create(fallback).await?;
        info!(
            subscription_id = fallback.id,
            user_id = %fallback.user_id,
            "free plan fallback activated"
        );
        let mut details = ctx.details();
        details["fallbackSubscriptionId"] = json!(fallback.id);
        self.audit_with(
            ctx,
            AuditEvent::FreePlanFallbackActivated,
            AuditStatus::Success,
            format!("user {} moved to '{}'", fallback.user_id, free_plan.name),
            details,
        )
        .await;
        Ok(Some(subscription.id))
    }

    pub(super) async fn refund(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let subscription = self
            .require_subscription(ctx, AuditEvent::RefundFailureSubMissing)
            .await?;
        let transaction = ctx.transaction.as_ref();
        let reason = match transaction.and_then(|t| t.revocation_reason) {
            Some(RevocationReason::AppIssue) => "REFUND_APP_ISSUE",
            Some(RevocationReason::Other) => "REFUND_OTHER",
            Some(RevocationReason::Unrecognized(_)) | None => "REFUND_UNKNOWN",
        };
        self.revoke_subscription(ctx, subscription.id, reason.to_owned())
            .await?;
        self.audit(
            ctx,
            AuditEvent::UserSubscriptionRefunded,
            AuditStatus::Success,
            format!("subscription {} refunded ({reason})", subscription.id),
        )
        .await;
        Ok(Some(subscription.id))
    }

    /// REVOKE: Family Sharing access withdrawn.
    pub(super) async fn revoke(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let subscription = self
            .require_subscription(ctx, AuditEvent::RevokeFailureSubMissing)
            .await?;
        let reason = match ctx.transaction.as_ref().and_then(|t| t.revocation_reason) {
            Some(reason) => format!("REVOKE_REASON_{}", reason.code()),
            None => "REVOKE_REASON_UNKNOWN".to_owned(),
        };
        self.revoke_subscription(ctx, subscription.id, reason.clone())
            .await?;
        self.audit(
            ctx,
            AuditEvent::UserSubscriptionRevoked,
            AuditStatus::Success,
            format!("subscription {} revoked ({reason})", subscription.id),
        )
        .await;
        Ok(Some(subscription.id))
    }

    async fn revoke_subscription(
        &self,
        ctx: &HandlerContext,
        subscription_id: EntityId,
        reason: String,
    ) -> Result<(), IapSyncError> {
        let revoked_at = ctx
            .transaction
            .as_ref()
            .and_then(|t| t.revocation_date)
            .unwrap_or_else(Utc::now);
        self.subscriptions
            .update(
                subscription_id,
                SubscriptionPatch {
                    status: Some(SubscriptionStatus::Revoked),
                    revocation_date: Some(Some(revoked_at)),
                    revocation_reason: Some(Some(reason)),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}
