use serde_json::json;
use tracing::{info, warn};

use crate::{
    domain::{
        entities::audit_record::{AuditEvent, AuditStatus},
        repositories::entity_store::EntityId,
    },
    errors::IapSyncError,
};

use super::{HandlerContext, NotificationHandlers};

// Audit-only notifications. A missing subscription is worth a warning, not a
// retry.
impl NotificationHandlers {
    pub(super) async fn offer_redeemed(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let Some(subscription) = &ctx.subscription else {
            self.audit(
                ctx,
                AuditEvent::OfferRedeemedSubMissing,
                AuditStatus::Warning,
                "offer redeemed for an unknown subscription",
            )
            .await;
            return Ok(None);
        };
        let mut details = ctx.details();
        if let Some(t) = &ctx.transaction {
            details["offerType"] = json!(t.offer_type.map(|o| o.label()));
            details["offerIdentifier"] = json!(t.offer_identifier);
        }
        self.audit_with(
            ctx,
            AuditEvent::UserRedeemedOffer,
            AuditStatus::Info,
            format!("offer redeemed on subscription {}", subscription.id),
            details,
        )
        .await;
        Ok(Some(subscription.id))
    }

    pub(super) async fn price_increase(
        &self,
        ctx: &HandlerContext,
        accepted: bool,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let Some(subscription) = &ctx.subscription else {
            self.audit(
                ctx,
                AuditEvent::PriceIncreaseWarningSubMissing,
                AuditStatus::Warning,
                "price increase for an unknown subscription",
            )
            .await;
            return Ok(None);
        };
        let mut details = ctx.details();
        details["accepted"] = json!(accepted);
        self.audit_with(
            ctx,
            AuditEvent::UserNotifiedOfPriceIncrease,
            AuditStatus::Info,
            format!(
                "price increase {} on subscription {}",
                if accepted { "accepted" } else { "pending consent" },
                subscription.id
            ),
            details,
        )
        .await;
        Ok(Some(subscription.id))
    }

    pub(super) async fn test(&self, ctx: &HandlerContext) -> Result<Option<EntityId>, IapSyncError> {
        info!(notification_uuid = %ctx.notification.notification_uuid, "test notification received");
        self.audit(
            ctx,
            AuditEvent::TestNotificationReceived,
            AuditStatus::Info,
            "test notification received",
        )
        .await;
        Ok(None)
    }

    pub(super) async fn unhandled(
        &self,
        ctx: &HandlerContext,
        notification_type: &str,
    ) -> Result<Option<EntityId>, IapSyncError> {
        warn!(notification_type, "no handler for notification type");
        self.audit(
            ctx,
            AuditEvent::UnhandledNotificationType,
            AuditStatus::Warning,
            format!("no handler for {notification_type}"),
        )
        .await;
        Ok(ctx.subscription.as_ref().map(|s| s.id))
    }
}
