use crate::{
    domain::{
        entities::{
            audit_record::{AuditEvent, AuditStatus},
            subscription::{SubscriptionPatch, SubscriptionStatus},
        },
        repositories::entity_store::EntityId,
        usecases::subscription_lifecycle::cancel_active_subscriptions,
    },
    errors::IapSyncError,
};

use super::{HandlerContext, NotificationHandlers};

impl NotificationHandlers {
    /// DID_CHANGE_RENEWAL_STATUS. Re-enabling auto-renew brings back a
    /// canceled or billing-troubled subscription, never an expired or revoked
    /// one. Disabling it leaves an ended subscription as it is.
    pub(super) async fn did_change_renewal_status(
        &self,
        ctx: &HandlerContext,
        auto_renew: Option<bool>,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let subscription = self
            .require_subscription(ctx, AuditEvent::RenewalStatusChangeFailureSubMissing)
            .await?;

        let auto_renew =
            auto_renew.or_else(|| ctx.renewal_info.as_ref().map(|r| r.auto_renew_enabled));
        match auto_renew {
            Some(false) if subscription.status.is_ended() => {
                self.audit(
                    ctx,
                    AuditEvent::UserDisabledAutorenew,
                    AuditStatus::Info,
                    format!(
                        "auto-renew disabled; subscription {} stays {:?}",
                        subscription.id, subscription.status
                    ),
                )
                .await;
            }
            Some(false) => {
                self.subscriptions
                    .update(subscription.id, SubscriptionPatch::status(SubscriptionStatus::Canceled))
                    .await?;
                self.audit(
                    ctx,
                    AuditEvent::UserDisabledAutorenew,
                    AuditStatus::Success,
                    format!("auto-renew disabled; subscription {} canceled", subscription.id),
                )
                .await;
            }
            Some(true) if subscription.status.is_recoverable() => {
                cancel_active_subscriptions(
                    self.subscriptions.as_ref(),
                    subscription.user_id,
                    Some(subscription.id),
                )
                .await?;
                self.subscriptions
                    .update(subscription.id, SubscriptionPatch::status(SubscriptionStatus::Active))
                    .await?;
                self.audit(
                    ctx,
                    AuditEvent::UserEnabledAutorenew,
                    AuditStatus::Success,
                    format!("auto-renew enabled; subscription {} reactivated", subscription.id),
                )
                .await;
            }
            Some(true) => {
                self.audit(
                    ctx,
                    AuditEvent::UserEnabledAutorenew,
                    AuditStatus::Info,
                    format!(
                        "auto-renew enabled; subscription {} stays {:?}",
                        subscription.id, subscription.status
                    ),
                )
                .await;
            }
            None => {
                self.audit(
                    ctx,
                    AuditEvent::RenewalStatusChangeUnrecognized,
                    AuditStatus::Warning,
                    "renewal status change without a recognizable subtype; nothing changed",
                )
                .await;
            }
        }
        Ok(Some(subscription.id))
    }

    /// DID_FAIL_TO_RENEW: billing issue, or grace period when Apple granted
    /// one.
    pub(super) async fn did_fail_to_renew(
        &self,
        ctx: &HandlerContext,
        grace_period: bool,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let subscription = self
            .require_subscription(ctx, AuditEvent::RenewalFailureSubMissing)
            .await?;
        let status = if grace_period {
            SubscriptionStatus::GracePeriod
        } else {
            SubscriptionStatus::BillingIssue
        };
        self.subscriptions
            .update(subscription.id, SubscriptionPatch::status(status))
            .await?;
        self.audit(
            ctx,
            AuditEvent::UserSubscriptionRenewalFailed,
            AuditStatus::Warning,
            format!("renewal failed; subscription {} is now {status:?}", subscription.id),
        )
        .await;
        Ok(Some(subscription.id))
    }
}
