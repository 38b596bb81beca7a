use tracing::info;

use crate::{
    domain::{
        entities::{
            audit_record::{AuditEvent, AuditStatus},
            subscription::{Subscription, SubscriptionPatch, SubscriptionStatus},
        },
        repositories::entity_store::EntityId,
        usecases::subscription_lifecycle::cancel_active_subscriptions,
    },
    errors::IapSyncError,
};

use super::{HandlerContext, NotificationHandlers};

impl NotificationHandlers {
    /// SUBSCRIBED: initial buy or resubscribe. Creates the subscription from
    /// the account token when the purchase flow has not recorded it yet.
    pub(super) async fn subscribed(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let transaction = ctx.transaction()?;

        if let Some(subscription) = &ctx.subscription {
            let plan = self
                .plan_change(
                    ctx,
                    subscription,
                    &transaction.product_id,
                    AuditEvent::SubscribedFailurePlanMissing,
                )
                .await?;
            cancel_active_subscriptions(
                self.subscriptions.as_ref(),
                subscription.user_id,
                Some(subscription.id),
            )
            .await?;
            let updated = self
                .subscriptions
                .update(
                    subscription.id,
                    SubscriptionPatch {
                        status: Some(SubscriptionStatus::Active),
                        plan_id: plan.map(|p| Some(p.id)),
                        expires_date: Some(transaction.expires_date),
                        latest_transaction_id: Some(Some(transaction.transaction_id.clone())),
                        ..Default::default()
                    },
                )
                .await?;
            self.audit(
                ctx,
                AuditEvent::SubscriptionConfirmed,
                AuditStatus::Success,
                format!("subscription {} confirmed active", updated.id),
            )
            .await;
            return Ok(Some(updated.id));
        }

        let Some(user_id) = transaction.user_id() else {
            let message = format!(
                "no subscription for original transaction {} and no usable account token",
                transaction.original_transaction_id
            );
            self.audit(
                ctx,
                AuditEvent::SubscribedFailureUnlinkable,
                AuditStatus::Failure,
                message.clone(),
            )
            .await;
            return Err(IapSyncError::DataInconsistency(message));
        };

        let plan = self
            .plan_for_product(
                ctx,
                &transaction.product_id,
                AuditEvent::SubscribedFailurePlanMissing,
            )
            .await?;
        cancel_active_subscriptions(self.subscriptions.as_ref(), user_id, None).await?;
        let created = self
            .subscriptions
            .create(
                Subscription::active(
                    user_id,
                    plan.id,
                    transaction.expires_date,
                    transaction.purchase_date,
                )
                .with_transactions(
                    transaction.original_transaction_id.clone(),
                    Some(transaction.transaction_id.clone()),
                ),
            )
            .await?;
        info!(
            subscription_id = created.id,
            %user_id,
            original_transaction_id = %transaction.original_transaction_id,
            "subscription created from notification"
        );
        self.audit(
            ctx,
            AuditEvent::SubscriptionCreatedByFallback,
            AuditStatus::Success,
            format!("subscription {} created for user {user_id}", created.id),
        )
        .await;
        Ok(Some(created.id))
    }

    /// DID_RENEW: extends the subscription and follows a product change.
    pub(super) async fn did_renew(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let subscription = self
            .require_subscription(ctx, AuditEvent::RenewalFailureSubscriptionMissing)
            .await?;
        let transaction = ctx.transaction()?;
        let plan = self
            .plan_change(
                ctx,
                subscription,
                &transaction.product_id,
                AuditEvent::RenewalFailurePlanMissing,
            )
            .await?;

        cancel_active_subscriptions(
            self.subscriptions.as_ref(),
            subscription.user_id,
            Some(subscription.id),
        )
        .await?;
        let updated = self
            .subscriptions
            .update(
                subscription.id,
                SubscriptionPatch {
                    status: Some(SubscriptionStatus::Active),
                    plan_id: plan.as_ref().map(|p| Some(p.id)),
                    expires_date: Some(transaction.expires_date),
                    latest_transaction_id: Some(Some(transaction.transaction_id.clone())),
                    ..Default::default()
                },
            )
            .await?;

        let mut details = ctx.details();
        details["expiresDate"] = serde_json::json!(updated.expires_date);
        if let Some(plan) = &plan {
            details["newPlanId"] = serde_json::json!(plan.id);
        }
        self.audit_with(
            ctx,
            AuditEvent::UserSubscriptionRenewed,
            AuditStatus::Success,
            format!("subscription {} renewed", updated.id),
            details,
        )
        .await;
        Ok(Some(updated.id))
    }

    /// DID_CHANGE_RENEWAL_PREF: the customer picked another product for the
    /// next period. The plan follows the pick right away.
    pub(super) async fn did_change_renewal_pref(
        &self,
        ctx: &HandlerContext,
    ) -> Result<Option<EntityId>, IapSyncError> {
        let subscription = self
            .require_subscription(ctx, AuditEvent::PlanChangeFailureSubMissing)
            .await?;
        let target_product = match ctx
            .renewal_info
            .as_ref()
            .and_then(|r| r.auto_renew_product_id.clone())
        {
            Some(product_id) => product_id,
            None => ctx.transaction()?.product_id.clone(),
        };

        let Some(plan) = self
            .plan_change(
                ctx,
                subscription,
                &target_product,
                AuditEvent::PlanChangeFailurePlanMissing,
            )
            .await?
        else {
            self.audit(
                ctx,
                AuditEvent::PlanChanged,
                AuditStatus::Info,
                format!("subscription {} already renews into '{target_product}'", subscription.id),
            )
            .await;
            return Ok(Some(subscription.id));
        };

        self.subscriptions
            .update(
                subscription.id,
                SubscriptionPatch {
                    plan_id: Some(Some(plan.id)),
                    ..Default::default()
                },
            )
            .await?;
        let mut details = ctx.details();
        details["previousPlanId"] = serde_json::json!(subscription.plan_id);
        details["newPlanId"] = serde_json::json!(plan.id);
        self.audit_with(
            ctx,
            AuditEvent::PlanChanged,
            AuditStatus::Info,
            format!("subscription {} moved to plan '{}'", subscription.id, plan.name),
            details,
        )
        .await;
        Ok(Some(subscription.id))
    }
}
