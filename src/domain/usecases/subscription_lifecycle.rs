use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    domain::{
        entities::{
            pending_receipt::{PendingReceipt, PendingReceiptFilter},
            subscription::{
                Subscription, SubscriptionFilter, SubscriptionPatch, SubscriptionStatus, UserId,
            },
        },
        repositories::{
            app_store_repository::AppStoreRepository,
            entity_store::{EntityId, EntityStore, FieldFilter, FindOptions, Record, SortOrder},
        },
    },
    errors::{IapSyncError, StoreError},
};

use super::{
    plan_catalog::{PlanCatalog, PlanDetails},
    transaction_locks::KeyedLocks,
};

const PAID_PLAN_PERIOD_DAYS: i64 = 30;

/// A user's active subscription together with its resolved plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDetails {
    #[serde(flatten)]
    pub subscription: Record<Subscription>,
    pub plan: PlanDetails,
}

/// Cancel every active subscription of `user_id` except `except`. Returns the
/// ids that were canceled.
pub(crate) async fn cancel_active_subscriptions(
    subscriptions: &dyn EntityStore<Subscription>,
    user_id: UserId,
    except: Option<EntityId>,
) -> Result<Vec<EntityId>, IapSyncError> {
    let filter = SubscriptionFilter {
        id: except.map(FieldFilter::Ne).unwrap_or_default(),
        ..SubscriptionFilter::active_for_user(user_id)
    };
    let mut canceled = Vec::new();
    for subscription in subscriptions.find(&filter, FindOptions::default()).await? {
        subscriptions
            .update(subscription.id, SubscriptionPatch::status(SubscriptionStatus::Canceled))
            .await?;
        canceled.push(subscription.id);
    }
    if !canceled.is_empty() {
        info!(%user_id, ?canceled, "superseded subscriptions canceled");
    }
    Ok(canceled)
}

/// User-initiated subscription changes.
pub struct SubscriptionLifecycle {
    subscriptions: Arc<dyn EntityStore<Subscription>>,
    receipts: Arc<dyn EntityStore<PendingReceipt>>,
    catalog: PlanCatalog,
    app_store: Arc<dyn AppStoreRepository>,
    locks: Arc<KeyedLocks>,
}

impl SubscriptionLifecycle {
    pub fn new(
        subscriptions: Arc<dyn EntityStore<Subscription>>,
        receipts: Arc<dyn EntityStore<PendingReceipt>>,
        catalog: PlanCatalog,
        app_store: Arc<dyn AppStoreRepository>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            subscriptions,
            receipts,
            catalog,
            app_store,
            locks,
        }
    }

    pub async fn subscribe_free_plan(
        &self,
        user_id: UserId,
    ) -> Result<Record<Subscription>, IapSyncError> {
        let free_plan = self
            .catalog
            .find_free_plan()
            .await?
            .ok_or_else(|| IapSyncError::Configuration("no free plan is configured".into()))?;

        let _user = self.locks.lock_user(user_id).await;
        cancel_active_subscriptions(self.subscriptions.as_ref(), user_id, None).await?;
        let created = self
            .subscriptions
            .create(Subscription::active(user_id, free_plan.id, None, Utc::now()))
            .await?;
        info!(%user_id, subscription_id = created.id, "subscribed to free plan");
        Ok(created)
    }

    /// Grants `plan_id` for 30 days, or indefinitely for the free plan. An
    /// active subscription to the same plan is extended instead.
    pub async fn subscribe_to_plan(
        &self,
        user_id: UserId,
        plan_id: EntityId,
    ) -> Result<Record<Subscription>, IapSyncError> {
        let plan = self
            .catalog
            .find_by_id(plan_id)
            .await?
            .ok_or_else(|| IapSyncError::Validation(format!("plan {plan_id} does not exist")))?;
        let now = Utc::now();
        let expires_date = (!self.catalog.is_free_plan(&plan))
            .then(|| now + Duration::days(PAID_PLAN_PERIOD_DAYS));

        let _user = self.locks.lock_user(user_id).await;
        let current = self
            .subscriptions
            .find_first(&SubscriptionFilter::active_for_user(user_id), SortOrder::NewestFirst)
            .await?;
        if let Some(current) = current.filter(|s| s.plan_id == Some(plan.id)) {
            let extended = self
                .subscriptions
                .update(
                    current.id,
                    SubscriptionPatch {
                        expires_date: Some(expires_date),
                        ..Default::default()
                    },
                )
                .await?;
            info!(%user_id, subscription_id = extended.id, "subscription extended");
            return Ok(extended);
        }

        cancel_active_subscriptions(self.subscriptions.as_ref(), user_id, None).await?;
        let created = self
            .subscriptions
            .create(Subscription::active(user_id, plan.id, expires_date, now))
            .await?;
        info!(%user_id, subscription_id = created.id, plan_id, "subscribed to plan");
        Ok(created)
    }

    /// Activate a purchase from a client-submitted signed transaction.
    ///
    /// The local signature check is enough to activate; upstream confirmation
    /// happens later through the pending receipt.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn verify_purchase(
        &self,
        receipt: &str,
        user_id: UserId,
    ) -> Result<SubscriptionDetails, IapSyncError> {
        let receipt = receipt.trim();
        if receipt.is_empty() {
            return Err(IapSyncError::Validation("receipt is required".into()));
        }
        let transaction = self.app_store.verify_transaction(receipt)?;
        if transaction.user_id() != Some(user_id) {
            return Err(IapSyncError::Validation(
                "receipt is not bound to this user".into(),
            ));
        }
        let expires_date = transaction.expires_date.ok_or_else(|| {
            IapSyncError::Validation("receipt carries no expiration date".into())
        })?;
        let plan = self
            .catalog
            .find_by_product_id(&transaction.product_id)
            .await?
            .ok_or_else(|| {
                IapSyncError::Configuration(format!(
                    "no plan for product '{}'",
                    transaction.product_id
                ))
            })?;

        let original_transaction_id = transaction.original_transaction_id.as_str();
        let _user = self.locks.lock_user(user_id).await;
        let _transaction = self.locks.lock_transaction(original_transaction_id).await;

        let existing = self
            .subscriptions
            .find_first(
                &SubscriptionFilter::by_original_transaction_id(original_transaction_id),
                SortOrder::NewestFirst,
            )
            .await?;
        if let Some(existing) = &existing {
            if existing.user_id != user_id {
                return Err(IapSyncError::Validation(
                    "purchase is already linked to another user".into(),
                ));
            }
        }

        cancel_active_subscriptions(
            self.subscriptions.as_ref(),
            user_id,
            existing.as_ref().map(|s| s.id),
        )
        .await?;
        let subscription = match existing {
            Some(existing) => {
                self.subscriptions
                    .update(
                        existing.id,
                        SubscriptionPatch {
                            plan_id: Some(Some(plan.id)),
                            status: Some(SubscriptionStatus::Active),
                            expires_date: Some(Some(expires_date)),
                            latest_transaction_id: Some(Some(transaction.transaction_id.clone())),
                            ..Default::default()
                        },
                    )
                    .await?
            }
            None => {
                self.subscriptions
                    .create(
                        Subscription::active(
                            user_id,
                            plan.id,
                            Some(expires_date),
                            transaction.purchase_date,
                        )
                        .with_transactions(
                            original_transaction_id,
                            Some(transaction.transaction_id.clone()),
                        ),
                    )
                    .await?
            }
        };
        info!(
            subscription_id = subscription.id,
            original_transaction_id,
            "purchase activated"
        );

        self.queue_receipt(&transaction.transaction_id, user_id, receipt)
            .await?;

        self.active_subscription_of(subscription.user_id)
            .await?
            .ok_or_else(|| {
                IapSyncError::DataInconsistency(format!(
                    "subscription {} is not active after activation",
                    subscription.id
                ))
            })
    }

    pub async fn get_active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<SubscriptionDetails>, IapSyncError> {
        self.active_subscription_of(user_id).await
    }

    async fn active_subscription_of(
        &self,
        user_id: UserId,
    ) -> Result<Option<SubscriptionDetails>, IapSyncError> {
        let Some(subscription) = self
            .subscriptions
            .find_first(&SubscriptionFilter::active_for_user(user_id), SortOrder::NewestFirst)
            .await?
        else {
            return Ok(None);
        };
        let plan_id = subscription.plan_id.ok_or_else(|| {
            IapSyncError::DataInconsistency(format!(
                "active subscription {} has no plan",
                subscription.id
            ))
        })?;
        let plan = self.catalog.plan_with_details(plan_id).await?.ok_or_else(|| {
            IapSyncError::DataInconsistency(format!(
                "subscription {} refers to missing plan {plan_id}",
                subscription.id
            ))
        })?;
        Ok(Some(SubscriptionDetails { subscription, plan }))
    }

    async fn queue_receipt(
        &self,
        transaction_id: &str,
        user_id: UserId,
        receipt: &str,
    ) -> Result<(), IapSyncError> {
        let filter = PendingReceiptFilter {
            transaction_id: FieldFilter::Eq(transaction_id.to_owned()),
            ..Default::default()
        };
        if self.receipts.find_first(&filter, SortOrder::OldestFirst).await?.is_some() {
            return Ok(());
        }
        match self
            .receipts
            .create(PendingReceipt::new(transaction_id, user_id, receipt))
            .await
        {
            Ok(_) | Err(StoreError::UniqueViolation { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        domain::entities::pending_receipt::ReceiptStatus,
        storage::Storage,
        testing::{self, TestPki, BASIC_PRODUCT, PREMIUM_PRODUCT},
    };

    struct Fixture {
        pki: TestPki,
        storage: Storage,
        lifecycle: SubscriptionLifecycle,
        catalog: PlanCatalog,
    }

    async fn fixture() -> Fixture {
        let pki = TestPki::generate();
        let storage = Storage::in_memory();
        testing::seed_catalog(&storage).await;
        let catalog = PlanCatalog::new(
            storage.plans.clone(),
            storage.entitlements.clone(),
            "Free Plan",
        );
        let lifecycle = SubscriptionLifecycle::new(
            storage.subscriptions.clone(),
            storage.receipts.clone(),
            catalog.clone(),
            pki.repository(None),
            Arc::new(KeyedLocks::new()),
        );
        Fixture {
            pki,
            storage,
            lifecycle,
            catalog,
        }
    }

    async fn active_count(storage: &Storage, user_id: UserId) -> usize {
        storage
            .subscriptions
            .find(&SubscriptionFilter::active_for_user(user_id), FindOptions::default())
            .await
            .unwrap()
            .len()
    }

    fn receipt(f: &Fixture, transaction_id: &str, product: &str, token: Option<&str>) -> String {
        f.pki.sign(&testing::transaction_claims(
            transaction_id,
            transaction_id,
            product,
            token,
            Some(Utc::now() + Duration::days(30)),
        ))
    }

    #[tokio::test]
    async fn verify_purchase_activates_and_queues_receipt() {
        let f = fixture().await;
        let details = f
            .lifecycle
            .verify_purchase(&receipt(&f, "T1", BASIC_PRODUCT, Some("42")), UserId(42))
            .await
            .unwrap();

        assert_eq!(details.subscription.user_id, UserId(42));
        assert_eq!(details.subscription.status, SubscriptionStatus::Active);
        assert_eq!(details.subscription.original_transaction_id.as_deref(), Some("T1"));
        assert_eq!(details.plan.name, "Basic");

        let receipts = f
            .storage
            .receipts
            .find(&PendingReceiptFilter::default(), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].transaction_id, "T1");
        assert_eq!(receipts[0].status, ReceiptStatus::PendingVerification);
        assert_eq!(receipts[0].verification_attempts, 0);
    }

    #[tokio::test]
    async fn verify_purchase_rejects_foreign_or_missing_token() {
        let f = fixture().await;
        for token in [Some("7"), None] {
            let err = f
                .lifecycle
                .verify_purchase(&receipt(&f, "T1", BASIC_PRODUCT, token), UserId(42))
                .await
                .unwrap_err();
            assert!(matches!(err, IapSyncError::Validation(_)), "{err}");
        }
        assert_eq!(active_count(&f.storage, UserId(42)).await, 0);
    }

    #[tokio::test]
    async fn verify_purchase_rejects_untrusted_receipt_and_unknown_product() {
        let f = fixture().await;
        let forged = TestPki::generate().sign(&testing::transaction_claims(
            "T1",
            "T1",
            BASIC_PRODUCT,
            Some("42"),
            Some(Utc::now()),
        ));
        assert!(matches!(
            f.lifecycle.verify_purchase(&forged, UserId(42)).await,
            Err(IapSyncError::Verification(_))
        ));
        assert!(matches!(
            f.lifecycle
                .verify_purchase(&receipt(&f, "T2", "plan.unknown", Some("42")), UserId(42))
                .await,
            Err(IapSyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn verify_purchase_is_idempotent_per_original_transaction() {
        let f = fixture().await;
        let signed = receipt(&f, "T1", BASIC_PRODUCT, Some("42"));
        let first = f.lifecycle.verify_purchase(&signed, UserId(42)).await.unwrap();
        let second = f.lifecycle.verify_purchase(&signed, UserId(42)).await.unwrap();
        assert_eq!(first.subscription.id, second.subscription.id);
        assert_eq!(active_count(&f.storage, UserId(42)).await, 1);
        let receipts = f
            .storage
            .receipts
            .find(&PendingReceiptFilter::default(), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(receipts.len(), 1);
    }

    #[tokio::test]
    async fn purchase_supersedes_free_plan() {
        let f = fixture().await;
        let free = f.lifecycle.subscribe_free_plan(UserId(42)).await.unwrap();
        f.lifecycle
            .verify_purchase(&receipt(&f, "T1", PREMIUM_PRODUCT, Some("42")), UserId(42))
            .await
            .unwrap();

        let free = f.storage.subscriptions.find_by_id(free.id).await.unwrap().unwrap();
        assert_eq!(free.status, SubscriptionStatus::Canceled);
        assert_eq!(active_count(&f.storage, UserId(42)).await, 1);
    }

    #[tokio::test]
    async fn free_plan_enrollment_is_non_expiring() {
        let f = fixture().await;
        let first = f.lifecycle.subscribe_free_plan(UserId(1)).await.unwrap();
        let second = f.lifecycle.subscribe_free_plan(UserId(1)).await.unwrap();
        assert_eq!(second.expires_date, None);
        assert_ne!(first.id, second.id);
        assert_eq!(active_count(&f.storage, UserId(1)).await, 1);
    }

    #[tokio::test]
    async fn free_plan_enrollment_requires_a_free_plan() {
        let storage = Storage::in_memory();
        let catalog = PlanCatalog::new(storage.plans.clone(), storage.entitlements.clone(), "Free Plan");
        let lifecycle = SubscriptionLifecycle::new(
            storage.subscriptions.clone(),
            storage.receipts.clone(),
            catalog,
            TestPki::generate().repository(None),
            Arc::new(KeyedLocks::new()),
        );
        assert!(matches!(
            lifecycle.subscribe_free_plan(UserId(1)).await,
            Err(IapSyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_to_plan_extends_same_plan_and_switches_otherwise() {
        let f = fixture().await;
        let basic = f.catalog.find_by_product_id(BASIC_PRODUCT).await.unwrap().unwrap();
        let premium = f.catalog.find_by_product_id(PREMIUM_PRODUCT).await.unwrap().unwrap();

        let first = f.lifecycle.subscribe_to_plan(UserId(5), basic.id).await.unwrap();
        let expires = first.expires_date.unwrap();
        assert!(expires > Utc::now() + Duration::days(29));

        let extended = f.lifecycle.subscribe_to_plan(UserId(5), basic.id).await.unwrap();
        assert_eq!(extended.id, first.id);

        let switched = f.lifecycle.subscribe_to_plan(UserId(5), premium.id).await.unwrap();
        assert_ne!(switched.id, first.id);
        let first = f.storage.subscriptions.find_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, SubscriptionStatus::Canceled);
        assert_eq!(active_count(&f.storage, UserId(5)).await, 1);

        let free = f.catalog.find_free_plan().await.unwrap().unwrap();
        let on_free = f.lifecycle.subscribe_to_plan(UserId(5), free.id).await.unwrap();
        assert_eq!(on_free.expires_date, None);

        assert!(matches!(
            f.lifecycle.subscribe_to_plan(UserId(5), 999).await,
            Err(IapSyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn active_subscription_view() {
        let f = fixture().await;
        assert!(f.lifecycle.get_active_subscription(UserId(9)).await.unwrap().is_none());

        f.lifecycle.subscribe_free_plan(UserId(9)).await.unwrap();
        let details = f.lifecycle.get_active_subscription(UserId(9)).await.unwrap().unwrap();
        assert_eq!(details.plan.name, "Free Plan");
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["userId"], 9);
        assert_eq!(json["plan"]["features"][0]["name"], "Editor");
    }

    #[tokio::test]
    async fn active_subscription_without_plan_is_inconsistent() {
        let f = fixture().await;
        let created = f.lifecycle.subscribe_free_plan(UserId(9)).await.unwrap();
        f.storage
            .subscriptions
            .update(
                created.id,
                SubscriptionPatch {
                    plan_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            f.lifecycle.get_active_subscription(UserId(9)).await,
            Err(IapSyncError::DataInconsistency(_))
        ));
    }
}
