use std::sync::Arc;

use crate::{
    config::IapSyncConfig,
    data::{
        datasources::signed_data_verifier::SignedDataVerifier,
        repositories::app_store_repository_impl::AppStoreRepositoryImpl,
    },
    domain::{
        entities::subscription::{Subscription, UserId},
        repositories::{
            app_store_repository::AppStoreRepository,
            entity_store::{EntityId, Record},
        },
        usecases::{
            audit_log::AuditLog,
            notification_handlers::NotificationHandlers,
            notification_ingest::{IngestOutcome, NotificationIngest},
            plan_catalog::{PlanCatalog, PlanDetails},
            receipt_reconciliation::{ReceiptReconciliation, ReconciliationReport},
            subscription_lifecycle::{SubscriptionDetails, SubscriptionLifecycle},
            transaction_locks::KeyedLocks,
        },
    },
    errors::{ConfigError, IapSyncError},
    storage::Storage,
};

/// Entry point wiring App Store verification, the notification pipeline and
/// the subscription services onto one `Storage`.
pub struct IapSyncUtil {
    catalog: PlanCatalog,
    ingest: NotificationIngest,
    lifecycle: SubscriptionLifecycle,
    reconciliation: Arc<ReceiptReconciliation>,
}

impl IapSyncUtil {
    /// Loads the trusted root certificate named by `config`. Fails when it
    /// cannot be read or parsed.
    pub fn new(config: &IapSyncConfig, storage: Storage) -> Result<Self, ConfigError> {
        let root_certificate = config.load_root_certificate()?;
        let verifier = Arc::new(SignedDataVerifier::new(&root_certificate)?);
        let app_store = AppStoreRepositoryImpl::new(verifier, config)?;
        Ok(Self::with_repository(config, storage, Arc::new(app_store)))
    }

    pub(crate) fn with_repository(
        config: &IapSyncConfig,
        storage: Storage,
        app_store: Arc<dyn AppStoreRepository>,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let audit = AuditLog::new(storage.audit_records.clone());
        let catalog = PlanCatalog::new(
            storage.plans.clone(),
            storage.entitlements.clone(),
            config.free_plan_name.clone(),
        );
        let handlers =
            NotificationHandlers::new(storage.subscriptions.clone(), catalog.clone(), audit.clone());
        Self {
            ingest: NotificationIngest::new(
                storage.notifications.clone(),
                storage.subscriptions.clone(),
                app_store.clone(),
                handlers,
                catalog.clone(),
                audit.clone(),
                locks.clone(),
            ),
            lifecycle: SubscriptionLifecycle::new(
                storage.subscriptions.clone(),
                storage.receipts.clone(),
                catalog.clone(),
                app_store.clone(),
                locks,
            ),
            reconciliation: Arc::new(ReceiptReconciliation::new(
                storage.receipts.clone(),
                app_store,
                audit,
                config.reconciliation,
            )),
            catalog,
        }
    }

    pub async fn handle_apple_notification(
        &self,
        body: &str,
    ) -> Result<IngestOutcome, IapSyncError> {
        self.ingest.ingest(body).await
    }

    pub async fn subscribe_free_plan(
        &self,
        user_id: UserId,
    ) -> Result<Record<Subscription>, IapSyncError> {
        self.lifecycle.subscribe_free_plan(user_id).await
    }

    pub async fn subscribe_to_plan(
        &self,
        user_id: UserId,
        plan_id: EntityId,
    ) -> Result<Record<Subscription>, IapSyncError> {
        self.lifecycle.subscribe_to_plan(user_id, plan_id).await
    }

    pub async fn verify_apple_purchase(
        &self,
        receipt: &str,
        user_id: UserId,
    ) -> Result<SubscriptionDetails, IapSyncError> {
        self.lifecycle.verify_purchase(receipt, user_id).await
    }

    pub async fn get_active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<SubscriptionDetails>, IapSyncError> {
        self.lifecycle.get_active_subscription(user_id).await
    }

    pub async fn all_plans_with_details(&self) -> Result<Vec<PlanDetails>, IapSyncError> {
        self.catalog.all_plans_with_details().await
    }

    pub async fn plan_with_details(
        &self,
        plan_id: EntityId,
    ) -> Result<Option<PlanDetails>, IapSyncError> {
        self.catalog.plan_with_details(plan_id).await
    }

    pub async fn reconcile_receipts(&self) -> Result<ReconciliationReport, IapSyncError> {
        self.reconciliation.run_once().await
    }

    /// Background reconciliation loop, for `tokio::spawn`.
    pub fn reconciliation_task(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        self.reconciliation.clone().run_forever()
    }
}
