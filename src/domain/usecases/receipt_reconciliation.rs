use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::ReconciliationSettings,
    domain::{
        entities::{
            audit_record::{AuditEvent, AuditRecord, AuditStatus},
            pending_receipt::{PendingReceipt, PendingReceiptFilter, PendingReceiptPatch, ReceiptStatus},
        },
        repositories::{
            app_store_repository::AppStoreRepository,
            entity_store::{EntityStore, FieldFilter, FindOptions, Record},
        },
    },
    errors::IapSyncError,
};

use super::audit_log::AuditLog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub verified: usize,
    pub still_pending: usize,
    pub failed: usize,
}

enum Outcome {
    Verified,
    StillPending,
    Failed,
}

/// Confirms queued client receipts against the App Store Server API.
///
/// A receipt the API does not know yet stays pending until it has used up
/// `max_attempts`; any other failure is final.
pub struct ReceiptReconciliation {
    receipts: Arc<dyn EntityStore<PendingReceipt>>,
    app_store: Arc<dyn AppStoreRepository>,
    audit: AuditLog,
    settings: ReconciliationSettings,
}

impl ReceiptReconciliation {
    pub fn new(
        receipts: Arc<dyn EntityStore<PendingReceipt>>,
        app_store: Arc<dyn AppStoreRepository>,
        audit: AuditLog,
        settings: ReconciliationSettings,
    ) -> Self {
        Self {
            receipts,
            app_store,
            audit,
            settings,
        }
    }

    /// Process one batch of pending receipts, oldest first.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> Result<ReconciliationReport, IapSyncError> {
        let due = self
            .receipts
            .find(
                &PendingReceiptFilter {
                    status: FieldFilter::Eq(ReceiptStatus::PendingVerification),
                    verification_attempts: FieldFilter::Lt(self.settings.max_attempts),
                    ..Default::default()
                },
                FindOptions::oldest_first().limit(self.settings.batch_size),
            )
            .await?;

        let mut report = ReconciliationReport::default();
        for receipt in due {
            match self.reconcile(&receipt).await {
                Ok(Outcome::Verified) => report.verified += 1,
                Ok(Outcome::StillPending) => report.still_pending += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(e) => {
                    // Store trouble on one receipt must not stop the batch.
                    error!(receipt_id = receipt.id, error = %e, "receipt reconciliation aborted");
                    report.still_pending += 1;
                }
            }
        }
        if report != ReconciliationReport::default() {
            info!(?report, "receipt reconciliation batch done");
        }
        Ok(report)
    }

    /// Run a batch every `interval` until the task is dropped.
    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "receipt reconciliation batch failed");
            }
        }
    }

    async fn reconcile(&self, receipt: &Record<PendingReceipt>) -> Result<Outcome, IapSyncError> {
        let attempted = self
            .receipts
            .update(receipt.id, PendingReceiptPatch::attempt(Utc::now()))
            .await?;

        let result = if self.settings.mock_upstream {
            self.app_store.verify_transaction(&receipt.raw_receipt)
        } else {
            self.app_store.fetch_transaction(&receipt.transaction_id).await
        };
        let result = result.and_then(|transaction| {
            if transaction.transaction_id == receipt.transaction_id {
                Ok(transaction)
            } else {
                Err(IapSyncError::Verification(format!(
                    "upstream returned transaction {} for {}",
                    transaction.transaction_id, receipt.transaction_id
                )))
            }
        });

        match result {
            Ok(_) => {
                self.receipts
                    .update(receipt.id, PendingReceiptPatch::status(ReceiptStatus::Verified))
                    .await?;
                debug!(transaction_id = %receipt.transaction_id, "receipt verified");
                Ok(Outcome::Verified)
            }
            Err(e @ IapSyncError::TransientUpstream(_))
                if attempted.verification_attempts < self.settings.max_attempts =>
            {
                debug!(
                    transaction_id = %receipt.transaction_id,
                    attempts = attempted.verification_attempts,
                    error = %e,
                    "receipt not yet visible upstream"
                );
                self.record_failure(&attempted, &e, false).await;
                Ok(Outcome::StillPending)
            }
            Err(e) => {
                self.receipts
                    .update(
                        receipt.id,
                        PendingReceiptPatch::status(ReceiptStatus::FailedVerification),
                    )
                    .await?;
                warn!(
                    transaction_id = %receipt.transaction_id,
                    attempts = attempted.verification_attempts,
                    error = %e,
                    "receipt verification failed"
                );
                self.record_failure(&attempted, &e, true).await;
                Ok(Outcome::Failed)
            }
        }
    }

    async fn record_failure(&self, receipt: &Record<PendingReceipt>, e: &IapSyncError, is_final: bool) {
        self.audit
            .record(
                AuditRecord::new(
                    AuditEvent::ReceiptVerificationFailed,
                    AuditStatus::Failure,
                    format!("receipt {} not verified: {e}", receipt.transaction_id),
                )
                .user(receipt.user_id)
                .details(json!({
                    "receiptId": receipt.id,
                    "transactionId": receipt.transaction_id,
                    "attempts": receipt.verification_attempts,
                    "final": is_final,
                    "error": e.to_string(),
                })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        domain::entities::{audit_record::AuditRecordFilter, subscription::UserId},
        storage::Storage,
        testing::{self, ScriptedApi, TestPki, BASIC_PRODUCT},
    };

    struct Fixture {
        pki: TestPki,
        api: ScriptedApi,
        storage: Storage,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pki: TestPki::generate(),
                api: ScriptedApi::default(),
                storage: Storage::in_memory(),
            }
        }

        fn job(&self, settings: ReconciliationSettings) -> ReceiptReconciliation {
            ReceiptReconciliation::new(
                self.storage.receipts.clone(),
                self.pki.repository(Some(self.api.clone())),
                AuditLog::new(self.storage.audit_records.clone()),
                settings,
            )
        }

        fn signed(&self, transaction_id: &str) -> String {
            self.pki.sign(&testing::transaction_claims(
                transaction_id,
                transaction_id,
                BASIC_PRODUCT,
                Some("42"),
                Some(Utc::now() + Duration::days(30)),
            ))
        }

        async fn queue(&self, transaction_id: &str) -> Record<PendingReceipt> {
            self.storage
                .receipts
                .create(PendingReceipt::new(transaction_id, UserId(42), self.signed(transaction_id)))
                .await
                .unwrap()
        }

        async fn reload(&self, receipt: &Record<PendingReceipt>) -> Record<PendingReceipt> {
            self.storage.receipts.find_by_id(receipt.id).await.unwrap().unwrap()
        }

        async fn failure_audits(&self) -> usize {
            self.storage
                .audit_records
                .find(
                    &AuditRecordFilter::event(AuditEvent::ReceiptVerificationFailed),
                    FindOptions::default(),
                )
                .await
                .unwrap()
                .len()
        }
    }

    fn settings(max_attempts: u32) -> ReconciliationSettings {
        ReconciliationSettings {
            max_attempts,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn verifies_receipt_known_upstream() {
        let f = Fixture::new();
        let receipt = f.queue("T1").await;
        f.api.respond_signed("T1", f.signed("T1"));

        let report = f.job(settings(3)).run_once().await.unwrap();

        assert_eq!(report.verified, 1);
        let receipt = f.reload(&receipt).await;
        assert_eq!(receipt.status, ReceiptStatus::Verified);
        assert_eq!(receipt.verification_attempts, 1);
        assert!(receipt.last_attempt_at.is_some());
        assert_eq!(f.api.calls(), vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_receipt_stays_pending_until_attempts_run_out() {
        let f = Fixture::new();
        let receipt = f.queue("T1").await;
        f.api.respond_not_found("T1");
        let job = f.job(settings(2));

        let first = job.run_once().await.unwrap();
        assert_eq!(first.still_pending, 1);
        let after_first = f.reload(&receipt).await;
        assert_eq!(after_first.status, ReceiptStatus::PendingVerification);
        assert_eq!(after_first.verification_attempts, 1);

        let second = job.run_once().await.unwrap();
        assert_eq!(second.failed, 1);
        let after_second = f.reload(&receipt).await;
        assert_eq!(after_second.status, ReceiptStatus::FailedVerification);
        assert_eq!(after_second.verification_attempts, 2);

        // Nothing is left to pick up.
        assert_eq!(job.run_once().await.unwrap(), ReconciliationReport::default());
        assert_eq!(f.api.calls().len(), 2);
        assert_eq!(f.failure_audits().await, 2);
    }

    #[tokio::test]
    async fn upstream_error_fails_immediately_without_stopping_batch() {
        let f = Fixture::new();
        let broken = f.queue("T1").await;
        let fine = f.queue("T2").await;
        f.api.respond_error("T1");
        f.api.respond_signed("T2", f.signed("T2"));

        let report = f.job(settings(72)).run_once().await.unwrap();

        assert_eq!(
            report,
            ReconciliationReport {
                verified: 1,
                still_pending: 0,
                failed: 1
            }
        );
        assert_eq!(f.reload(&broken).await.status, ReceiptStatus::FailedVerification);
        assert_eq!(f.reload(&fine).await.status, ReceiptStatus::Verified);
        assert_eq!(f.failure_audits().await, 1);
    }

    #[tokio::test]
    async fn mismatching_upstream_transaction_is_rejected() {
        let f = Fixture::new();
        let receipt = f.queue("T1").await;
        f.api.respond_signed("T1", f.signed("T7"));

        let report = f.job(settings(72)).run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(f.reload(&receipt).await.status, ReceiptStatus::FailedVerification);
    }

    #[tokio::test]
    async fn batch_is_bounded_and_oldest_first() {
        let f = Fixture::new();
        for id in ["T1", "T2", "T3"] {
            f.queue(id).await;
            f.api.respond_signed(id, f.signed(id));
        }
        let job = f.job(ReconciliationSettings {
            batch_size: 2,
            ..settings(72)
        });

        assert_eq!(job.run_once().await.unwrap().verified, 2);
        assert_eq!(f.api.calls(), vec!["T1".to_string(), "T2".to_string()]);
        assert_eq!(job.run_once().await.unwrap().verified, 1);
    }

    #[tokio::test]
    async fn mock_mode_verifies_stored_receipt_locally() {
        let f = Fixture::new();
        let receipt = f.queue("T1").await;
        let job = f.job(ReconciliationSettings {
            mock_upstream: true,
            ..settings(72)
        });

        assert_eq!(job.run_once().await.unwrap().verified, 1);
        assert_eq!(f.reload(&receipt).await.status, ReceiptStatus::Verified);
        assert!(f.api.calls().is_empty());
    }
}
