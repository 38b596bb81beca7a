use async_trait::async_trait;

use crate::{
    domain::entities::{
        app_store_transaction::{AppStoreTransaction, RenewalInfo},
        server_notification::ServerNotification,
    },
    errors::IapSyncError,
};

/// Everything the App Store tells us, verified.
///
/// All signed payloads are checked against the trusted root certificate and
/// against the configured bundle id before they are returned.
#[async_trait]
pub trait AppStoreRepository: Send + Sync {
    /// Verify an App Store Server Notification V2 request body.
    fn parse_notification(&self, body: &str) -> Result<ServerNotification, IapSyncError>;

    fn verify_transaction(&self, signed_transaction: &str)
        -> Result<AppStoreTransaction, IapSyncError>;

    fn verify_renewal_info(&self, signed_renewal_info: &str) -> Result<RenewalInfo, IapSyncError>;

    /// Ask the App Store Server API for a transaction. A transaction the API
    /// does not know yet fails with `TransientUpstream`.
    async fn fetch_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<AppStoreTransaction, IapSyncError>;
}
