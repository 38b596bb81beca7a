use std::sync::Arc;

use crate::{
    data::{
        datasources::signed_data_verifier::SignedDataVerifier,
        models::{
            app_store_server_api::{
                jws_renewal_info_decoded_payload_model::JwsRenewalInfoDecodedPayloadModel,
                jws_transaction_decoded_payload_model::JwsTransactionDecodedPayloadModel,
            },
            app_store_server_notifications::{
                response_body_v2_decoded_payload_model::ResponseBodyV2DecodedPayloadModel,
                response_body_v2_model::ResponseBodyV2Model,
            },
        },
    },
    errors::IapSyncError,
};

pub(crate) trait AppStoreServerNotificationDatasource: Send + Sync {
    /// Parse App Store Server Notification:
    /// https://developer.apple.com/documentation/appstoreservernotifications/app-store-server-notifications-v2
    ///
    /// notification:
    ///   The raw POST body of the notification.
    ///
    /// Only the envelope is verified; the nested signed transaction and
    /// renewal info are returned still signed.
    fn parse_notification(
        &self,
        notification: &str,
    ) -> Result<ResponseBodyV2DecodedPayloadModel, IapSyncError>;

    /// Verify and decode a JWSTransaction, whether nested in a notification,
    /// returned by the App Store Server API, or submitted by a client.
    fn decode_transaction(
        &self,
        signed_transaction_info: &str,
    ) -> Result<JwsTransactionDecodedPayloadModel, IapSyncError>;

    fn decode_renewal_info(
        &self,
        signed_renewal_info: &str,
    ) -> Result<JwsRenewalInfoDecodedPayloadModel, IapSyncError>;
}

pub(crate) struct AppStoreServerNotificationDatasourceImpl {
    verifier: Arc<SignedDataVerifier>,
}

impl AppStoreServerNotificationDatasource for AppStoreServerNotificationDatasourceImpl {
    fn parse_notification(
        &self,
        notification: &str,
    ) -> Result<ResponseBodyV2DecodedPayloadModel, IapSyncError> {
        let wrapper: ResponseBodyV2Model = serde_json::from_str(notification).map_err(|e| {
            IapSyncError::Verification(format!("notification body is not a signed payload: {e}"))
        })?;
        self.verifier.verify_and_decode(&wrapper.signed_payload)
    }

    fn decode_transaction(
        &self,
        signed_transaction_info: &str,
    ) -> Result<JwsTransactionDecodedPayloadModel, IapSyncError> {
        self.verifier.verify_and_decode(signed_transaction_info)
    }

    fn decode_renewal_info(
        &self,
        signed_renewal_info: &str,
    ) -> Result<JwsRenewalInfoDecodedPayloadModel, IapSyncError> {
        self.verifier.verify_and_decode(signed_renewal_info)
    }
}

impl AppStoreServerNotificationDatasourceImpl {
    pub(crate) fn new(verifier: Arc<SignedDataVerifier>) -> Self {
        Self { verifier }
    }
}
