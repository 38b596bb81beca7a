use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::IapSyncConfig,
    data::{
        datasources::{
            app_store_server_api_datasource::{
                AppStoreServerApiDatasource, AppStoreServerApiDatasourceImpl,
            },
            app_store_server_notification_datasource::{
                AppStoreServerNotificationDatasource, AppStoreServerNotificationDatasourceImpl,
            },
            signed_data_verifier::SignedDataVerifier,
        },
        models::{
            app_store_server_api::{
                common, jws_renewal_info_decoded_payload_model as ar,
                jws_transaction_decoded_payload_model as at,
            },
            app_store_server_notifications::response_body_v2_decoded_payload_model as an,
        },
    },
    domain::{
        entities::{
            app_store_transaction::{AppStoreTransaction, OfferType, RenewalInfo, RevocationReason},
            server_notification::{NotificationKind, ServerNotification},
        },
        repositories::app_store_repository::AppStoreRepository,
    },
    errors::{ConfigError, IapSyncError},
};

pub(crate) struct AppStoreRepositoryImpl<
    A: AppStoreServerApiDatasource,
    B: AppStoreServerNotificationDatasource,
> {
    /// `None` when no API credentials are configured (mock mode).
    app_store_server_api_datasource: Option<A>,
    app_store_server_notification_datasource: B,
    bundle_id: String,
}

#[async_trait]
impl<A: AppStoreServerApiDatasource, B: AppStoreServerNotificationDatasource> AppStoreRepository
    for AppStoreRepositoryImpl<A, B>
{
    fn parse_notification(&self, body: &str) -> Result<ServerNotification, IapSyncError> {
        let payload = self
            .app_store_server_notification_datasource
            .parse_notification(body)?;
        let data = payload.data;
        if let Some(bundle_id) = data.as_ref().and_then(|d| d.bundle_id.as_deref()) {
            self.check_bundle_id(bundle_id)?;
        }
        Ok(ServerNotification {
            kind: NotificationKind::from_apple_notification(
                &payload.notification_type,
                payload.subtype.as_ref(),
            ),
            notification_type: payload.notification_type.as_str().to_owned(),
            subtype: payload.subtype.as_ref().map(|s| s.as_str().to_owned()),
            notification_uuid: payload.notification_uuid,
            signed_date: payload.signed_date,
            signed_transaction_info: data
                .as_ref()
                .and_then(|d| d.signed_transaction_info.clone()),
            signed_renewal_info: data.and_then(|d| d.signed_renewal_info),
        })
    }

    fn verify_transaction(
        &self,
        signed_transaction: &str,
    ) -> Result<AppStoreTransaction, IapSyncError> {
        let m = self
            .app_store_server_notification_datasource
            .decode_transaction(signed_transaction)?;
        self.check_bundle_id(&m.bundle_id)?;
        Ok(AppStoreTransaction::from_apple_transaction(m))
    }

    fn verify_renewal_info(&self, signed_renewal_info: &str) -> Result<RenewalInfo, IapSyncError> {
        let m = self
            .app_store_server_notification_datasource
            .decode_renewal_info(signed_renewal_info)?;
        Ok(RenewalInfo::from_apple_renewal_info(m))
    }

    async fn fetch_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<AppStoreTransaction, IapSyncError> {
        let api = self.app_store_server_api_datasource.as_ref().ok_or_else(|| {
            IapSyncError::Configuration("App Store Server API credentials are not configured".into())
        })?;
        let response = api.get_transaction_info(transaction_id).await?;
        self.verify_transaction(&response.signed_transaction_info)
    }
}

impl<A: AppStoreServerApiDatasource, B: AppStoreServerNotificationDatasource>
    AppStoreRepositoryImpl<A, B>
{
    pub(crate) fn with_datasources(
        app_store_server_api_datasource: Option<A>,
        app_store_server_notification_datasource: B,
        bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            app_store_server_api_datasource,
            app_store_server_notification_datasource,
            bundle_id: bundle_id.into(),
        }
    }

    fn check_bundle_id(&self, bundle_id: &str) -> Result<(), IapSyncError> {
        if bundle_id == self.bundle_id {
            Ok(())
        } else {
            Err(IapSyncError::Verification(format!(
                "payload is for bundle '{bundle_id}', expected '{}'",
                self.bundle_id
            )))
        }
    }
}

impl AppStoreRepositoryImpl<AppStoreServerApiDatasourceImpl, AppStoreServerNotificationDatasourceImpl> {
    pub(crate) fn new(
        verifier: Arc<SignedDataVerifier>,
        config: &IapSyncConfig,
    ) -> Result<Self, ConfigError> {
        let api = config
            .api_credentials
            .as_ref()
            .map(|credentials| {
                AppStoreServerApiDatasourceImpl::new(
                    &config.api_base_url,
                    credentials,
                    &config.bundle_id,
                )
            })
            .transpose()?;
        Ok(Self::with_datasources(
            api,
            AppStoreServerNotificationDatasourceImpl::new(verifier),
            config.bundle_id.clone(),
        ))
    }
}

impl NotificationKind {
    fn from_apple_notification(
        notification_type: &an::NotificationType,
        subtype: Option<&an::NotificationSubtype>,
    ) -> Self {
        use an::{NotificationSubtype as S, NotificationType as T};
        match notification_type {
            T::Subscribed => NotificationKind::Subscribed,
            T::DidRenew => NotificationKind::DidRenew,
            T::DidChangeRenewalPref => NotificationKind::DidChangeRenewalPref,
            T::DidChangeRenewalStatus => NotificationKind::DidChangeRenewalStatus {
                auto_renew: match subtype {
                    Some(S::AutoRenewEnabled) => Some(true),
                    Some(S::AutoRenewDisabled) => Some(false),
                    _ => None,
                },
            },
            T::DidFailToRenew => NotificationKind::DidFailToRenew {
                grace_period: subtype == Some(&S::GracePeriod),
            },
            T::Expired => NotificationKind::Expired,
            T::Refund => NotificationKind::Refund,
            T::Revoke => NotificationKind::Revoke,
            T::OfferRedeemed => NotificationKind::OfferRedeemed,
            T::PriceIncrease => NotificationKind::PriceIncrease {
                accepted: subtype == Some(&S::Accepted),
            },
            T::Test => NotificationKind::Test,
            other => NotificationKind::Unhandled(other.as_str().to_owned()),
        }
    }
}

impl AppStoreTransaction {
    fn from_apple_transaction(m: at::JwsTransactionDecodedPayloadModel) -> Self {
        AppStoreTransaction {
            transaction_id: m.transaction_id,
            original_transaction_id: m.original_transaction_id,
            product_id: m.product_id,
            bundle_id: m.bundle_id,
            // Apple sends an empty string when the app set no token.
            app_account_token: m.app_account_token.filter(|t| !t.is_empty()),
            purchase_date: m.purchase_date,
            expires_date: m.expires_date,
            revocation_date: m.revocation_date,
            revocation_reason: m.revocation_reason.map(RevocationReason::from_code),
            offer_type: m.offer_type.map(|t| match t {
                common::OfferType::Introductory => OfferType::Introductory,
                common::OfferType::Promotional => OfferType::Promotional,
                common::OfferType::OfferCode => OfferType::OfferCode,
                common::OfferType::WinBack => OfferType::WinBack,
            }),
            offer_identifier: m.offer_identifier,
        }
    }
}

impl RenewalInfo {
    fn from_apple_renewal_info(m: ar::JwsRenewalInfoDecodedPayloadModel) -> Self {
        RenewalInfo {
            product_id: m.product_id,
            auto_renew_product_id: m.auto_renew_product_id,
            auto_renew_enabled: m.auto_renew_status == Some(ar::AutoRenewStatus::On),
            original_transaction_id: m.original_transaction_id,
        }
    }
}
