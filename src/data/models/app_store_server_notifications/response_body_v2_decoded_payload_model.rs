#![allow(dead_code)]

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::data::models::app_store_server_api::common::Environment;

type AppleIdType = u64;
type JWSTransaction = String;
type JWSRenewalInfo = String;

/// A decoded payload that contains the version 2 notification data.
///
/// https://developer.apple.com/documentation/appstoreservernotifications/responsebodyv2decodedpayload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResponseBodyV2DecodedPayloadModel {
    /// The in-app purchase event for which the App Store sends this version 2
    /// notification.
    pub(crate) notification_type: NotificationType,
    /// Additional information that identifies the notification event. The
    /// subtype field is present only for specific version 2 notifications.
    pub(crate) subtype: Option<NotificationSubtype>,
    /// The object that contains the app metadata and signed renewal and
    /// transaction information.
    ///
    /// The data, summary, and externalPurchaseToken fields are mutually
    /// exclusive. The payload contains only one of these fields.
    pub(crate) data: Option<NotificationData>,
    /// A string that indicates the notification’s App Store Server
    /// Notifications version number.
    pub(crate) version: Option<String>,
    /// The UNIX time, in milliseconds, that the App Store signed the JSON Web
    /// Signature data.
    #[serde(with = "ts_milliseconds")]
    pub(crate) signed_date: DateTime<Utc>,
    /// A unique identifier for the notification. Use this value to identify a
    /// duplicate notification.
    #[serde(rename = "notificationUUID")]
    pub(crate) notification_uuid: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum NotificationType {
    Subscribed,
    DidChangeRenewalPref,
    DidChangeRenewalStatus,
    OfferRedeemed,
    DidRenew,
    Expired,
    DidFailToRenew,
    GracePeriodExpired,
    PriceIncrease,
    Refund,
    RefundDeclined,
    RefundReversed,
    RenewalExtended,
    RenewalExtension,
    Revoke,
    Test,
    ExternalPurchaseToken,
    OneTimeCharge,
    ConsumptionRequest,

    #[serde(untagged)]
    Unknown(String),
}

impl NotificationType {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            NotificationType::Subscribed => "SUBSCRIBED",
            NotificationType::DidChangeRenewalPref => "DID_CHANGE_RENEWAL_PREF",
            NotificationType::DidChangeRenewalStatus => "DID_CHANGE_RENEWAL_STATUS",
            NotificationType::OfferRedeemed => "OFFER_REDEEMED",
            NotificationType::DidRenew => "DID_RENEW",
            NotificationType::Expired => "EXPIRED",
            NotificationType::DidFailToRenew => "DID_FAIL_TO_RENEW",
            NotificationType::GracePeriodExpired => "GRACE_PERIOD_EXPIRED",
            NotificationType::PriceIncrease => "PRICE_INCREASE",
            NotificationType::Refund => "REFUND",
            NotificationType::RefundDeclined => "REFUND_DECLINED",
            NotificationType::RefundReversed => "REFUND_REVERSED",
            NotificationType::RenewalExtended => "RENEWAL_EXTENDED",
            NotificationType::RenewalExtension => "RENEWAL_EXTENSION",
            NotificationType::Revoke => "REVOKE",
            NotificationType::Test => "TEST",
            NotificationType::ExternalPurchaseToken => "EXTERNAL_PURCHASE_TOKEN",
            NotificationType::OneTimeCharge => "ONE_TIME_CHARGE",
            NotificationType::ConsumptionRequest => "CONSUMPTION_REQUEST",
            NotificationType::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum NotificationSubtype {
    InitialBuy,
    Resubscribe,
    Downgrade,
    Upgrade,
    AutoRenewEnabled,
    AutoRenewDisabled,
    Voluntary,
    BillingRetry,
    PriceIncrease,
    GracePeriod,
    Pending,
    Accepted,
    BillingRecovery,
    ProductNotForSale,
    Summary,
    Failure,
    Unreported,

    #[serde(untagged)]
    Unknown(String),
}

impl NotificationSubtype {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            NotificationSubtype::InitialBuy => "INITIAL_BUY",
            NotificationSubtype::Resubscribe => "RESUBSCRIBE",
            NotificationSubtype::Downgrade => "DOWNGRADE",
            NotificationSubtype::Upgrade => "UPGRADE",
            NotificationSubtype::AutoRenewEnabled => "AUTO_RENEW_ENABLED",
            NotificationSubtype::AutoRenewDisabled => "AUTO_RENEW_DISABLED",
            NotificationSubtype::Voluntary => "VOLUNTARY",
            NotificationSubtype::BillingRetry => "BILLING_RETRY",
            NotificationSubtype::PriceIncrease => "PRICE_INCREASE",
            NotificationSubtype::GracePeriod => "GRACE_PERIOD",
            NotificationSubtype::Pending => "PENDING",
            NotificationSubtype::Accepted => "ACCEPTED",
            NotificationSubtype::BillingRecovery => "BILLING_RECOVERY",
            NotificationSubtype::ProductNotForSale => "PRODUCT_NOT_FOR_SALE",
            NotificationSubtype::Summary => "SUMMARY",
            NotificationSubtype::Failure => "FAILURE",
            NotificationSubtype::Unreported => "UNREPORTED",
            NotificationSubtype::Unknown(raw) => raw,
        }
    }
}

/// The app metadata and the signed renewal and transaction information.
///
/// https://developer.apple.com/documentation/appstoreservernotifications/data
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationData {
    /// The unique identifier of the app that the notification applies to.
    /// This property is available for apps that users download from the App
    /// Store. It isn’t present in the sandbox environment.
    pub(crate) app_apple_id: Option<AppleIdType>,
    /// The bundle identifier of the app.
    pub(crate) bundle_id: Option<String>,
    /// The version of the build that identifies an iteration of the bundle.
    pub(crate) bundle_version: Option<String>,
    /// The server environment that the notification applies to, either
    /// sandbox or production.
    pub(crate) environment: Option<Environment>,
    /// Subscription renewal information signed by the App Store, in JSON Web
    /// Signature (JWS) format. This field appears only for notifications
    /// that apply to auto-renewable subscriptions.
    pub(crate) signed_renewal_info: Option<JWSRenewalInfo>,
    /// Transaction information signed by the App Store, in JSON Web Signature
    /// (JWS) format.
    pub(crate) signed_transaction_info: Option<JWSTransaction>,
}
