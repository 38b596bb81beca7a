#![allow(dead_code)]

use chrono::{serde::ts_milliseconds_option, DateTime, Utc};
use serde::Deserialize;
use serde_repr::Deserialize_repr;

use super::common::Environment;

/// Data structure for the decoded payload of a JWSRenewalInfo.
///
/// https://developer.apple.com/documentation/appstoreserverapi/jwsrenewalinfodecodedpayload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JwsRenewalInfoDecodedPayloadModel {
    /// The product identifier of the product that renews at the next billing
    /// period.
    pub(crate) auto_renew_product_id: Option<String>,
    /// The renewal status of the auto-renewable subscription.
    pub(crate) auto_renew_status: Option<AutoRenewStatus>,
    pub(crate) environment: Option<Environment>,
    /// The time when the billing grace period for subscription renewals
    /// expires.
    #[serde(default, with = "ts_milliseconds_option")]
    pub(crate) grace_period_expires_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) is_in_billing_retry_period: bool,
    pub(crate) original_transaction_id: Option<String>,
    /// The product identifier of the current subscription.
    pub(crate) product_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize_repr)]
#[repr(u8)]
pub(crate) enum AutoRenewStatus {
    /// Automatic renewal is off. The customer has turned off automatic
    /// renewal for the subscription, and it won't renew at the end of the
    /// current subscription period.
    Off = 0,
    /// Automatic renewal is on. The subscription renews at the end of the
    /// current subscription period.
    On = 1,
}
