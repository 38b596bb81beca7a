#![allow(dead_code)]

use chrono::{
    serde::{ts_milliseconds, ts_milliseconds_option},
    DateTime, Utc,
};
use serde::Deserialize;

use super::common::{Environment, OfferType};

/// Data structure for the decoded payload of a JWSTransaction, returned by the
/// App Store Server API and nested in App Store Server Notifications.
///
/// https://developer.apple.com/documentation/appstoreserverapi/jwstransactiondecodedpayload
///
/// Only the fields this service reads are modelled; unknown fields are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JwsTransactionDecodedPayloadModel {
    /// A UUID you create at the time of purchase that associates the
    /// transaction with a customer on your own service. If your app doesn’t
    /// provide an appAccountToken, this string is empty.
    #[serde(default)]
    pub(crate) app_account_token: Option<String>,
    /// The bundle identifier of the app.
    pub(crate) bundle_id: String,
    /// The server environment, either sandbox or production.
    pub(crate) environment: Option<Environment>,
    /// The UNIX time, in milliseconds, that the subscription expires or renews.
    #[serde(default, with = "ts_milliseconds_option")]
    pub(crate) expires_date: Option<DateTime<Utc>>,
    /// The identifier that contains the offer code or the promotional offer
    /// identifier.
    pub(crate) offer_identifier: Option<String>,
    /// A value that represents the promotional offer type.
    pub(crate) offer_type: Option<OfferType>,
    /// The transaction identifier of the original purchase.
    pub(crate) original_transaction_id: String,
    /// The unique identifier of the product.
    pub(crate) product_id: String,
    /// The UNIX time, in milliseconds, that the App Store charged the
    /// customer’s account for a purchase, restored product, subscription, or
    /// subscription renewal after a lapse.
    #[serde(with = "ts_milliseconds")]
    pub(crate) purchase_date: DateTime<Utc>,
    /// The UNIX time, in milliseconds, that the App Store refunded the
    /// transaction or revoked it from Family Sharing.
    #[serde(default, with = "ts_milliseconds_option")]
    pub(crate) revocation_date: Option<DateTime<Utc>>,
    /// The reason that the App Store refunded the transaction or revoked it
    /// from Family Sharing. 0 = other, 1 = issue within the app.
    pub(crate) revocation_reason: Option<i64>,
    /// The unique identifier of the transaction.
    pub(crate) transaction_id: String,
}
