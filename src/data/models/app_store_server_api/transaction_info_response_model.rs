use serde::Deserialize;

/// A response that contains signed transaction information for a single
/// transaction.
///
/// https://developer.apple.com/documentation/appstoreserverapi/transactioninforesponse
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionInfoResponseModel {
    /// A customer’s in-app purchase transaction, signed by Apple, in JSON Web
    /// Signature (JWS) format.
    pub(crate) signed_transaction_info: String,
}
