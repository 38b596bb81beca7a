use serde::Deserialize;

/// The request body the App Store server sends to the notification endpoint.
///
/// https://developer.apple.com/documentation/appstoreservernotifications/responsebodyv2
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResponseBodyV2Model {
    /// The payload in JSON Web Signature (JWS) format, signed by the App Store.
    pub(crate) signed_payload: String,
}
