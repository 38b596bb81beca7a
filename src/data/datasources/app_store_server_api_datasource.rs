use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    config::AppStoreApiCredentials,
    data::models::app_store_server_api::transaction_info_response_model::TransactionInfoResponseModel,
    errors::{ConfigError, IapSyncError},
};

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_default()
});

#[async_trait]
pub(crate) trait AppStoreServerApiDatasource: Send + Sync {
    /// Get Transaction Info:
    /// https://developer.apple.com/documentation/appstoreserverapi/get_transaction_info
    ///
    /// transactionId:
    ///   The identifier of a transaction that belongs to the customer, and
    ///   which may be an original transaction identifier.
    async fn get_transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfoResponseModel, IapSyncError>;
}

pub(crate) struct AppStoreServerApiDatasourceImpl {
    base_url: String,
    issuer_id: String,
    key_id: String,
    bundle_id: String,
    signing_key: jsonwebtoken::EncodingKey,
}

#[async_trait]
impl AppStoreServerApiDatasource for AppStoreServerApiDatasourceImpl {
    async fn get_transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfoResponseModel, IapSyncError> {
        let url = format!("{}/inApps/v1/transactions/{}", self.base_url, transaction_id);
        self.callout(&url, "GetTransactionInfo").await
    }
}

impl AppStoreServerApiDatasourceImpl {
    pub(crate) fn new(
        base_url: &str,
        credentials: &AppStoreApiCredentials,
        bundle_id: &str,
    ) -> Result<Self, ConfigError> {
        let signing_key = jsonwebtoken::EncodingKey::from_ec_pem(credentials.private_key.as_bytes())
            .map_err(|e| ConfigError::Invalid {
                key: "APPLE_PRIVATE_KEY",
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            issuer_id: credentials.issuer_id.clone(),
            key_id: credentials.key_id.clone(),
            bundle_id: bundle_id.to_owned(),
            signing_key,
        })
    }

    /// Tokens are short-lived, so one is built per request.
    fn build_jwt_token(&self) -> Result<String, IapSyncError> {
        // Build header.
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        // Build claims.
        #[derive(Debug, Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            iat: i64,
            exp: i64,
            aud: &'a str,
            bid: &'a str,
        }
        let now = chrono::Utc::now();
        let claims = Claims {
            iss: &self.issuer_id,
            iat: now.timestamp(),
            exp: (now + chrono::Duration::minutes(5)).timestamp(),
            aud: "appstoreconnect-v1",
            bid: &self.bundle_id,
        };

        // Build token.
        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| IapSyncError::Upstream(format!("failed to build API token: {e}")))
    }

    async fn callout<T: DeserializeOwned>(
        &self,
        url: &str,
        function_name: &str,
    ) -> Result<T, IapSyncError> {
        let token = self.build_jwt_token()?;
        let response = HTTP_CLIENT
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| {
                let message = format!("{function_name}: callout failed to send: {e}");
                // Unreachable or slow upstream; the next run may get through.
                if e.is_connect() || e.is_timeout() {
                    IapSyncError::TransientUpstream(message)
                } else {
                    IapSyncError::Upstream(message)
                }
            })?;

        let status = response.status();
        debug!(function_name, %status, "App Store Server API responded");
        if status == StatusCode::NOT_FOUND {
            return Err(IapSyncError::TransientUpstream(format!(
                "{function_name}: {url} returned 404"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IapSyncError::Upstream(format!(
                "{function_name}: non-success status {status}: {body}"
            )));
        }

        response.json().await.map_err(|e| {
            IapSyncError::Upstream(format!("{function_name}: failed to parse response: {e}"))
        })
    }
}
