//! Fixtures shared by unit tests: a throwaway certificate chain standing in
//! for Apple's, an App Store Connect API key, a scripted API and a seeded
//! plan catalog.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    ec::{Asn1Flag, EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{
        extension::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier},
        X509Builder, X509NameBuilder, X509,
    },
};
use serde_json::{json, Value};

use crate::{
    config::AppStoreApiCredentials,
    data::{
        datasources::{
            app_store_server_api_datasource::AppStoreServerApiDatasource,
            app_store_server_notification_datasource::AppStoreServerNotificationDatasourceImpl,
            signed_data_verifier::SignedDataVerifier,
        },
        models::app_store_server_api::transaction_info_response_model::TransactionInfoResponseModel,
        repositories::app_store_repository_impl::AppStoreRepositoryImpl,
    },
    domain::repositories::app_store_repository::AppStoreRepository,
    errors::IapSyncError,
    storage::{plan_catalog_seed, Storage},
};

pub(crate) const BUNDLE_ID: &str = "com.example.app";

pub(crate) const BASIC_PRODUCT: &str = "plan.basic.monthly";
pub(crate) const PREMIUM_PRODUCT: &str = "plan.premium.monthly";

fn ec_key() -> PKey<Private> {
    let mut group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    group.set_asn1_flag(Asn1Flag::NAMED_CURVE);
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn certificate(
    common_name: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    is_ca: bool,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(Utc::now().timestamp() - 86_400).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    if is_ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    } else {
        builder
            .append_extension(KeyUsage::new().critical().digital_signature().build().unwrap())
            .unwrap();
    }

    let issuer_cert = issuer.map(|(cert, _)| &**cert);
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(issuer_cert, None))
        .unwrap();
    builder.append_extension(ski).unwrap();
    if issuer_cert.is_some() {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(issuer_cert, None))
            .unwrap();
        builder.append_extension(aki).unwrap();
    }

    let signing_key = issuer.map(|(_, k)| k).unwrap_or(key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Root, intermediate and leaf certificate, shaped like Apple's signing chain.
pub(crate) struct TestPki {
    root: X509,
    intermediate: X509,
    leaf: X509,
    leaf_key: PKey<Private>,
}

impl TestPki {
    pub(crate) fn generate() -> Self {
        let root_key = ec_key();
        let root = certificate("Test Root CA", &root_key, None, true);
        let intermediate_key = ec_key();
        let intermediate = certificate(
            "Test Worldwide Developer Relations CA",
            &intermediate_key,
            Some((&root, &root_key)),
            true,
        );
        let leaf_key = ec_key();
        let leaf = certificate(
            "Test StoreKit Signing",
            &leaf_key,
            Some((&intermediate, &intermediate_key)),
            false,
        );
        Self {
            root,
            intermediate,
            leaf,
            leaf_key,
        }
    }

    pub(crate) fn root_der(&self) -> Vec<u8> {
        self.root.to_der().unwrap()
    }

    pub(crate) fn root_pem(&self) -> Vec<u8> {
        self.root.to_pem().unwrap()
    }

    pub(crate) fn verifier(&self) -> Arc<SignedDataVerifier> {
        Arc::new(SignedDataVerifier::new(&self.root_der()).unwrap())
    }

    /// Repository trusting this chain, backed by `api` for upstream lookups.
    pub(crate) fn repository(&self, api: Option<ScriptedApi>) -> Arc<dyn AppStoreRepository> {
        Arc::new(AppStoreRepositoryImpl::with_datasources(
            api,
            AppStoreServerNotificationDatasourceImpl::new(self.verifier()),
            BUNDLE_ID,
        ))
    }

    /// ES256 compact JWS with the full chain in `x5c`.
    pub(crate) fn sign(&self, claims: &Value) -> String {
        let chain = [&self.leaf, &self.intermediate, &self.root]
            .iter()
            .map(|cert| STANDARD.encode(cert.to_der().unwrap()))
            .collect();
        self.sign_with_header(claims, Some(chain))
    }

    pub(crate) fn sign_without_chain(&self, claims: &Value) -> String {
        self.sign_with_header(claims, None)
    }

    fn sign_with_header(&self, claims: &Value, x5c: Option<Vec<String>>) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.x5c = x5c;
        let key =
            EncodingKey::from_ec_pem(&self.leaf_key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }
}

/// App Store Connect API key pair.
pub(crate) struct ApiKey {
    key: PKey<Private>,
}

impl ApiKey {
    pub(crate) fn generate() -> Self {
        Self { key: ec_key() }
    }

    pub(crate) fn credentials(&self) -> AppStoreApiCredentials {
        AppStoreApiCredentials {
            issuer_id: "issuer-1".into(),
            key_id: "KEY123".into(),
            private_key: String::from_utf8(self.key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
        }
    }

    pub(crate) fn public_pem(&self) -> Vec<u8> {
        self.key.public_key_to_pem().unwrap()
    }
}

#[derive(Debug, Clone)]
enum ScriptedResponse {
    Signed(String),
    NotFound,
    ServerError,
}

/// In-process stand-in for the App Store Server API. Transactions that were
/// not scripted are reported as not found.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedApi {
    responses: Arc<Mutex<HashMap<String, ScriptedResponse>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedApi {
    pub(crate) fn respond_signed(&self, transaction_id: &str, signed_transaction_info: String) {
        self.script(transaction_id, ScriptedResponse::Signed(signed_transaction_info));
    }

    pub(crate) fn respond_not_found(&self, transaction_id: &str) {
        self.script(transaction_id, ScriptedResponse::NotFound);
    }

    pub(crate) fn respond_error(&self, transaction_id: &str) {
        self.script(transaction_id, ScriptedResponse::ServerError);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn script(&self, transaction_id: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(transaction_id.to_owned(), response);
    }
}

#[async_trait]
impl AppStoreServerApiDatasource for ScriptedApi {
    async fn get_transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfoResponseModel, IapSyncError> {
        self.calls.lock().unwrap().push(transaction_id.to_owned());
        let response = self.responses.lock().unwrap().get(transaction_id).cloned();
        match response {
            Some(ScriptedResponse::Signed(signed_transaction_info)) => {
                Ok(TransactionInfoResponseModel {
                    signed_transaction_info,
                })
            }
            Some(ScriptedResponse::ServerError) => {
                Err(IapSyncError::Upstream("scripted 500".into()))
            }
            Some(ScriptedResponse::NotFound) | None => Err(IapSyncError::TransientUpstream(
                format!("{transaction_id} not found"),
            )),
        }
    }
}

pub(crate) fn transaction_claims(
    transaction_id: &str,
    original_transaction_id: &str,
    product_id: &str,
    app_account_token: Option<&str>,
    expires_date: Option<DateTime<Utc>>,
) -> Value {
    let mut claims = json!({
        "transactionId": transaction_id,
        "originalTransactionId": original_transaction_id,
        "productId": product_id,
        "bundleId": BUNDLE_ID,
        "purchaseDate": Utc::now().timestamp_millis(),
        "environment": "Sandbox",
    });
    if let Some(token) = app_account_token {
        claims["appAccountToken"] = json!(token);
    }
    if let Some(expires_date) = expires_date {
        claims["expiresDate"] = json!(expires_date.timestamp_millis());
    }
    claims
}

pub(crate) fn renewal_claims(
    original_transaction_id: &str,
    product_id: &str,
    auto_renew_product_id: Option<&str>,
    auto_renew_enabled: bool,
) -> Value {
    json!({
        "originalTransactionId": original_transaction_id,
        "productId": product_id,
        "autoRenewProductId": auto_renew_product_id,
        "autoRenewStatus": if auto_renew_enabled { 1 } else { 0 },
        "environment": "Sandbox",
    })
}

pub(crate) fn notification_claims(
    notification_uuid: &str,
    notification_type: &str,
    subtype: Option<&str>,
    signed_transaction_info: Option<&str>,
    signed_renewal_info: Option<&str>,
) -> Value {
    json!({
        "notificationType": notification_type,
        "subtype": subtype,
        "notificationUUID": notification_uuid,
        "version": "2.0",
        "signedDate": Utc::now().timestamp_millis(),
        "data": {
            "bundleId": BUNDLE_ID,
            "environment": "Sandbox",
            "signedTransactionInfo": signed_transaction_info,
            "signedRenewalInfo": signed_renewal_info,
        },
    })
}

pub(crate) fn webhook_body(signed_payload: &str) -> String {
    json!({ "signedPayload": signed_payload }).to_string()
}

/// Free Plan <- Basic <- Premium, with two entitlements.
pub(crate) const CATALOG_JSON: &str = r#"{
    "entitlements": [
        { "id": 1, "name": "Exports", "slug": "exports", "isMetered": true,
          "defaultLimit": 10, "resetPeriod": "month" },
        { "id": 2, "name": "Priority support", "slug": "priority-support" }
    ],
    "plans": [
        { "id": 1, "name": "Free Plan", "order": 0, "role": "free",
          "features": [{ "id": 1, "name": "Editor", "order": 1 }],
          "entitlements": [{ "entitlementId": 1 }] },
        { "id": 2, "name": "Basic", "productId": "plan.basic.monthly", "order": 1,
          "role": "basic", "inheritFrom": 1,
          "features": [{ "id": 2, "name": "Cloud sync", "order": 2 }],
          "entitlements": [{ "entitlementId": 1, "limitOverride": 100 }] },
        { "id": 3, "name": "Premium", "productId": "plan.premium.monthly", "order": 2,
          "role": "premium", "inheritFrom": 2,
          "features": [{ "id": 3, "name": "Team spaces", "order": 3 }],
          "entitlements": [{ "entitlementId": 2 }] }
    ]
}"#;

pub(crate) async fn seed_catalog(storage: &Storage) {
    plan_catalog_seed::seed_from_json(storage, CATALOG_JSON)
        .await
        .unwrap();
}
